//! Run state: the single persisted record every scheduler tick reads and
//! returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::component::{ComponentId, DecompositionTree};
use super::outcome::FailureReason;
use crate::domain::errors::ResourceError;

/// Ordered lifecycle phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Interview,
    Shape,
    Decompose,
    Contract,
    Test,
    Validate,
    Implement,
    Integrate,
    /// Conditional and re-entrant.
    Diagnose,
}

impl Phase {
    pub const ALL: [Self; 9] = [
        Self::Interview,
        Self::Shape,
        Self::Decompose,
        Self::Contract,
        Self::Test,
        Self::Validate,
        Self::Implement,
        Self::Integrate,
        Self::Diagnose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interview => "interview",
            Self::Shape => "shape",
            Self::Decompose => "decompose",
            Self::Contract => "contract",
            Self::Test => "test",
            Self::Validate => "validate",
            Self::Implement => "implement",
            Self::Integrate => "integrate",
            Self::Diagnose => "diagnose",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level status aggregated from the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run is paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PauseReason {
    /// The next dispatch would push projected spend past the cap.
    BudgetExceeded { spend: f64, projected: f64, cap: f64 },
    /// The next dispatch would push one phase past its share of the cap.
    PhaseBudgetExceeded {
        phase: Phase,
        spend: f64,
        projected: f64,
        cap: f64,
    },
    /// Operator issued `pause`.
    Operator { note: Option<String> },
    /// Several components failed the same way in one tick.
    SystemicFailure {
        pattern: String,
        components: Vec<ComponentId>,
    },
}

impl From<ResourceError> for PauseReason {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::BudgetExceeded {
                spend,
                projected,
                cap,
            } => Self::BudgetExceeded {
                spend,
                projected,
                cap,
            },
            ResourceError::PhaseBudgetExceeded {
                phase,
                spend,
                projected,
                cap,
            } => Self::PhaseBudgetExceeded {
                phase,
                spend,
                projected,
                cap,
            },
        }
    }
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::PhaseBudgetExceeded { .. } => "phase_budget_exceeded",
            Self::Operator { .. } => "operator",
            Self::SystemicFailure { .. } => "systemic_failure",
        }
    }

    /// Budget pauses lift on their own once the gate admits a dispatch.
    pub const fn is_budget(&self) -> bool {
        matches!(
            self,
            Self::BudgetExceeded { .. } | Self::PhaseBudgetExceeded { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Self::BudgetExceeded {
                spend,
                projected,
                cap,
            } => format!(
                "budget_exceeded: spent ${spend:.2}, next dispatch projects ${projected:.2} over cap ${cap:.2}"
            ),
            Self::PhaseBudgetExceeded {
                phase,
                spend,
                projected,
                cap,
            } => format!(
                "phase_budget_exceeded: {phase} spent ${spend:.2}, next dispatch projects ${projected:.2} over phase cap ${cap:.2}"
            ),
            Self::Operator { note: Some(note) } => format!("operator: {note}"),
            Self::Operator { note: None } => "operator".to_string(),
            Self::SystemicFailure {
                pattern,
                components,
            } => format!("systemic_failure: {pattern} in {}", components.join(", ")),
        }
    }
}

/// Dispatch state of one component's current unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Where a failure was localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A leaf's attempt set produced no winner.
    ImplementationBug,
    /// A parent's integration suite failed although its children passed.
    GlueBug,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImplementationBug => "implementation_bug",
            Self::GlueBug => "glue_bug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Attempt,
    FailureMessage,
    Notes,
    Trace,
    Diagnosis,
}

/// One entry of the append-only narrative context of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFragment {
    pub kind: FragmentKind,
    pub round: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub round: u32,
    pub kind: FailureKind,
    pub explanation: String,
    pub all_timed_out: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Per-component bookkeeping inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub state: TaskState,
    #[serde(default)]
    pub attempt_ids: Vec<Uuid>,
    #[serde(default)]
    pub winner: Option<Uuid>,
    /// Current diagnosis round; attempts carry it.
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub rounds_failed: u32,
    #[serde(default)]
    pub timeout_rounds: u32,
    #[serde(default)]
    pub awaiting_diagnosis: Option<FailureKind>,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default)]
    pub context: Vec<ContextFragment>,
    #[serde(default)]
    pub failure_history: Vec<FailureRecord>,
    #[serde(default)]
    pub authoring_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            state: TaskState::Queued,
            attempt_ids: Vec::new(),
            winner: None,
            round: 0,
            rounds_failed: 0,
            timeout_rounds: 0,
            awaiting_diagnosis: None,
            exhausted: false,
            context: Vec::new(),
            failure_history: Vec::new(),
            authoring_failures: 0,
            last_error: None,
        }
    }
}

/// The only cross-tick state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: Uuid,
    pub task: String,
    pub phase: Phase,
    pub phase_status: BTreeMap<Phase, PhaseStatus>,
    pub status: RunStatus,
    pub tasks: BTreeMap<ComponentId, TaskRecord>,
    pub spend_usd: f64,
    #[serde(default)]
    pub phase_spend: BTreeMap<Phase, f64>,
    pub budget_cap_usd: f64,
    #[serde(default)]
    pub pause_reason: Option<PauseReason>,
    /// Set once the run has failed.
    #[serde(default)]
    pub failure: Option<FailureReason>,
    /// Next submission order to hand out to a recorded attempt.
    #[serde(default)]
    pub next_submission: u64,
    #[serde(default)]
    pub tick_count: u64,
    #[serde(default)]
    pub budget_warning_emitted: bool,
    #[serde(default)]
    pub validation_passed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// A fresh run positioned at the Contract phase.
    pub fn new(task: impl Into<String>, tree: &DecompositionTree, budget_cap_usd: f64) -> Self {
        let now = Utc::now();
        let phase_status = Phase::ALL
            .iter()
            .map(|p| (*p, PhaseStatus::NotStarted))
            .collect();
        let tasks = tree
            .ids()
            .map(|id| (id.clone(), TaskRecord::default()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            phase: Phase::Contract,
            phase_status,
            status: RunStatus::Active,
            tasks,
            spend_usd: 0.0,
            phase_spend: BTreeMap::new(),
            budget_cap_usd,
            pause_reason: None,
            failure: None,
            next_submission: 0,
            tick_count: 0,
            budget_warning_emitted: false,
            validation_passed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase_status(&self, phase: Phase) -> PhaseStatus {
        self.phase_status
            .get(&phase)
            .copied()
            .unwrap_or(PhaseStatus::NotStarted)
    }

    pub fn set_phase_status(&mut self, phase: Phase, status: PhaseStatus) {
        self.phase_status.insert(phase, status);
    }

    /// Move to `phase`, marking it in progress.
    pub fn enter_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.set_phase_status(phase, PhaseStatus::InProgress);
    }

    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    /// Task record for `id`, created on first use.
    pub fn task_mut(&mut self, id: &str) -> &mut TaskRecord {
        self.tasks.entry(id.to_string()).or_default()
    }

    /// Charge `amount` to the run and to `phase`.
    pub fn charge(&mut self, phase: Phase, amount: f64) {
        self.spend_usd += amount;
        *self.phase_spend.entry(phase).or_insert(0.0) += amount;
    }

    pub fn phase_spend(&self, phase: Phase) -> f64 {
        self.phase_spend.get(&phase).copied().unwrap_or(0.0)
    }

    /// Ids of components whose retries are exhausted, ascending.
    pub fn exhausted_components(&self) -> Vec<ComponentId> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.exhausted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of components waiting for a diagnosis pass, ascending.
    pub fn awaiting_diagnosis(&self) -> Vec<ComponentId> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.awaiting_diagnosis.is_some() && !t.exhausted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_exhausted(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(|t| t.exhausted)
    }

    /// Hand out the next submission order.
    pub fn take_submission(&mut self) -> u64 {
        let order = self.next_submission;
        self.next_submission += 1;
        order
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::component::ComponentNode;

    fn tree() -> DecompositionTree {
        let mut tree = DecompositionTree::new(ComponentNode::new("root", "Root"));
        tree.insert_child("root", ComponentNode::new("a", "A")).unwrap();
        tree
    }

    #[test]
    fn test_new_run_starts_at_contract() {
        let run = RunState::new("task", &tree(), 10.0);
        assert_eq!(run.phase, Phase::Contract);
        assert_eq!(run.status, RunStatus::Active);
        assert_eq!(run.tasks.len(), 2);
        assert_eq!(run.phase_status(Phase::Implement), PhaseStatus::NotStarted);
    }

    #[test]
    fn test_charge_tracks_phase_spend() {
        let mut run = RunState::new("task", &tree(), 10.0);
        run.charge(Phase::Implement, 1.5);
        run.charge(Phase::Implement, 0.5);
        run.charge(Phase::Contract, 0.25);
        assert!((run.spend_usd - 2.25).abs() < 1e-9);
        assert!((run.phase_spend(Phase::Implement) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_state_json_round_trip() {
        let mut run = RunState::new("task", &tree(), 10.0);
        run.pause_reason = Some(PauseReason::BudgetExceeded {
            spend: 1.0,
            projected: 2.0,
            cap: 1.5,
        });
        let json = serde_json::to_string(&run).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn test_pause_reason_tag() {
        let reason = PauseReason::SystemicFailure {
            pattern: "zero_tests".into(),
            components: vec!["a".into(), "b".into()],
        };
        assert_eq!(reason.as_str(), "systemic_failure");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "systemic_failure");
    }
}
