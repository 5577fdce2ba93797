//! Structured results of every orchestrator operation.

use serde::{Deserialize, Serialize};

use super::component::ComponentId;
use super::run::{PauseReason, Phase};
use crate::domain::errors::{TerminalError, ValidationIssue};

/// Why a tick could not make progress without anything being wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// `plan_only` holds natural progression after Validate.
    PlanOnly,
    /// A targeted build whose own dependencies are not yet satisfied.
    WaitingOnDependencies {
        component_id: ComponentId,
        blocked_by: Vec<ComponentId>,
    },
    /// Nothing is dispatchable; the named components hold the run up.
    NothingReady { blocked: Vec<ComponentId> },
    /// A stop request arrived before dispatch.
    Stopped,
    /// The run already completed.
    RunComplete,
}

impl BlockReason {
    pub fn describe(&self) -> String {
        match self {
            Self::PlanOnly => "plan_only: natural progression halted after validation".to_string(),
            Self::WaitingOnDependencies {
                component_id,
                blocked_by,
            } => format!(
                "'{component_id}' waits on dependencies without a winner: {}",
                blocked_by.join(", ")
            ),
            Self::NothingReady { blocked } => {
                format!("nothing ready; blocked components: {}", blocked.join(", "))
            }
            Self::Stopped => "stop requested; no new dispatch".to_string(),
            Self::RunComplete => "run complete".to_string(),
        }
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The Validate gate reported errors.
    Validation { issues: Vec<ValidationIssue> },
    /// Retries are exhausted and nothing else can progress.
    DiagnosisExhausted { exhausted: Vec<TerminalError> },
    /// Contract or test authoring kept failing for a component.
    AuthoringExhausted {
        component_id: ComponentId,
        stage: Phase,
        message: String,
    },
}

impl FailureReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Validation { issues } => {
                let errors = issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("validation: {errors}")
            }
            Self::DiagnosisExhausted { exhausted } => {
                let detail = exhausted
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("diagnosis_exhausted: {detail}")
            }
            Self::AuthoringExhausted {
                component_id,
                stage,
                message,
            } => format!("authoring_exhausted: {stage} for '{component_id}': {message}"),
        }
    }
}

/// Result of a tick, targeted build, or validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Progressed { phase: Phase, summary: String },
    BlockedWaiting { reason: BlockReason },
    Paused { reason: PauseReason },
    Failed { reason: FailureReason },
}

impl TickOutcome {
    pub fn progressed(phase: Phase, summary: impl Into<String>) -> Self {
        Self::Progressed {
            phase,
            summary: summary.into(),
        }
    }

    pub fn is_progressed(&self) -> bool {
        matches!(self, Self::Progressed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Progressed { .. } => "progressed",
            Self::BlockedWaiting { .. } => "blocked_waiting",
            Self::Paused { .. } => "paused",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Progressed { phase, summary } => format!("progressed ({phase}): {summary}"),
            Self::BlockedWaiting { reason } => format!("blocked_waiting: {}", reason.describe()),
            Self::Paused { reason } => format!("paused: {}", reason.describe()),
            Self::Failed { reason } => format!("failed: {}", reason.describe()),
        }
    }
}
