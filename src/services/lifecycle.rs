//! Run lifecycle: initialization, ticks, targeted builds and operator
//! controls.
//!
//! Every operation loads the run from the store, acts, and writes the run
//! back before returning. Nothing survives in process memory between calls.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, Severity, ValidationIssue};
use crate::domain::models::{
    AuditAction, AuditEntry, BlockReason, ComponentId, ComponentStatus, Config, DecompositionTree,
    FailureReason, ImplementationAttempt, PauseReason, Phase, PhaseStatus, RunState, RunStatus,
    TaskState, TickOutcome,
};
use crate::domain::ports::{AgentBackend, RunStore, TestHarness};
use crate::services::budget_gate::crossed_warning_threshold;
use crate::services::diagnoser::Diagnoser;
use crate::services::dispatcher::Dispatcher;
use crate::services::scheduler::{self, TickPlan};
use crate::services::validator::{self, ValidationReport};
use crate::services::{authoring, implementation, integrator};

// ============================================================================
// Tick context
// ============================================================================

/// Mutable working copy of one run for the duration of one operation.
///
/// New attempts are buffered and committed in the same transaction as the
/// run record that charges them. Audit entries are written after that, so
/// the log never describes a state the store does not hold.
pub(crate) struct TickContext<'a> {
    pub run: RunState,
    pub tree: DecompositionTree,
    pub store: &'a dyn RunStore,
    pub backend: &'a Arc<dyn AgentBackend>,
    pub harness: &'a Arc<dyn TestHarness>,
    pub config: &'a Config,
    pub dispatcher: &'a Dispatcher,
    pub diagnoser: &'a Diagnoser,
    attempts: Vec<ImplementationAttempt>,
    audit: Vec<AuditEntry>,
}

impl TickContext<'_> {
    pub fn entry(&self, phase: Phase, action: AuditAction, decision: impl Into<String>) -> AuditEntry {
        AuditEntry::new(self.run.id, phase, action, decision)
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }

    /// Buffer a new attempt, charge its cost and list it on its task.
    pub fn record_attempt(&mut self, phase: Phase, attempt: ImplementationAttempt) {
        self.run.charge(phase, attempt.cost_usd);
        self.run
            .task_mut(&attempt.component_id)
            .attempt_ids
            .push(attempt.id);
        self.attempts.push(attempt);
    }

    /// Stored and buffered attempts for a component, by submission order.
    pub async fn attempts_for(&self, component_id: &str) -> DomainResult<Vec<ImplementationAttempt>> {
        let mut attempts = self.store.attempts_for(self.run.id, component_id).await?;
        attempts.extend(
            self.attempts
                .iter()
                .filter(|a| a.component_id == component_id)
                .cloned(),
        );
        attempts.sort_by_key(|a| a.submission_order);
        Ok(attempts)
    }

    /// Persist the run record, tree and buffered attempts in one
    /// transaction, then flush buffered audit entries.
    pub async fn checkpoint(&mut self) -> DomainResult<()> {
        self.run.touch();
        self.store
            .commit_tick(&self.run, &self.tree, &self.attempts)
            .await?;
        self.attempts.clear();
        for entry in self.audit.drain(..) {
            self.store.append_audit(&entry).await?;
        }
        Ok(())
    }

    /// Requeue work a previous process left in flight.
    ///
    /// Components are only marked implementing or integrating between the
    /// dispatch checkpoint and the commit after fan-in, so finding one here
    /// means that process died mid-tick. They fall back to their last
    /// settled state; nothing from the lost fan-in was committed.
    fn recover_interrupted(&mut self) -> DomainResult<()> {
        let interrupted: Vec<(ComponentId, ComponentStatus)> = self
            .tree
            .nodes
            .values()
            .filter(|n| n.status.settled() != n.status)
            .map(|n| (n.id.clone(), n.status))
            .collect();
        for (id, status) in interrupted {
            let task = self.run.task_mut(&id);
            let settled = match (status, task.winner) {
                (ComponentStatus::Implementing, Some(_)) => ComponentStatus::Implemented,
                (ComponentStatus::Integrating, Some(_)) => ComponentStatus::Integrated,
                _ => ComponentStatus::Validated,
            };
            task.state = if settled.has_artifact() {
                TaskState::Completed
            } else {
                TaskState::Queued
            };
            self.tree.set_status(&id, settled)?;
            tracing::warn!(
                run_id = %self.run.id,
                component_id = %id,
                was = status.as_str(),
                now = settled.as_str(),
                "Interrupted work requeued"
            );
            let entry = self
                .entry(self.run.phase, AuditAction::Recover, format!("{status} interrupted"))
                .component(id)
                .detail(format!("restored to {settled}"));
            self.record(entry);
        }
        Ok(())
    }

    /// Log the budget warning once spend crosses the configured threshold.
    fn check_budget_warning(&mut self) {
        if crossed_warning_threshold(&self.run, &self.config.budget) {
            tracing::warn!(
                run_id = %self.run.id,
                spend = self.run.spend_usd,
                cap = self.run.budget_cap_usd,
                "Budget warning threshold crossed"
            );
            self.run.budget_warning_emitted = true;
            let entry = self
                .entry(self.run.phase, AuditAction::Budget, "warning threshold crossed")
                .detail(format!(
                    "spent ${:.2} of ${:.2}",
                    self.run.spend_usd, self.run.budget_cap_usd
                ));
            self.record(entry);
        }
    }

    fn pause(&mut self, reason: PauseReason) -> TickOutcome {
        let already = self.run.status == RunStatus::Paused;
        self.run.status = RunStatus::Paused;
        self.run.set_phase_status(self.run.phase, PhaseStatus::Paused);
        if !already {
            tracing::warn!(run_id = %self.run.id, reason = %reason.describe(), "Run paused");
            let entry = self.entry(self.run.phase, AuditAction::Pause, reason.describe());
            self.record(entry);
        }
        self.run.pause_reason = Some(reason.clone());
        TickOutcome::Paused { reason }
    }

    fn resume(&mut self, why: &str) {
        tracing::info!(run_id = %self.run.id, why, "Run resumed");
        self.run.status = RunStatus::Active;
        self.run.pause_reason = None;
        self.run.set_phase_status(self.run.phase, PhaseStatus::InProgress);
        let entry = self.entry(self.run.phase, AuditAction::Resume, why);
        self.record(entry);
    }

    fn fail(&mut self, reason: FailureReason) -> TickOutcome {
        tracing::error!(run_id = %self.run.id, reason = %reason.describe(), "Run failed");
        self.run.status = RunStatus::Failed;
        self.run.set_phase_status(self.run.phase, PhaseStatus::Failed);
        let entry = self.entry(self.run.phase, AuditAction::Fail, reason.describe());
        self.record(entry);
        self.run.failure = Some(reason.clone());
        TickOutcome::Failed { reason }
    }

    fn complete(&mut self) -> TickOutcome {
        self.run.status = RunStatus::Completed;
        for phase in [Phase::Implement, Phase::Integrate] {
            self.run.set_phase_status(phase, PhaseStatus::Completed);
        }
        if self.run.phase_status(Phase::Diagnose) == PhaseStatus::InProgress {
            self.run.set_phase_status(Phase::Diagnose, PhaseStatus::Completed);
        }
        let root = self.tree.root_id.clone();
        tracing::info!(run_id = %self.run.id, root = %root, spend = self.run.spend_usd, "Run complete");
        let entry = self
            .entry(self.run.phase, AuditAction::Complete, "root has an artifact")
            .component(root.clone());
        self.record(entry);
        TickOutcome::progressed(self.run.phase, format!("run complete: '{root}' built"))
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Snapshot for status reports.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run: RunState,
    pub tree: DecompositionTree,
}

pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn AgentBackend>,
    harness: Arc<dyn TestHarness>,
    config: Config,
    dispatcher: Dispatcher,
    diagnoser: Diagnoser,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn AgentBackend>,
        harness: Arc<dyn TestHarness>,
        config: Config,
        cancel: CancellationToken,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            config.scheduling.max_concurrent_agents,
            Duration::from_secs(config.scheduling.attempt_timeout_secs),
            cancel,
        );
        let diagnoser = Diagnoser::new(config.diagnosis.clone());
        Self {
            store,
            backend,
            harness,
            config,
            dispatcher,
            diagnoser,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    fn context(&self, run: RunState, tree: DecompositionTree) -> TickContext<'_> {
        TickContext {
            run,
            tree,
            store: self.store.as_ref(),
            backend: &self.backend,
            harness: &self.harness,
            config: &self.config,
            dispatcher: &self.dispatcher,
            diagnoser: &self.diagnoser,
            attempts: Vec::new(),
            audit: Vec::new(),
        }
    }

    async fn load(&self, run_id: Uuid) -> DomainResult<(RunState, DecompositionTree)> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or_else(|| DomainError::RunNotFound(run_id.to_string()))
    }

    /// Id of the most recently updated run.
    pub async fn latest_run(&self) -> DomainResult<Uuid> {
        self.store
            .latest_run()
            .await?
            .ok_or_else(|| DomainError::RunNotFound("no runs initialized".to_string()))
    }

    /// Create a run for a decomposition tree handed over by the decomposition
    /// collaborator.
    ///
    /// Trees with cycles, dangling dependency ids or unreachable nodes are
    /// rejected. Child-count policy is left to the Validate gate.
    pub async fn init_run(
        &self,
        task: impl Into<String>,
        tree: DecompositionTree,
        budget_cap_usd: Option<f64>,
    ) -> DomainResult<RunState> {
        let cap = budget_cap_usd.unwrap_or(self.config.budget.cap_usd);
        if !(cap.is_finite() && cap > 0.0) {
            return Err(DomainError::InvalidBudget(cap));
        }

        let report = validator::validate_tree(&tree, &self.config.validation);
        for issue in &report.errors {
            match issue {
                ValidationIssue::CycleDetected { path } => {
                    return Err(DomainError::DependencyCycle(path.clone()));
                }
                ValidationIssue::MissingDependency { .. }
                | ValidationIssue::OrphanedComponent { .. } => {
                    return Err(DomainError::InvalidTree(issue.to_string()));
                }
                _ => {}
            }
        }

        let mut run = RunState::new(task, &tree, cap);
        run.set_phase_status(Phase::Interview, PhaseStatus::Completed);
        run.set_phase_status(Phase::Decompose, PhaseStatus::Completed);
        run.set_phase_status(Phase::Shape, PhaseStatus::Completed);
        run.enter_phase(Phase::Contract);
        self.store.create_run(&run, &tree).await?;

        let shape = if self.config.shaping.enabled {
            "shape completed by collaborator"
        } else {
            "shape skipped"
        };
        let entries = [
            AuditEntry::new(run.id, Phase::Decompose, AuditAction::Init, "run initialized")
                .detail(format!("{} components, root '{}'", tree.len(), tree.root_id)),
            AuditEntry::new(run.id, Phase::Shape, AuditAction::Init, shape),
        ];
        for entry in &entries {
            self.store.append_audit(entry).await?;
        }

        tracing::info!(
            run_id = %run.id,
            components = tree.len(),
            cap_usd = cap,
            "Run initialized"
        );
        Ok(run)
    }

    /// Advance a run by one tick.
    pub async fn tick(&self, run_id: Uuid) -> DomainResult<TickOutcome> {
        let (run, tree) = self.load(run_id).await?;
        if self.dispatcher.is_cancelled() {
            return Ok(TickOutcome::BlockedWaiting {
                reason: BlockReason::Stopped,
            });
        }

        let mut ctx = self.context(run, tree);
        ctx.recover_interrupted()?;
        let plan = scheduler::plan(&ctx.run, &ctx.tree, &self.config);
        tracing::debug!(run_id = %run_id, ?plan, "Tick planned");
        ctx.run.tick_count += 1;
        let outcome = self.execute(&mut ctx, plan).await?;
        ctx.check_budget_warning();
        ctx.checkpoint().await?;
        Ok(outcome)
    }

    /// Rebuild one component out of the natural order.
    ///
    /// Counts as operator intervention: a failed run is reopened and the
    /// component's retry counters start over.
    pub async fn build(&self, run_id: Uuid, component_id: &str) -> DomainResult<TickOutcome> {
        let (run, tree) = self.load(run_id).await?;
        if tree.get(component_id).is_none() {
            return Err(DomainError::ComponentNotFound(component_id.to_string()));
        }
        if self.dispatcher.is_cancelled() {
            return Ok(TickOutcome::BlockedWaiting {
                reason: BlockReason::Stopped,
            });
        }

        let mut ctx = self.context(run, tree);
        ctx.recover_interrupted()?;
        ctx.run.tick_count += 1;
        if ctx.run.status == RunStatus::Failed {
            ctx.run.failure = None;
            ctx.resume("reopened by targeted build");
        }
        reset_component(&mut ctx, component_id)?;

        let plan = scheduler::plan_targeted(&ctx.run, &ctx.tree, &self.config, component_id)?;
        let entry = ctx
            .entry(plan.phase(&ctx.run), AuditAction::TargetBuild, "targeted build requested")
            .component(component_id);
        ctx.record(entry);

        let outcome = self.execute(&mut ctx, plan).await?;
        ctx.check_budget_warning();
        ctx.checkpoint().await?;
        Ok(outcome)
    }

    async fn execute(&self, ctx: &mut TickContext<'_>, plan: TickPlan) -> DomainResult<TickOutcome> {
        let budget_paused = ctx.run.pause_reason.as_ref().is_some_and(PauseReason::is_budget)
            && ctx.run.status == RunStatus::Paused;
        if budget_paused && !matches!(plan, TickPlan::Pause { .. } | TickPlan::Halted { .. }) {
            ctx.resume("budget admits dispatch");
        }

        match plan {
            TickPlan::Halted { outcome } => Ok(outcome),
            TickPlan::Pause { reason } => Ok(ctx.pause(reason)),
            TickPlan::Block { reason } => {
                tracing::info!(run_id = %ctx.run.id, reason = %reason.describe(), "Tick blocked");
                Ok(TickOutcome::BlockedWaiting { reason })
            }
            TickPlan::AuthorContracts { components } => {
                authoring::author_contracts(ctx, components).await
            }
            TickPlan::AuthorTests { components } => authoring::author_tests(ctx, components).await,
            TickPlan::Reauthor { component_id } => authoring::reauthor(ctx, component_id).await,
            TickPlan::Validate => self.run_validation(ctx).await,
            TickPlan::Implement { units } => {
                let (outcome, systemic) = implementation::implement(ctx, units).await?;
                Ok(match systemic {
                    Some(reason) => ctx.pause(reason),
                    None => outcome,
                })
            }
            TickPlan::Integrate { parents } => integrator::integrate(ctx, parents).await,
            TickPlan::Diagnose { components } => self.diagnose(ctx, &components).await,
            TickPlan::Complete => Ok(ctx.complete()),
            TickPlan::Fail { reason } => Ok(ctx.fail(reason)),
        }
    }

    // ========================================================================
    // Validate
    // ========================================================================

    async fn run_validation(&self, ctx: &mut TickContext<'_>) -> DomainResult<TickOutcome> {
        ctx.run.enter_phase(Phase::Validate);
        let report = self.report(ctx.run.id, &ctx.tree).await?;

        for warning in &report.warnings {
            let mut entry = ctx.entry(Phase::Validate, AuditAction::Validate, warning.to_string());
            entry.component_id = warning.component_id().map(str::to_string);
            ctx.record(entry);
        }

        if !report.passed() {
            tracing::warn!(
                run_id = %ctx.run.id,
                errors = report.errors.len(),
                "Validation failed"
            );
            ctx.run.set_phase_status(Phase::Validate, PhaseStatus::Failed);
            let detail = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            let entry = ctx
                .entry(
                    Phase::Validate,
                    AuditAction::Validate,
                    format!("failed with {} error(s)", report.errors.len()),
                )
                .detail(detail);
            ctx.record(entry);
            return Ok(TickOutcome::Failed {
                reason: FailureReason::Validation {
                    issues: report.errors,
                },
            });
        }

        let ids: Vec<ComponentId> = ctx.tree.ids().cloned().collect();
        for id in &ids {
            ctx.tree.set_status(id, ComponentStatus::Validated)?;
        }
        ctx.run.validation_passed = true;
        ctx.run.set_phase_status(Phase::Validate, PhaseStatus::Completed);
        ctx.run.enter_phase(Phase::Implement);
        tracing::info!(
            run_id = %ctx.run.id,
            warnings = report.warnings.len(),
            "Validation passed"
        );
        let entry = ctx.entry(
            Phase::Validate,
            AuditAction::Validate,
            format!("passed with {} warning(s)", report.warnings.len()),
        );
        ctx.record(entry);
        Ok(TickOutcome::progressed(
            Phase::Validate,
            format!(
                "validated {} components ({} warnings)",
                ids.len(),
                report.warnings.len()
            ),
        ))
    }

    async fn report(&self, run_id: Uuid, tree: &DecompositionTree) -> DomainResult<ValidationReport> {
        let contracts = self.store.current_contracts(run_id).await?;
        let suites = self.store.current_suites(run_id).await?;
        Ok(validator::validate(
            tree,
            &contracts,
            &suites,
            &self.config.validation,
        ))
    }

    /// Validate the current tree, contracts and suites without dispatching
    /// or changing the run.
    pub async fn validate(&self, run_id: Uuid) -> DomainResult<ValidationReport> {
        let (_, tree) = self.load(run_id).await?;
        self.report(run_id, &tree).await
    }

    // ========================================================================
    // Diagnose
    // ========================================================================

    async fn diagnose(
        &self,
        ctx: &mut TickContext<'_>,
        components: &[ComponentId],
    ) -> DomainResult<TickOutcome> {
        ctx.run.enter_phase(Phase::Diagnose);
        for id in components {
            let node = ctx
                .tree
                .get(id)
                .cloned()
                .ok_or_else(|| DomainError::ComponentNotFound(id.clone()))?;
            let attempts = ctx.attempts_for(id).await?;
            let task = ctx.run.task_mut(id);
            self.diagnoser.gather(task, &attempts);
            let explanation = self.diagnoser.diagnose(&node, task);
            let round = task.round;
            ctx.tree.set_status(id, ComponentStatus::Validated)?;

            tracing::info!(
                run_id = %ctx.run.id,
                component_id = %id,
                round,
                "Component requeued after diagnosis"
            );
            let entry = ctx
                .entry(Phase::Diagnose, AuditAction::Diagnose, explanation)
                .component(id.clone())
                .detail(format!("requeued for round {round}"));
            ctx.record(entry);
        }
        if ctx.run.awaiting_diagnosis().is_empty() {
            ctx.run.set_phase_status(Phase::Diagnose, PhaseStatus::Completed);
        }
        Ok(TickOutcome::progressed(
            Phase::Diagnose,
            format!("diagnosed {}", components.join(", ")),
        ))
    }

    // ========================================================================
    // Operator controls
    // ========================================================================

    pub async fn status(&self, run_id: Uuid) -> DomainResult<RunSnapshot> {
        let (run, tree) = self.load(run_id).await?;
        Ok(RunSnapshot { run, tree })
    }

    pub async fn pause(&self, run_id: Uuid, note: Option<String>) -> DomainResult<TickOutcome> {
        let (run, tree) = self.load(run_id).await?;
        if let Some(outcome) = terminal_outcome(&run) {
            return Ok(outcome);
        }
        let mut ctx = self.context(run, tree);
        let outcome = ctx.pause(PauseReason::Operator { note });
        ctx.checkpoint().await?;
        Ok(outcome)
    }

    pub async fn resume(&self, run_id: Uuid) -> DomainResult<TickOutcome> {
        let (run, tree) = self.load(run_id).await?;
        if let Some(outcome) = terminal_outcome(&run) {
            return Ok(outcome);
        }
        let phase = run.phase;
        if run.status != RunStatus::Paused {
            return Ok(TickOutcome::progressed(phase, "run is already active"));
        }
        let mut ctx = self.context(run, tree);
        ctx.resume("resumed by operator");
        ctx.checkpoint().await?;
        Ok(TickOutcome::progressed(phase, "resumed"))
    }

    /// Change the spend cap. A budget-paused run resumes on its next tick if
    /// the new cap admits dispatch.
    pub async fn set_budget(&self, run_id: Uuid, cap_usd: f64) -> DomainResult<TickOutcome> {
        if !(cap_usd.is_finite() && cap_usd > 0.0) {
            return Err(DomainError::InvalidBudget(cap_usd));
        }
        let (run, tree) = self.load(run_id).await?;
        let mut ctx = self.context(run, tree);
        let previous = ctx.run.budget_cap_usd;
        ctx.run.budget_cap_usd = cap_usd;
        if ctx.run.spend_usd < cap_usd * self.config.budget.warning_threshold_pct {
            ctx.run.budget_warning_emitted = false;
        }
        tracing::info!(run_id = %run_id, previous, cap_usd, "Budget cap changed");
        let entry = ctx.entry(
            ctx.run.phase,
            AuditAction::Budget,
            format!("cap ${previous:.2} -> ${cap_usd:.2}"),
        );
        ctx.record(entry);
        let phase = ctx.run.phase;
        ctx.checkpoint().await?;
        Ok(TickOutcome::progressed(phase, format!("budget cap set to ${cap_usd:.2}")))
    }

    pub async fn audit(&self, run_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<AuditEntry>> {
        self.store.list_audit(run_id, limit).await
    }
}

fn terminal_outcome(run: &RunState) -> Option<TickOutcome> {
    if run.status.is_terminal() {
        scheduler::held_outcome(run)
    } else {
        None
    }
}

/// Clear the retry state of a targeted component.
fn reset_component(ctx: &mut TickContext<'_>, component_id: &str) -> DomainResult<()> {
    let validated = ctx.run.validation_passed;
    let task = ctx.run.task_mut(component_id);
    if validated {
        task.exhausted = false;
        task.awaiting_diagnosis = None;
        task.rounds_failed = 0;
        task.timeout_rounds = 0;
        if ctx.tree.status_of(component_id) == Some(ComponentStatus::Failed) {
            ctx.tree.set_status(component_id, ComponentStatus::Validated)?;
        }
    } else {
        task.authoring_failures = 0;
    }
    Ok(())
}

/// Structured outcome of a validation request.
pub fn validation_outcome(report: &ValidationReport) -> TickOutcome {
    if report.passed() {
        TickOutcome::progressed(
            Phase::Validate,
            format!("no errors, {} warning(s)", report.warnings.len()),
        )
    } else {
        TickOutcome::Failed {
            reason: FailureReason::Validation {
                issues: report
                    .errors
                    .iter()
                    .filter(|i| i.severity() == Severity::Error)
                    .cloned()
                    .collect(),
            },
        }
    }
}
