//! Integrator: composes parents from their children's winning artifacts.
//!
//! A parent is eligible once every child has an artifact. The composition
//! capability returns glue plus a parent-scoped suite; the harness runs that
//! suite and a full pass promotes the parent to integrated. A failure marks
//! only the parent and leaves the children as they are.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttemptOutcome, AuditAction, ComponentContract, ComponentId, ComponentStatus, FailureKind,
    ImplementationAttempt, Phase, TaskState, TestRun, TickOutcome,
};
use crate::domain::ports::{CapabilityError, ChildArtifact, CompositionReport, CompositionRequest};
use crate::services::dispatcher::{AttemptJob, UnitResult};
use crate::services::implementation::record_verdict;
use crate::services::lifecycle::TickContext;

/// Composition plus the harness verdict on its suite.
type Composed = Result<(CompositionReport, Result<TestRun, CapabilityError>), CapabilityError>;

/// Integrate `parents`, all from the same depth group.
pub(crate) async fn integrate(
    ctx: &mut TickContext<'_>,
    parents: Vec<ComponentId>,
) -> DomainResult<TickOutcome> {
    ctx.run.enter_phase(Phase::Integrate);
    let contracts = ctx.store.current_contracts(ctx.run.id).await?;

    let mut requests = Vec::with_capacity(parents.len());
    for id in &parents {
        let node = ctx
            .tree
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::ComponentNotFound(id.clone()))?;

        let mut children = Vec::with_capacity(node.children.len());
        for child in &node.children {
            let artifact = match ctx.run.task(child).and_then(|t| t.winner) {
                Some(winner) => ctx
                    .store
                    .get_attempt(winner)
                    .await?
                    .and_then(|attempt| attempt.artifact),
                None => None,
            };
            children.push(ChildArtifact {
                component_id: child.clone(),
                contract: contracts
                    .get(child)
                    .cloned()
                    .unwrap_or_else(|| ComponentContract::new(child.clone())),
                artifact,
            });
        }

        let attempt_id = Uuid::new_v4();
        let round = ctx.run.task(id).map_or(0, |t| t.round);
        let context = ctx
            .run
            .task(id)
            .and_then(|task| ctx.diagnoser.render(&node, task));
        requests.push(CompositionRequest {
            run_id: ctx.run.id,
            attempt_id,
            parent: contracts
                .get(id)
                .cloned()
                .unwrap_or_else(|| ComponentContract::new(id.clone()).sealed()),
            children,
            context,
            workspace: AttemptJob::workspace_for(
                &ctx.config.scheduling.workspace_root,
                ctx.run.id,
                id,
                attempt_id,
            ),
            round,
        });

        ctx.tree.set_status(id, ComponentStatus::Integrating)?;
        ctx.run.task_mut(id).state = TaskState::Running;
        tracing::info!(run_id = %ctx.run.id, component_id = %id, round, "Dispatching composition");
        let entry = ctx
            .entry(Phase::Integrate, AuditAction::Dispatch, format!("composition, round {round}"))
            .component(id.clone());
        ctx.record(entry);
    }
    ctx.checkpoint().await?;

    let backend = ctx.backend.clone();
    let harness = ctx.harness.clone();
    let results = ctx
        .dispatcher
        .fan_out(requests.clone(), move |request: CompositionRequest| {
            let backend = backend.clone();
            let harness = harness.clone();
            async move {
                tokio::fs::create_dir_all(&request.workspace)
                    .await
                    .map_err(|e| CapabilityError::new(format!("workspace: {e}")))?;
                let workspace = request.workspace.clone();
                let report = backend.compose(request).await?;
                let tests = harness
                    .run_suite(&workspace, &report.artifact, &report.suite)
                    .await;
                Ok::<_, CapabilityError>((report, tests))
            }
        })
        .await?;

    let mut integrated = Vec::new();
    let mut failed = Vec::new();
    for (request, result) in requests.into_iter().zip(results) {
        let id = request.parent.component_id.clone();
        let Some(attempt) = to_attempt(ctx, &request, &id, result) else {
            ctx.tree.set_status(&id, ComponentStatus::Validated)?;
            ctx.run.task_mut(&id).state = TaskState::Queued;
            continue;
        };
        let passed = attempt.outcome == AttemptOutcome::Passed;
        let attempt_id = attempt.id;
        let total = attempt.tests.total();
        let all_timed_out = attempt.outcome.is_timeout();
        let summary = attempt.failure_summary();
        ctx.record_attempt(Phase::Integrate, attempt);

        if passed {
            ctx.tree.set_status(&id, ComponentStatus::Integrated)?;
            let task = ctx.run.task_mut(&id);
            task.state = TaskState::Completed;
            task.winner = Some(attempt_id);
            tracing::info!(component_id = %id, attempt_id = %attempt_id, "Parent integrated");
            let entry = ctx
                .entry(
                    Phase::Integrate,
                    AuditAction::Integrate,
                    format!("integration suite passed ({total} tests)"),
                )
                .component(id.clone());
            ctx.record(entry);
            integrated.push(id);
        } else {
            ctx.tree.set_status(&id, ComponentStatus::Failed)?;
            let verdict = ctx.diagnoser.register_failed_round(
                &id,
                ctx.run.task_mut(&id),
                FailureKind::GlueBug,
                all_timed_out,
                summary,
            );
            record_verdict(ctx, Phase::Integrate, &id, &verdict);
            failed.push(id);
        }
    }

    let mut summary = Vec::new();
    if !integrated.is_empty() {
        summary.push(format!("integrated {}", integrated.join(", ")));
    }
    if !failed.is_empty() {
        summary.push(format!("integration failed for {}", failed.join(", ")));
    }
    if summary.is_empty() {
        summary.push("stop requested before dispatch".to_string());
    }
    Ok(TickOutcome::progressed(Phase::Integrate, summary.join("; ")))
}

fn to_attempt(
    ctx: &mut TickContext<'_>,
    request: &CompositionRequest,
    id: &str,
    result: UnitResult<Composed>,
) -> Option<ImplementationAttempt> {
    let mut attempt = ImplementationAttempt {
        id: request.attempt_id,
        component_id: id.to_string(),
        contract_version: request.parent.version.clone(),
        agent: ctx.backend.name().to_string(),
        artifact: None,
        tests: TestRun::default(),
        cost_usd: 0.0,
        duration_ms: 0,
        outcome: AttemptOutcome::TestFailure,
        submission_order: 0,
        round: request.round,
        notes: None,
        recorded_at: Utc::now(),
    };

    match result {
        UnitResult::Skipped => return None,
        UnitResult::Finished(Ok((report, tests))) => {
            attempt.agent = report.agent;
            attempt.artifact = Some(report.artifact);
            attempt.cost_usd = report.cost_usd;
            attempt.duration_ms = report.duration_ms;
            attempt.notes = report.notes;
            match tests {
                Ok(tests) => {
                    if tests.all_passed() {
                        attempt.outcome = AttemptOutcome::Passed;
                    }
                    attempt.tests = tests;
                }
                Err(err) => {
                    attempt.outcome = AttemptOutcome::InvocationFailure {
                        message: format!("test harness: {}", err.message),
                    };
                }
            }
        }
        UnitResult::Finished(Err(err)) => {
            attempt.cost_usd = err.cost_usd;
            attempt.duration_ms = err.duration_ms;
            attempt.outcome = AttemptOutcome::InvocationFailure {
                message: err.message,
            };
        }
        UnitResult::TimedOut { elapsed_ms } => {
            attempt.cost_usd = ctx.config.budget.per_call_estimate_usd;
            attempt.duration_ms = elapsed_ms;
            attempt.outcome = AttemptOutcome::Timeout;
        }
        UnitResult::Crashed(message) => {
            attempt.outcome = AttemptOutcome::InvocationFailure { message };
        }
    }
    attempt.submission_order = ctx.run.take_submission();
    Some(attempt)
}
