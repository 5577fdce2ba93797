//! Implement phase: dispatch attempts, record them, resolve winners.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AuditAction, ComponentContract, ComponentId, ComponentStatus, ContractTestSuite, FailureKind,
    ImplementationAttempt, PauseReason, Phase, TaskRecord, TaskState, TickOutcome,
};
use crate::services::diagnoser::FailureVerdict;
use crate::services::dispatcher::AttemptJob;
use crate::services::lifecycle::TickContext;
use crate::services::resolution;
use crate::services::scheduler::DispatchUnit;
use crate::services::systemic;

/// Run one Implement tick over `units`.
///
/// Returns the tick outcome and, when several components failed the same
/// way, the pause the run should enter instead.
pub(crate) async fn implement(
    ctx: &mut TickContext<'_>,
    units: Vec<DispatchUnit>,
) -> DomainResult<(TickOutcome, Option<PauseReason>)> {
    ctx.run.enter_phase(Phase::Implement);
    let contracts = ctx.store.current_contracts(ctx.run.id).await?;
    let suites = ctx.store.current_suites(ctx.run.id).await?;

    let mut jobs = Vec::new();
    let mut versions = BTreeMap::new();
    for unit in &units {
        let id = &unit.component_id;
        let contract = contracts
            .get(id)
            .cloned()
            .unwrap_or_else(|| ComponentContract::new(id.clone()).sealed());
        let suite = suites.get(id).cloned().unwrap_or_else(|| ContractTestSuite {
            component_id: id.clone(),
            contract_version: contract.version.clone(),
            language: String::new(),
            cases: Vec::new(),
        });
        let context = match (ctx.tree.get(id), ctx.run.task(id)) {
            (Some(node), Some(task)) => ctx.diagnoser.render(node, task),
            _ => None,
        };
        versions.insert(id.clone(), contract.version.clone());

        for slot in 0..unit.slots {
            let attempt_id = Uuid::new_v4();
            jobs.push(AttemptJob {
                run_id: ctx.run.id,
                attempt_id,
                component_id: id.clone(),
                contract: contract.clone(),
                suite: suite.clone(),
                context: context.clone(),
                workspace: AttemptJob::workspace_for(
                    &ctx.config.scheduling.workspace_root,
                    ctx.run.id,
                    id,
                    attempt_id,
                ),
                round: unit.round,
                slot,
            });
        }

        ctx.tree.set_status(id, ComponentStatus::Implementing)?;
        ctx.run.task_mut(id).state = TaskState::Running;
        tracing::info!(
            run_id = %ctx.run.id,
            component_id = %id,
            slots = unit.slots,
            round = unit.round,
            "Dispatching implementation attempts"
        );
        let entry = ctx
            .entry(
                Phase::Implement,
                AuditAction::Dispatch,
                format!("{} attempt(s), round {}", unit.slots, unit.round),
            )
            .component(id.clone());
        ctx.record(entry);
    }
    // Marks in-flight components so a crash mid-dispatch is visible
    ctx.checkpoint().await?;

    let results = ctx
        .dispatcher
        .run_attempts(ctx.backend.clone(), jobs)
        .await?;

    let timeout_charge = ctx.config.budget.per_call_estimate_usd;
    let backend_name = ctx.backend.name();
    let mut recorded: BTreeMap<ComponentId, usize> = BTreeMap::new();
    for (job, result) in results {
        let component_id = job.component_id.clone();
        let order = ctx.run.next_submission;
        let Some(attempt) = job.into_attempt(result, order, timeout_charge, backend_name) else {
            continue;
        };
        ctx.run.take_submission();
        tracing::debug!(
            component_id = %component_id,
            attempt_id = %attempt.id,
            outcome = attempt.outcome.as_str(),
            passed = attempt.tests.passed(),
            total = attempt.tests.total(),
            "Attempt recorded"
        );
        if let Some(err) = attempt.execution_error() {
            tracing::info!(attempt_id = %attempt.id, error = %err, "Attempt did not pass");
        }
        ctx.record_attempt(Phase::Implement, attempt);
        *recorded.entry(component_id).or_default() += 1;
    }

    let mut promoted = Vec::new();
    let mut failed = Vec::new();
    let mut failed_rounds: Vec<(ComponentId, Vec<ImplementationAttempt>)> = Vec::new();
    for unit in &units {
        let id = &unit.component_id;
        if recorded.get(id).copied().unwrap_or(0) == 0 {
            // Stop request arrived before any attempt started
            let previous = if ctx.run.task(id).and_then(|t| t.winner).is_some() {
                ComponentStatus::Implemented
            } else {
                ComponentStatus::Validated
            };
            ctx.tree.set_status(id, previous)?;
            ctx.run.task_mut(id).state = TaskState::Queued;
            continue;
        }

        let attempts: Vec<ImplementationAttempt> = ctx
            .attempts_for(id)
            .await?
            .into_iter()
            .filter(|a| Some(&a.contract_version) == versions.get(id))
            .collect();
        let resolution = resolution::resolve(&attempts);
        let entry = ctx
            .entry(Phase::Implement, AuditAction::Resolve, format!("{} attempt(s) ranked", attempts.len()))
            .component(id.clone())
            .detail(resolution.summary());
        ctx.record(entry);

        if let Some(winner) = resolution.winner() {
            let winner_id = winner.attempt.id;
            let agent = winner.attempt.agent.clone();
            ctx.tree.set_status(id, ComponentStatus::Implemented)?;
            let task = ctx.run.task_mut(id);
            task.state = TaskState::Completed;
            task.winner = Some(winner_id);
            tracing::info!(
                component_id = %id,
                winner = %winner_id,
                agent = %agent,
                "Winner promoted"
            );
            let entry = ctx
                .entry(Phase::Implement, AuditAction::Promote, format!("winner {winner_id}"))
                .component(id.clone())
                .detail(format!("from {agent}"));
            ctx.record(entry);
            promoted.push(id.clone());
            continue;
        }

        let round: Vec<ImplementationAttempt> = attempts
            .iter()
            .filter(|a| a.round == unit.round)
            .cloned()
            .collect();
        let all_timed_out = !round.is_empty() && round.iter().all(|a| a.outcome.is_timeout());
        let explanation = round
            .first()
            .map(ImplementationAttempt::failure_summary)
            .unwrap_or_else(|| "no attempt recorded".to_string());
        ctx.tree.set_status(id, ComponentStatus::Failed)?;
        let verdict = ctx.diagnoser.register_failed_round(
            id,
            ctx.run.task_mut(id),
            FailureKind::ImplementationBug,
            all_timed_out,
            explanation,
        );
        record_verdict(ctx, Phase::Implement, id, &verdict);
        failed.push(id.clone());
        failed_rounds.push((id.clone(), round));
    }

    let systemic = systemic::detect(&failed_rounds, ctx.config.diagnosis.systemic_threshold).map(
        |found| PauseReason::SystemicFailure {
            pattern: found.pattern.describe(),
            components: found.components,
        },
    );

    let mut summary = Vec::new();
    if !promoted.is_empty() {
        summary.push(format!("promoted {}", promoted.join(", ")));
    }
    if !failed.is_empty() {
        summary.push(format!("no winner for {}", failed.join(", ")));
    }
    if summary.is_empty() {
        summary.push("stop requested before dispatch".to_string());
    }
    Ok((
        TickOutcome::progressed(Phase::Implement, summary.join("; ")),
        systemic,
    ))
}

/// Log and audit the verdict on a failed round.
pub(crate) fn record_verdict(
    ctx: &mut TickContext<'_>,
    phase: Phase,
    component_id: &str,
    verdict: &FailureVerdict,
) {
    let entry = match verdict {
        FailureVerdict::Retry { rounds_failed } => {
            tracing::warn!(
                component_id,
                rounds_failed,
                "Round failed; awaiting diagnosis"
            );
            ctx.entry(
                phase,
                AuditAction::Resolve,
                format!("no winner; {rounds_failed} failed round(s)"),
            )
        }
        FailureVerdict::Exhausted(err) => {
            tracing::error!(component_id, error = %err, "Retries exhausted");
            ctx.entry(phase, AuditAction::Exhausted, err.to_string())
        }
    };
    let detail = ctx
        .run
        .task(component_id)
        .and_then(|t: &TaskRecord| t.failure_history.last())
        .map(|f| f.explanation.clone())
        .unwrap_or_default();
    ctx.record(entry.component(component_id).detail(detail));
}
