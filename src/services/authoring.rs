//! Contract and Test phases.
//!
//! Contracts are authored once every dependency of a component has one, so
//! each request carries the dependency contracts it builds on. Test suites
//! follow per contracted component. Results are persisted after fan-in.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditAction, ComponentId, ComponentStatus, Phase, PhaseStatus, TickOutcome,
};
use crate::domain::ports::{Authored, CapabilityError, ContractRequest, TestRequest};
use crate::services::dispatcher::UnitResult;
use crate::services::lifecycle::TickContext;

type Authoring<T> = UnitResult<Result<Authored<T>, CapabilityError>>;

/// Author contracts for `components`, in the given order.
pub(crate) async fn author_contracts(
    ctx: &mut TickContext<'_>,
    components: Vec<ComponentId>,
) -> DomainResult<TickOutcome> {
    let contracts = ctx.store.current_contracts(ctx.run.id).await?;
    let mut requests = Vec::with_capacity(components.len());
    for id in &components {
        let node = ctx
            .tree
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::ComponentNotFound(id.clone()))?;
        let dependency_contracts = node
            .dependencies
            .iter()
            .filter_map(|dep| contracts.get(dep).cloned())
            .collect();
        requests.push(ContractRequest {
            run_id: ctx.run.id,
            task: ctx.run.task.clone(),
            component: node,
            dependency_contracts,
            prior_error: ctx.run.task(id).and_then(|t| t.last_error.clone()),
        });
    }

    let backend = ctx.backend.clone();
    let results = ctx
        .dispatcher
        .fan_out(requests, move |request| {
            let backend = backend.clone();
            async move { backend.author_contract(request).await }
        })
        .await?;

    let mut authored = Vec::new();
    let mut failed = Vec::new();
    for (id, result) in components.iter().zip(results) {
        match settle(ctx, Phase::Contract, id, result) {
            Some(mut contract) => {
                contract.component_id = id.clone();
                let contract = contract.sealed();
                ctx.store.save_contract(ctx.run.id, &contract).await?;
                ctx.tree.set_status(id, ComponentStatus::Contracted)?;
                ctx.run.task_mut(id).last_error = None;
                tracing::info!(
                    run_id = %ctx.run.id,
                    component_id = %id,
                    version = contract.version.short(),
                    "Contract authored"
                );
                let entry = ctx
                    .entry(
                        Phase::Contract,
                        AuditAction::AuthorContract,
                        format!("contract {}", contract.version.short()),
                    )
                    .component(id.clone())
                    .detail(format!("{} functions", contract.functions.len()));
                ctx.record(entry);
                authored.push(id.clone());
            }
            None => failed.push(id.clone()),
        }
    }

    let pending = ctx
        .tree
        .nodes
        .values()
        .any(|n| n.status == ComponentStatus::Pending);
    if !pending && ctx.run.phase == Phase::Contract {
        ctx.run.set_phase_status(Phase::Contract, PhaseStatus::Completed);
        ctx.run.enter_phase(Phase::Test);
    }
    Ok(TickOutcome::progressed(
        Phase::Contract,
        summarize("contracted", &authored, &failed),
    ))
}

/// Author test suites for contracted `components`.
pub(crate) async fn author_tests(
    ctx: &mut TickContext<'_>,
    components: Vec<ComponentId>,
) -> DomainResult<TickOutcome> {
    let contracts = ctx.store.current_contracts(ctx.run.id).await?;
    let mut requests = Vec::with_capacity(components.len());
    for id in &components {
        let contract = contracts
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::ComponentNotFound(format!("contract of '{id}'")))?;
        requests.push(TestRequest {
            run_id: ctx.run.id,
            contract,
        });
    }

    let backend = ctx.backend.clone();
    let results = ctx
        .dispatcher
        .fan_out(requests, move |request| {
            let backend = backend.clone();
            async move { backend.author_tests(request).await }
        })
        .await?;

    let mut authored = Vec::new();
    let mut failed = Vec::new();
    for (id, result) in components.iter().zip(results) {
        match settle(ctx, Phase::Test, id, result) {
            Some(mut suite) => {
                suite.component_id = id.clone();
                if suite.contract_version.is_empty() {
                    if let Some(contract) = contracts.get(id) {
                        suite.contract_version = contract.version.clone();
                    }
                }
                ctx.store.save_suite(ctx.run.id, &suite).await?;
                ctx.tree.set_status(id, ComponentStatus::Tested)?;
                ctx.run.task_mut(id).last_error = None;
                tracing::info!(
                    run_id = %ctx.run.id,
                    component_id = %id,
                    cases = suite.len(),
                    "Test suite authored"
                );
                let entry = ctx
                    .entry(
                        Phase::Test,
                        AuditAction::AuthorTests,
                        format!("{} test case(s)", suite.len()),
                    )
                    .component(id.clone())
                    .detail(format!("against contract {}", suite.contract_version.short()));
                ctx.record(entry);
                authored.push(id.clone());
            }
            None => failed.push(id.clone()),
        }
    }

    let waiting = ctx.tree.nodes.values().any(|n| {
        matches!(
            n.status,
            ComponentStatus::Pending | ComponentStatus::Contracted
        )
    });
    if !waiting && ctx.run.phase == Phase::Test {
        ctx.run.set_phase_status(Phase::Test, PhaseStatus::Completed);
        ctx.run.enter_phase(Phase::Validate);
    }
    Ok(TickOutcome::progressed(
        Phase::Test,
        summarize("tested", &authored, &failed),
    ))
}

/// Re-author one component's contract and then its tests.
pub(crate) async fn reauthor(
    ctx: &mut TickContext<'_>,
    component_id: ComponentId,
) -> DomainResult<TickOutcome> {
    let contract_outcome = author_contracts(ctx, vec![component_id.clone()]).await?;
    if ctx.tree.status_of(&component_id) != Some(ComponentStatus::Contracted) {
        return Ok(contract_outcome);
    }
    author_tests(ctx, vec![component_id]).await
}

/// Charge the invocation and unwrap a successful result. Failures are
/// counted against the component and recorded.
fn settle<T>(
    ctx: &mut TickContext<'_>,
    phase: Phase,
    id: &str,
    result: Authoring<T>,
) -> Option<T> {
    let (cost, error) = match result {
        UnitResult::Finished(Ok(authored)) => {
            ctx.run.charge(phase, authored.cost_usd);
            return Some(authored.value);
        }
        UnitResult::Skipped => return None,
        UnitResult::Finished(Err(err)) => (err.cost_usd, err.message),
        UnitResult::TimedOut { elapsed_ms } => (
            ctx.config.budget.per_call_estimate_usd,
            format!("timed out after {elapsed_ms}ms"),
        ),
        UnitResult::Crashed(message) => (0.0, message),
    };

    ctx.run.charge(phase, cost);
    let task = ctx.run.task_mut(id);
    task.authoring_failures += 1;
    task.last_error = Some(error.clone());
    let failures = task.authoring_failures;
    tracing::warn!(
        component_id = %id,
        phase = %phase,
        failures,
        error = %error,
        "Authoring failed"
    );
    let action = if phase == Phase::Contract {
        AuditAction::AuthorContract
    } else {
        AuditAction::AuthorTests
    };
    let entry = ctx
        .entry(phase, action, format!("authoring failed ({failures})"))
        .component(id)
        .detail(error);
    ctx.record(entry);
    None
}

fn summarize(verb: &str, done: &[ComponentId], failed: &[ComponentId]) -> String {
    let mut parts = Vec::new();
    if !done.is_empty() {
        parts.push(format!("{verb} {}", done.join(", ")));
    }
    if !failed.is_empty() {
        parts.push(format!("failed {}", failed.join(", ")));
    }
    if parts.is_empty() {
        "stop requested before dispatch".to_string()
    } else {
        parts.join("; ")
    }
}
