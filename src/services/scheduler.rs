//! Casual-pace scheduler: the pure decision half of a tick.
//!
//! [`plan`] looks only at the persisted run record, the tree snapshot and the
//! configuration. The same inputs always yield the same [`TickPlan`], so a run
//! reloaded from storage makes exactly the decision it would have made had the
//! process never stopped. Execution of the plan lives in the lifecycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult, TerminalError, ValidationIssue};
use crate::domain::models::{
    BlockReason, ComponentId, ComponentStatus, Config, DecompositionTree, FailureReason,
    PauseReason, Phase, RunState, RunStatus, TickOutcome,
};
use crate::services::budget_gate::{Admission, BudgetGate};
use crate::services::dependency_graph::DependencyGraph;

/// Implementation work for one component in one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchUnit {
    pub component_id: ComponentId,
    /// Independent attempts; more than one in competitive mode.
    pub slots: usize,
    pub round: u32,
}

/// What the next tick will do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum TickPlan {
    /// Nothing to execute; report this outcome as is.
    Halted { outcome: TickOutcome },
    Pause { reason: PauseReason },
    Block { reason: BlockReason },
    AuthorContracts { components: Vec<ComponentId> },
    AuthorTests { components: Vec<ComponentId> },
    /// Re-author contract and tests of one component before validation.
    Reauthor { component_id: ComponentId },
    Validate,
    Implement { units: Vec<DispatchUnit> },
    Integrate { parents: Vec<ComponentId> },
    Diagnose { components: Vec<ComponentId> },
    Complete,
    Fail { reason: FailureReason },
}

impl TickPlan {
    /// Paid invocations per unit, in unit order.
    pub fn paid_calls(&self) -> Vec<usize> {
        match self {
            Self::AuthorContracts { components } | Self::AuthorTests { components } => {
                vec![1; components.len()]
            }
            Self::Reauthor { .. } => vec![2],
            Self::Implement { units } => units.iter().map(|u| u.slots).collect(),
            Self::Integrate { parents } => vec![1; parents.len()],
            _ => Vec::new(),
        }
    }

    /// Keep the first `n` units.
    fn truncate(&mut self, n: usize) {
        match self {
            Self::AuthorContracts { components } | Self::AuthorTests { components } => {
                components.truncate(n);
            }
            Self::Implement { units } => units.truncate(n),
            Self::Integrate { parents } => parents.truncate(n),
            _ => {}
        }
    }

    /// Phase the plan acts in, for reporting.
    pub fn phase(&self, run: &RunState) -> Phase {
        match self {
            Self::AuthorContracts { .. } | Self::Reauthor { .. } => Phase::Contract,
            Self::AuthorTests { .. } => Phase::Test,
            Self::Validate => Phase::Validate,
            Self::Implement { .. } => Phase::Implement,
            Self::Integrate { .. } => Phase::Integrate,
            Self::Diagnose { .. } => Phase::Diagnose,
            _ => run.phase,
        }
    }
}

/// Outcome to report for a run already in a terminal or held state, if any.
pub fn held_outcome(run: &RunState) -> Option<TickOutcome> {
    match run.status {
        RunStatus::Completed => Some(TickOutcome::BlockedWaiting {
            reason: BlockReason::RunComplete,
        }),
        RunStatus::Failed => Some(TickOutcome::Failed {
            reason: run.failure.clone().unwrap_or_else(|| exhausted_reason(run)),
        }),
        RunStatus::Paused => match &run.pause_reason {
            // Budget pauses are re-checked by the gate every tick
            Some(reason) if reason.is_budget() => None,
            Some(reason) => Some(TickOutcome::Paused {
                reason: reason.clone(),
            }),
            None => Some(TickOutcome::Paused {
                reason: PauseReason::Operator { note: None },
            }),
        },
        RunStatus::Active => None,
    }
}

fn exhausted_reason(run: &RunState) -> FailureReason {
    FailureReason::DiagnosisExhausted {
        exhausted: run
            .tasks
            .iter()
            .filter(|(_, t)| t.exhausted)
            .map(|(id, t)| TerminalError::DiagnosisExhausted {
                component_id: id.clone(),
                rounds: t.rounds_failed + t.timeout_rounds,
            })
            .collect(),
    }
}

/// Sort ids by (depth, id).
fn by_depth(mut ids: Vec<ComponentId>, depths: &BTreeMap<ComponentId, usize>) -> Vec<ComponentId> {
    ids.sort_by(|a, b| {
        let da = depths.get(a).copied().unwrap_or(0);
        let db = depths.get(b).copied().unwrap_or(0);
        da.cmp(&db).then_with(|| a.cmp(b))
    });
    ids
}

/// Apply the budget gate to a paid plan.
fn gate(mut proposal: TickPlan, run: &RunState, config: &Config) -> TickPlan {
    let calls = proposal.paid_calls();
    if calls.is_empty() {
        return proposal;
    }
    match BudgetGate::new(run, &config.budget, proposal.phase(run)).admit(&calls) {
        Admission::Denied(reason) => TickPlan::Pause { reason },
        Admission::Admitted { units, .. } => {
            proposal.truncate(units);
            proposal
        }
    }
}

/// Decide what the next natural tick does.
pub fn plan(run: &RunState, tree: &DecompositionTree, config: &Config) -> TickPlan {
    if let Some(outcome) = held_outcome(run) {
        return TickPlan::Halted { outcome };
    }

    let graph = DependencyGraph::new(tree);
    let depths = match graph.depths() {
        Ok(depths) => depths,
        Err(DomainError::DependencyCycle(path)) => {
            return TickPlan::Fail {
                reason: FailureReason::Validation {
                    issues: vec![ValidationIssue::CycleDetected { path }],
                },
            }
        }
        Err(_) => BTreeMap::new(),
    };

    let proposal = if run.validation_passed {
        plan_post_validation(run, &graph, &depths, config)
    } else {
        plan_pre_validation(run, &graph, &depths, config)
    };
    gate(proposal, run, config)
}

fn plan_pre_validation(
    run: &RunState,
    graph: &DependencyGraph<'_>,
    depths: &BTreeMap<ComponentId, usize>,
    config: &Config,
) -> TickPlan {
    let tree = graph.tree();
    let per_tick = config.scheduling.units_per_tick();
    let max_failures = config.diagnosis.max_retries;

    let authoring_exhausted = |stage: Phase, ids: &[ComponentId]| {
        ids.iter().find_map(|id| {
            let task = run.task(id)?;
            (task.authoring_failures >= max_failures).then(|| TickPlan::Fail {
                reason: FailureReason::AuthoringExhausted {
                    component_id: id.clone(),
                    stage,
                    message: task.last_error.clone().unwrap_or_default(),
                },
            })
        })
    };

    let pending: Vec<ComponentId> = tree
        .nodes
        .values()
        .filter(|n| n.status == ComponentStatus::Pending)
        .map(|n| n.id.clone())
        .collect();
    if !pending.is_empty() {
        if let Some(fail) = authoring_exhausted(Phase::Contract, &pending) {
            return fail;
        }
        let ready: Vec<ComponentId> = graph
            .ready(ComponentStatus::Contracted, ComponentStatus::Contracted)
            .into_iter()
            .filter(|id| pending.contains(id))
            .collect();
        if ready.is_empty() {
            return TickPlan::Block {
                reason: BlockReason::NothingReady { blocked: pending },
            };
        }
        let mut components = by_depth(ready, depths);
        components.truncate(per_tick);
        return TickPlan::AuthorContracts { components };
    }

    let contracted: Vec<ComponentId> = tree
        .nodes
        .values()
        .filter(|n| n.status == ComponentStatus::Contracted)
        .map(|n| n.id.clone())
        .collect();
    if !contracted.is_empty() {
        if let Some(fail) = authoring_exhausted(Phase::Test, &contracted) {
            return fail;
        }
        let mut components = by_depth(contracted, depths);
        components.truncate(per_tick);
        return TickPlan::AuthorTests { components };
    }

    TickPlan::Validate
}

/// Prerequisites of `id` (its declared dependencies, plus its children when
/// `with_children`) that lack a settled artifact or a recorded winner.
fn missing_winners(
    run: &RunState,
    graph: &DependencyGraph<'_>,
    id: &str,
    with_children: bool,
) -> Vec<ComponentId> {
    let Some(node) = graph.tree().get(id) else {
        return Vec::new();
    };
    let children: &[ComponentId] = if with_children { &node.children } else { &[] };
    node.dependencies
        .iter()
        .chain(children)
        .filter(|prereq| {
            let settled = graph
                .tree()
                .status_of(prereq)
                .is_some_and(ComponentStatus::has_artifact);
            let won = run.task(prereq).is_some_and(|t| t.winner.is_some());
            !(settled && won)
        })
        .cloned()
        .collect()
}

/// Leaves that may enter Implement now.
fn implementable(run: &RunState, graph: &DependencyGraph<'_>) -> Vec<ComponentId> {
    graph
        .leaves()
        .into_iter()
        .filter(|id| {
            let status = graph.tree().status_of(id);
            matches!(
                status,
                Some(ComponentStatus::Validated | ComponentStatus::Implementing)
            )
        })
        .filter(|id| {
            run.task(id)
                .is_none_or(|t| !t.exhausted && t.awaiting_diagnosis.is_none())
        })
        .filter(|id| missing_winners(run, graph, id, false).is_empty())
        .collect()
}

/// Parents whose children and dependencies all have winners.
fn integrable(run: &RunState, graph: &DependencyGraph<'_>) -> Vec<ComponentId> {
    graph
        .tree()
        .nodes
        .values()
        .filter(|n| !n.is_leaf())
        .filter(|n| {
            matches!(
                n.status,
                ComponentStatus::Validated | ComponentStatus::Integrating
            )
        })
        .filter(|n| {
            run.task(&n.id)
                .is_none_or(|t| !t.exhausted && t.awaiting_diagnosis.is_none())
        })
        .filter(|n| missing_winners(run, graph, &n.id, true).is_empty())
        .map(|n| n.id.clone())
        .collect()
}

fn dispatch_units(
    run: &RunState,
    ids: Vec<ComponentId>,
    config: &Config,
) -> Vec<DispatchUnit> {
    ids.into_iter()
        .map(|component_id| DispatchUnit {
            round: run.task(&component_id).map_or(0, |t| t.round),
            slots: config.scheduling.slots_per_component(),
            component_id,
        })
        .collect()
}

fn plan_post_validation(
    run: &RunState,
    graph: &DependencyGraph<'_>,
    depths: &BTreeMap<ComponentId, usize>,
    config: &Config,
) -> TickPlan {
    let tree = graph.tree();
    let per_tick = config.scheduling.units_per_tick();

    let awaiting = run.awaiting_diagnosis();
    if !awaiting.is_empty() {
        return TickPlan::Diagnose {
            components: awaiting,
        };
    }

    if config.scheduling.plan_only {
        return TickPlan::Block {
            reason: BlockReason::PlanOnly,
        };
    }

    let ready = implementable(run, graph);
    if !ready.is_empty() {
        let mut ids = by_depth(ready, depths);
        ids.truncate(per_tick);
        return TickPlan::Implement {
            units: dispatch_units(run, ids, config),
        };
    }

    let eligible = integrable(run, graph);
    if !eligible.is_empty() {
        let lowest = eligible
            .iter()
            .filter_map(|id| depths.get(id))
            .min()
            .copied()
            .unwrap_or(0);
        let mut parents: Vec<ComponentId> = eligible
            .into_iter()
            .filter(|id| depths.get(id).copied().unwrap_or(0) == lowest)
            .collect();
        parents.sort();
        parents.truncate(per_tick);
        return TickPlan::Integrate { parents };
    }

    if tree
        .root()
        .is_some_and(|root| root.status.has_artifact())
    {
        return TickPlan::Complete;
    }

    if run.tasks.values().any(|t| t.exhausted) {
        return TickPlan::Fail {
            reason: exhausted_reason(run),
        };
    }

    let blocked: Vec<ComponentId> = tree
        .nodes
        .values()
        .filter(|n| !n.status.has_artifact())
        .map(|n| n.id.clone())
        .collect();
    TickPlan::Block {
        reason: BlockReason::NothingReady { blocked },
    }
}

/// Decide what a targeted build of `component_id` does.
///
/// Before validation passes the component's contract and tests are
/// re-authored. Afterwards a leaf re-enters Implement and a parent re-enters
/// Integrate, provided its own dependencies are satisfied. Global phase
/// ordering and `plan_only` are bypassed.
pub fn plan_targeted(
    run: &RunState,
    tree: &DecompositionTree,
    config: &Config,
    component_id: &str,
) -> DomainResult<TickPlan> {
    let node = tree
        .get(component_id)
        .ok_or_else(|| DomainError::ComponentNotFound(component_id.to_string()))?;

    if let Some(outcome) = held_outcome(run) {
        if !matches!(run.status, RunStatus::Failed) {
            return Ok(TickPlan::Halted { outcome });
        }
    }

    let graph = DependencyGraph::new(tree);

    if !run.validation_passed {
        let blocked_by = graph.unsatisfied_dependencies(component_id, ComponentStatus::Contracted);
        if !blocked_by.is_empty() {
            return Ok(TickPlan::Block {
                reason: BlockReason::WaitingOnDependencies {
                    component_id: component_id.to_string(),
                    blocked_by,
                },
            });
        }
        return Ok(gate(
            TickPlan::Reauthor {
                component_id: component_id.to_string(),
            },
            run,
            config,
        ));
    }

    let blocked_by = missing_winners(run, &graph, component_id, !node.is_leaf());
    if !blocked_by.is_empty() {
        return Ok(TickPlan::Block {
            reason: BlockReason::WaitingOnDependencies {
                component_id: component_id.to_string(),
                blocked_by,
            },
        });
    }

    let proposal = if node.is_leaf() {
        TickPlan::Implement {
            units: dispatch_units(run, vec![component_id.to_string()], config),
        }
    } else {
        TickPlan::Integrate {
            parents: vec![component_id.to_string()],
        }
    };
    Ok(gate(proposal, run, config))
}
