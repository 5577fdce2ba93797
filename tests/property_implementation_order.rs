//! Property tests over whole runs on generated dependency graphs.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{tree_with_dependencies, Harness};
use pact::adapters::backends::Capability;
use pact::domain::models::{
    ComponentNode, ComponentStatus, DecompositionTree, RunStatus, TaskState,
};
use pact::domain::ports::RunStore;
use pact::services::{plan, Orchestrator, TickPlan};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Leaf ids `c0..cN` and dependency pairs pointing from a higher index onto
/// a lower one, so the graph stays acyclic.
fn graph_strategy() -> impl Strategy<Value = (Vec<String>, Vec<(String, String)>)> {
    (2usize..6, prop::collection::vec((0usize..6, 0usize..6), 0..8)).prop_map(|(leaves, pairs)| {
        let ids: Vec<String> = (0..leaves).map(|i| format!("c{i}")).collect();
        let mut edges: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(a, b)| (a.max(b) % leaves, a.min(b) % leaves))
            .filter(|(hi, lo)| hi != lo)
            .map(|(hi, lo)| (format!("c{hi}"), format!("c{lo}")))
            .collect();
        edges.sort();
        edges.dedup();
        (ids, edges)
    })
}

/// Root groups `gI`, each either a leaf or a parent of leaves `gI_J`, plus
/// dependency edges between any two non-root nodes. Nodes are numbered in
/// post-order and edges only point onto a lower number, so children always
/// precede their parent and no edge can close a cycle. Edges may land on a
/// parent, which then has to be integrated before its dependent starts.
fn nested_strategy() -> impl Strategy<Value = DecompositionTree> {
    (
        prop::collection::vec(0usize..4, 2..5),
        prop::collection::vec((0usize..16, 0usize..16), 0..10),
    )
        .prop_map(|(groups, pairs)| {
            let mut tree = DecompositionTree::new(ComponentNode::new("root", "root"));
            let mut order: Vec<String> = Vec::new();
            for (g, &width) in groups.iter().enumerate() {
                let group = format!("g{g}");
                tree.insert_child("root", ComponentNode::new(&group, &group))
                    .unwrap();
                // A single child would be out of range, so widths 0 and 1 stay leaves
                if width >= 2 {
                    for c in 0..width {
                        let child = format!("g{g}_{c}");
                        tree.insert_child(&group, ComponentNode::new(&child, &child))
                            .unwrap();
                        order.push(child);
                    }
                }
                order.push(group);
            }

            for (a, b) in pairs {
                let (hi, lo) = (a.max(b) % order.len(), a.min(b) % order.len());
                if hi == lo {
                    continue;
                }
                let (dependent, dependency) = (&order[hi], &order[lo]);
                if tree.get(dependency).and_then(|n| n.parent_id.as_deref())
                    == Some(dependent.as_str())
                {
                    continue;
                }
                tree.get_mut(dependent)
                    .unwrap()
                    .dependencies
                    .insert(dependency.clone());
            }
            tree
        })
}

/// Prerequisites a unit needs a winner for: declared dependencies, and the
/// children of a parent.
fn prerequisites(tree: &DecompositionTree, id: &str) -> Vec<String> {
    let node = tree.get(id).unwrap();
    node.dependencies
        .iter()
        .chain(node.children.iter())
        .cloned()
        .collect()
}

/// Tick to the end, asserting before every tick that each unit the tick
/// dispatches has a recorded winner for all of its prerequisites.
async fn drive_checking_winners(
    harness: &Harness,
    orchestrator: &Orchestrator,
    run_id: Uuid,
    max_ticks: usize,
) {
    let mut seen = [(Capability::Implement, 0usize), (Capability::Compose, 0)];
    for _ in 0..max_ticks {
        let before = orchestrator.status(run_id).await.unwrap();
        let outcome = orchestrator.tick(run_id).await.unwrap();

        for (capability, count) in &mut seen {
            let calls = harness.backend.calls(*capability).await;
            for call in &calls[*count..] {
                for prereq in prerequisites(&before.tree, &call.component_id) {
                    let won = before.run.task(&prereq).and_then(|t| t.winner);
                    assert!(
                        won.is_some(),
                        "{} dispatched before {prereq} had a winner",
                        call.component_id
                    );
                    assert!(before
                        .tree
                        .status_of(&prereq)
                        .is_some_and(ComponentStatus::has_artifact));
                }
            }
            *count = calls.len();
        }
        if !outcome.is_progressed() {
            break;
        }
    }
}

/// Every node ends with a winner that is a stored attempt of that node.
async fn assert_completed_with_winners(harness: &Harness, run_id: Uuid) {
    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);
    for id in snapshot.tree.nodes.keys() {
        let winner = snapshot.run.task(id).and_then(|t| t.winner);
        let winner = winner.unwrap_or_else(|| panic!("{id} has no winner"));
        let attempt = harness.store.get_attempt(winner).await.unwrap().unwrap();
        assert_eq!(&attempt.component_id, id);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: a dependent's first implementation call happens in a later
    /// tick than its dependency's
    #[test]
    fn prop_dependencies_implement_first((ids, edges) in graph_strategy(), parallel in any::<bool>()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let harness = Harness::new(|config| {
                config.scheduling.parallel_components = parallel;
                config.scheduling.max_concurrent_agents = 3;
            })
            .await;
            let leaf_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let edge_refs: Vec<(&str, &str)> =
                edges.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
            let run_id = harness
                .init(tree_with_dependencies("root", &leaf_refs, &edge_refs))
                .await;

            let mut first_tick: BTreeMap<String, usize> = BTreeMap::new();
            for tick in 0..60 {
                let outcome = harness.orchestrator.tick(run_id).await.unwrap();
                for call in harness.backend.calls(Capability::Implement).await {
                    first_tick.entry(call.component_id).or_insert(tick);
                }
                if !outcome.is_progressed() {
                    break;
                }
            }

            for (dependent, dependency) in &edges {
                assert!(
                    first_tick[dependency] < first_tick[dependent],
                    "{dependent} implemented no later than {dependency}"
                );
            }
            assert_completed_with_winners(&harness, run_id).await;
        });
    }

    /// Property: on nested trees with dependencies onto parents, no unit is
    /// implemented or composed before its prerequisites have winners
    #[test]
    fn prop_nested_prerequisites_have_winners(tree in nested_strategy(), parallel in any::<bool>()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let harness = Harness::new(|config| {
                config.scheduling.parallel_components = parallel;
                config.scheduling.max_concurrent_agents = 4;
            })
            .await;
            let run_id = harness.init(tree).await;

            drive_checking_winners(&harness, &harness.orchestrator, run_id, 120).await;
            assert_completed_with_winners(&harness, run_id).await;
        });
    }

    /// Property: a run killed after marking units in flight, then resumed by a
    /// fresh orchestrator, still honours prerequisites and completes
    #[test]
    fn prop_resume_after_interrupted_tick(
        tree in nested_strategy(),
        crash_after in 3usize..20,
        parallel in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let harness = Harness::new(|config| {
                config.scheduling.parallel_components = parallel;
                config.scheduling.max_concurrent_agents = 4;
            })
            .await;
            let config = harness.orchestrator.config().clone();
            let run_id = harness.init(tree).await;

            for _ in 0..crash_after {
                if !harness.orchestrator.tick(run_id).await.unwrap().is_progressed() {
                    break;
                }
            }

            // Persist the in-flight marks a tick writes before dispatching
            let (mut run, mut tree) = harness.store.load_run(run_id).await.unwrap().unwrap();
            let in_flight: Vec<(String, ComponentStatus)> = match plan(&run, &tree, &config) {
                TickPlan::Implement { units } => units
                    .into_iter()
                    .map(|u| (u.component_id, ComponentStatus::Implementing))
                    .collect(),
                TickPlan::Integrate { parents } => parents
                    .into_iter()
                    .map(|p| (p, ComponentStatus::Integrating))
                    .collect(),
                _ => Vec::new(),
            };
            for (id, status) in &in_flight {
                tree.set_status(id, *status).unwrap();
                run.task_mut(id).state = TaskState::Running;
            }
            harness.store.commit_tick(&run, &tree, &[]).await.unwrap();

            let resumed = Orchestrator::new(
                harness.store.clone() as Arc<dyn RunStore>,
                harness.backend.clone(),
                harness.backend.clone(),
                config,
                CancellationToken::new(),
            );
            drive_checking_winners(&harness, &resumed, run_id, 120).await;
            assert_completed_with_winners(&harness, run_id).await;
        });
    }
}
