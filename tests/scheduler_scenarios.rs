//! End-to-end runs of the orchestrator against the scripted backend.

mod common;

use std::time::Duration;

use common::{single_leaf, tree_with_dependencies, tree_with_leaves, Harness};
use pact::adapters::backends::{default_contract, Capability, MockBackend, ScriptedAttempt};
use pact::domain::errors::{TerminalError, ValidationIssue};
use pact::domain::models::{
    BlockReason, ComponentStatus, FailureReason, PauseReason, Phase, PhaseStatus, RunStatus,
    TickOutcome,
};
use pact::domain::ports::RunStore;

fn last(outcomes: &[TickOutcome]) -> &TickOutcome {
    outcomes.last().expect("no tick executed")
}

#[tokio::test]
async fn test_parallel_leaves_dispatch_together_before_integration() {
    let harness = Harness::new(|config| {
        config.scheduling.parallel_components = true;
        config.scheduling.max_concurrent_agents = 2;
    })
    .await;
    for leaf in ["a", "b"] {
        harness
            .backend
            .script_implementations(
                leaf,
                [ScriptedAttempt::passing().with_delay(Duration::from_millis(100))],
            )
            .await;
    }
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;

    let outcomes = harness.drive(run_id, 50).await;

    assert_eq!(
        last(&outcomes),
        &TickOutcome::BlockedWaiting {
            reason: BlockReason::RunComplete
        }
    );
    assert_eq!(harness.backend.peak_concurrency(), 2);

    let implement_ticks: Vec<&TickOutcome> = outcomes
        .iter()
        .filter(|o| matches!(o, TickOutcome::Progressed { phase: Phase::Implement, .. }))
        .collect();
    assert_eq!(implement_ticks.len(), 1, "both leaves should share one tick");

    let invocations = harness.backend.invocations().await;
    let last_implement = invocations
        .iter()
        .rposition(|i| i.capability == Capability::Implement)
        .unwrap();
    let first_compose = invocations
        .iter()
        .position(|i| i.capability == Capability::Compose)
        .unwrap();
    assert!(last_implement < first_compose);

    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert_eq!(snapshot.tree.status_of("root"), Some(ComponentStatus::Integrated));
    assert_eq!(snapshot.tree.status_of("a"), Some(ComponentStatus::Implemented));
}

#[tokio::test]
async fn test_competitive_winner_is_fastest_full_pass() {
    let harness = Harness::new(|config| {
        config.scheduling.competitive_implementations = true;
        config.scheduling.competitive_agents = 3;
    })
    .await;
    harness
        .backend
        .script_implementations(
            "x",
            [
                ScriptedAttempt::passing().with_duration(12_000),
                ScriptedAttempt::passing().with_duration(9_000),
                ScriptedAttempt::partial(4, 5).with_duration(5_000),
            ],
        )
        .await;
    let run_id = harness.init(single_leaf("x")).await;

    let outcomes = harness.drive(run_id, 20).await;
    assert_eq!(
        last(&outcomes),
        &TickOutcome::BlockedWaiting {
            reason: BlockReason::RunComplete
        }
    );

    let attempts = harness.store.attempts_for(run_id, "x").await.unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(harness.backend.calls(Capability::Implement).await.len(), 3);

    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    let winner_id = snapshot.run.task("x").unwrap().winner.unwrap();
    let winner = harness.store.get_attempt(winner_id).await.unwrap().unwrap();
    assert_eq!(winner.duration_ms, 9_000);
    assert!((winner.tests.pass_rate() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_budget_gate_pauses_before_dispatch() {
    let harness = Harness::new(|config| {
        config.budget.per_call_estimate_usd = 1.0;
    })
    .await;
    let run_id = harness
        .orchestrator
        .init_run("budgeted", tree_with_leaves("root", &["a", "b"]), Some(25.0))
        .await
        .unwrap()
        .id;

    let (mut run, tree) = harness.store.load_run(run_id).await.unwrap().unwrap();
    run.spend_usd = 24.5;
    harness.store.commit_tick(&run, &tree, &[]).await.unwrap();

    let outcome = harness.orchestrator.tick(run_id).await.unwrap();
    match outcome {
        TickOutcome::Paused {
            reason: PauseReason::BudgetExceeded { spend, cap, .. },
        } => {
            assert!((spend - 24.5).abs() < 1e-9);
            assert!((cap - 25.0).abs() < 1e-9);
        }
        other => panic!("expected budget pause, got {other:?}"),
    }
    assert!(harness.backend.invocations().await.is_empty());
    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Paused);

    // Raising the cap lets the next tick dispatch again
    harness.orchestrator.set_budget(run_id, 30.0).await.unwrap();
    let outcome = harness.orchestrator.tick(run_id).await.unwrap();
    assert!(outcome.is_progressed(), "{outcome:?}");
    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Active);
    assert!(snapshot.run.pause_reason.is_none());
}

#[tokio::test]
async fn test_exhausted_component_fails_run_and_blocks_dependents() {
    let harness = Harness::new(|config| {
        config.scheduling.competitive_implementations = true;
        config.scheduling.competitive_agents = 3;
        config.diagnosis.max_retries = 2;
    })
    .await;
    harness
        .backend
        .set_fallback("y", ScriptedAttempt::failing("y: expected 4, got 5"))
        .await;
    let tree = tree_with_dependencies("root", &["y", "w"], &[("w", "y")]);
    let run_id = harness.init(tree).await;

    let outcomes = harness.drive(run_id, 50).await;

    match last(&outcomes) {
        TickOutcome::Failed {
            reason: FailureReason::DiagnosisExhausted { exhausted },
        } => {
            assert_eq!(
                exhausted,
                &vec![TerminalError::DiagnosisExhausted {
                    component_id: "y".to_string(),
                    rounds: 2,
                }]
            );
        }
        other => panic!("expected diagnosis exhaustion, got {other:?}"),
    }

    let y_calls = harness.backend.calls(Capability::Implement).await;
    assert_eq!(y_calls.len(), 6);
    assert!(y_calls.iter().all(|c| c.component_id == "y"));
    assert!(y_calls.iter().filter(|c| c.round == 0).all(|c| !c.had_context));
    assert!(y_calls.iter().filter(|c| c.round == 1).all(|c| c.had_context));

    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Failed);
    assert_eq!(snapshot.tree.status_of("y"), Some(ComponentStatus::Failed));
    // After validation a component waits in Validated until it is dispatched,
    // so the dependent of an exhausted component is still pending here
    assert_eq!(snapshot.tree.status_of("w"), Some(ComponentStatus::Validated));
    assert!(snapshot.run.task("w").unwrap().winner.is_none());

    // Held: another tick reports the same failure without dispatching
    let again = harness.orchestrator.tick(run_id).await.unwrap();
    assert_eq!(&again, last(&outcomes));
    assert_eq!(harness.backend.calls(Capability::Implement).await.len(), 6);
}

#[tokio::test]
async fn test_unresolved_contract_reference_stops_at_validation() {
    let harness = Harness::new(|_| {}).await;
    let tree = tree_with_leaves("root", &["z", "other"]);
    let mut contract = default_contract(tree.get("z").unwrap());
    contract.dependencies.insert("ghost".to_string());
    harness.backend.script_contract("z", contract).await;
    let run_id = harness.init(tree).await;

    let outcomes = harness.drive(run_id, 50).await;

    match last(&outcomes) {
        TickOutcome::Failed {
            reason: FailureReason::Validation { issues },
        } => {
            assert!(issues.contains(&ValidationIssue::UnresolvedReference {
                component_id: "z".to_string(),
                missing_id: "ghost".to_string(),
            }));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(harness.backend.calls(Capability::Implement).await.is_empty());

    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert!(!snapshot.run.validation_passed);
    assert_eq!(snapshot.run.phase_status(Phase::Validate), PhaseStatus::Failed);
    assert_eq!(snapshot.run.phase_status(Phase::Implement), PhaseStatus::NotStarted);

    let report = harness.orchestrator.validate(run_id).await.unwrap();
    assert!(!report.passed());
}

#[tokio::test]
async fn test_systemic_failure_pauses_run() {
    let harness = Harness::new(|config| {
        config.scheduling.parallel_components = true;
        config.scheduling.max_concurrent_agents = 3;
    })
    .await;
    for leaf in ["a", "b", "c"] {
        harness
            .backend
            .set_fallback(leaf, ScriptedAttempt::failing("ModuleNotFoundError: shared"))
            .await;
    }
    let run_id = harness.init(tree_with_leaves("root", &["a", "b", "c"])).await;

    let outcomes = harness.drive(run_id, 50).await;

    match last(&outcomes) {
        TickOutcome::Paused {
            reason: PauseReason::SystemicFailure { components, .. },
        } => {
            assert_eq!(components, &vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        }
        other => panic!("expected systemic pause, got {other:?}"),
    }
    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Paused);
}

#[tokio::test]
async fn test_glue_failure_is_diagnosed_and_retried_without_touching_children() {
    let harness = Harness::new(|_| {}).await;
    harness
        .backend
        .script_compositions(
            "root",
            [ScriptedAttempt::failing("root: adapter returned None"), ScriptedAttempt::passing()],
        )
        .await;
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;

    let outcomes = harness.drive(run_id, 50).await;

    assert_eq!(
        last(&outcomes),
        &TickOutcome::BlockedWaiting {
            reason: BlockReason::RunComplete
        }
    );
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, TickOutcome::Progressed { phase: Phase::Diagnose, .. })));

    let compose = harness.backend.calls(Capability::Compose).await;
    assert_eq!(compose.len(), 2);
    assert!(!compose[0].had_context);
    assert!(compose[1].had_context);
    assert_eq!(harness.backend.calls(Capability::Implement).await.len(), 2);
}

#[tokio::test]
async fn test_plan_only_halts_after_validation_but_allows_targeted_build() {
    let harness = Harness::new(|config| {
        config.scheduling.plan_only = true;
    })
    .await;
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;
    harness.drive_through_validation(run_id).await;

    let outcome = harness.orchestrator.tick(run_id).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::BlockedWaiting {
            reason: BlockReason::PlanOnly
        }
    );

    let blocked = harness.orchestrator.build(run_id, "root").await.unwrap();
    assert!(matches!(
        blocked,
        TickOutcome::BlockedWaiting {
            reason: BlockReason::WaitingOnDependencies { .. }
        }
    ));

    let built = harness.orchestrator.build(run_id, "a").await.unwrap();
    assert!(built.is_progressed(), "{built:?}");
    let snapshot = harness.orchestrator.status(run_id).await.unwrap();
    assert_eq!(snapshot.tree.status_of("a"), Some(ComponentStatus::Implemented));
    assert_eq!(snapshot.tree.status_of("b"), Some(ComponentStatus::Validated));
}

#[tokio::test]
async fn test_targeted_build_of_unknown_component_is_an_error() {
    let harness = Harness::new(|_| {}).await;
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;
    assert!(harness.orchestrator.build(run_id, "ghost").await.is_err());
}

#[tokio::test]
async fn test_stop_request_prevents_new_dispatch() {
    let harness = Harness::new(|_| {}).await;
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;
    harness.cancel.cancel();

    let outcome = harness.orchestrator.tick(run_id).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::BlockedWaiting {
            reason: BlockReason::Stopped
        }
    );
    assert!(harness.backend.invocations().await.is_empty());
}

#[tokio::test]
async fn test_operator_pause_holds_until_resume() {
    let harness = Harness::new(|_| {}).await;
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;

    let paused = harness
        .orchestrator
        .pause(run_id, Some("lunch".to_string()))
        .await
        .unwrap();
    assert!(matches!(paused, TickOutcome::Paused { .. }));
    let held = harness.orchestrator.tick(run_id).await.unwrap();
    assert_eq!(
        held,
        TickOutcome::Paused {
            reason: PauseReason::Operator {
                note: Some("lunch".to_string())
            }
        }
    );
    assert!(harness.backend.invocations().await.is_empty());

    assert!(harness.orchestrator.resume(run_id).await.unwrap().is_progressed());
    assert!(harness.orchestrator.tick(run_id).await.unwrap().is_progressed());
}

#[tokio::test]
async fn test_authoring_failures_exhaust_the_run() {
    let harness = Harness::with_backend(MockBackend::new(), |config| {
        config.diagnosis.max_retries = 2;
    })
    .await;
    for _ in 0..2 {
        harness.backend.script_contract_error("a", "model refused").await;
    }
    let run_id = harness.init(tree_with_leaves("root", &["a", "b"])).await;

    let outcomes = harness.drive(run_id, 20).await;

    match last(&outcomes) {
        TickOutcome::Failed {
            reason: FailureReason::AuthoringExhausted { component_id, stage, message },
        } => {
            assert_eq!(component_id, "a");
            assert_eq!(*stage, Phase::Contract);
            assert_eq!(message, "model refused");
        }
        other => panic!("expected authoring exhaustion, got {other:?}"),
    }
    let retried = harness.backend.calls(Capability::AuthorContract).await;
    assert!(retried.iter().filter(|c| c.component_id == "a").nth(1).unwrap().had_context);
}

#[tokio::test]
async fn test_audit_log_records_the_decision_trail() {
    let harness = Harness::new(|_| {}).await;
    let run_id = harness.init(single_leaf("x")).await;
    harness.drive(run_id, 20).await;

    let entries = harness.orchestrator.audit(run_id, None).await.unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    for expected in ["init", "author_contract", "author_tests", "validate", "dispatch", "promote", "complete"] {
        assert!(actions.contains(&expected), "missing {expected} in {actions:?}");
    }
    let seqs: Vec<i64> = entries.iter().filter_map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let tail = harness.orchestrator.audit(run_id, Some(1)).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].action.as_str(), "complete");
}
