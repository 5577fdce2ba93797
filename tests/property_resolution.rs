//! Property tests for winner selection.

use chrono::Utc;
use pact::domain::models::{
    AttemptOutcome, ContractVersion, ImplementationAttempt, TestCaseResult, TestRun,
};
use pact::services::resolve;
use proptest::prelude::*;
use uuid::Uuid;

fn attempt(passed: usize, total: usize, duration_ms: u64, cents: u32, order: u64) -> ImplementationAttempt {
    let results = (0..total)
        .map(|i| {
            if i < passed {
                TestCaseResult::pass(format!("t{i}"))
            } else {
                TestCaseResult::fail(format!("t{i}"), "wrong")
            }
        })
        .collect();
    let tests = TestRun {
        results,
        errors: vec![],
    };
    ImplementationAttempt {
        id: Uuid::new_v4(),
        component_id: "x".into(),
        contract_version: ContractVersion::from("v1"),
        agent: format!("agent-{order}"),
        artifact: Some(format!("artifact-{order}")),
        outcome: if tests.all_passed() {
            AttemptOutcome::Passed
        } else {
            AttemptOutcome::TestFailure
        },
        tests,
        cost_usd: f64::from(cents) / 100.0,
        duration_ms,
        submission_order: order,
        round: 0,
        notes: None,
        recorded_at: Utc::now(),
    }
}

fn attempts_strategy() -> impl Strategy<Value = Vec<ImplementationAttempt>> {
    prop::collection::vec((0usize..=4, 1usize..=4, 1u64..20_000, 0u32..500), 1..8).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (passed, total, duration, cents))| {
                    attempt(passed.min(total), total, duration, cents, i as u64)
                })
                .collect()
        },
    )
}

proptest! {
    /// Property: a winner exists exactly when some attempt passed every test
    #[test]
    fn prop_winner_iff_full_pass(attempts in attempts_strategy()) {
        let resolution = resolve(&attempts);
        let any_full = attempts.iter().any(|a| a.tests.all_passed());
        prop_assert_eq!(resolution.winner().is_some(), any_full);
        prop_assert_eq!(resolution.ranked.iter().filter(|s| s.winner).count(), usize::from(any_full));
    }

    /// Property: the winner is never beaten by another full pass on
    /// duration, then cost, then submission order
    #[test]
    fn prop_winner_is_best_full_pass(attempts in attempts_strategy()) {
        let resolution = resolve(&attempts);
        if let Some(winner) = resolution.winner() {
            let w = &winner.attempt;
            for other in attempts.iter().filter(|a| a.tests.all_passed() && a.id != w.id) {
                let key = |a: &ImplementationAttempt| (a.duration_ms, (a.cost_usd * 100.0).round() as i64, a.submission_order);
                prop_assert!(key(w) < key(other));
            }
        }
    }

    /// Property: input order does not change the decision
    #[test]
    fn prop_resolution_ignores_input_order(attempts in attempts_strategy()) {
        let forward = resolve(&attempts);
        let mut reversed = attempts.clone();
        reversed.reverse();
        let backward = resolve(&reversed);
        prop_assert_eq!(forward.winner_id(), backward.winner_id());
        let ids = |r: &pact::services::Resolution| r.ranked.iter().map(|s| s.attempt.id).collect::<Vec<_>>();
        prop_assert_eq!(ids(&forward), ids(&backward));
    }

    /// Property: ranking never places a lower pass rate ahead of a higher one
    #[test]
    fn prop_ranking_is_monotone_in_pass_rate(attempts in attempts_strategy()) {
        let resolution = resolve(&attempts);
        for pair in resolution.ranked.windows(2) {
            prop_assert!(pair[0].score.pass_rate >= pair[1].score.pass_rate);
        }
    }
}
