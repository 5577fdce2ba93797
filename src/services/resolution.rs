//! Resolution engine: ranks the attempts of one component and picks a winner.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{AttemptOutcome, ImplementationAttempt, ScoredAttempt};

/// Ranked attempts, preferred first, with the winner flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub ranked: Vec<ScoredAttempt>,
}

impl Resolution {
    pub fn winner(&self) -> Option<&ScoredAttempt> {
        self.ranked.iter().find(|s| s.winner)
    }

    pub fn winner_id(&self) -> Option<Uuid> {
        self.winner().map(|s| s.attempt.id)
    }

    /// Human-readable account of the decision, one line per attempt.
    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> String {
        if self.ranked.is_empty() {
            return "no attempts recorded".to_string();
        }
        let mut lines = Vec::with_capacity(self.ranked.len() + 1);
        lines.push(match self.winner() {
            Some(w) => format!("winner {} from {}", w.attempt.id, w.attempt.agent),
            None => "no attempt passed every test; no winner".to_string(),
        });
        for scored in &self.ranked {
            let a = &scored.attempt;
            lines.push(format!(
                "{} #{} {} {}/{} passed, {:.1}s, ${:.2}, {}",
                if scored.winner { "*" } else { "-" },
                a.submission_order,
                a.agent,
                a.tests.passed(),
                a.tests.total(),
                a.duration_ms as f64 / 1000.0,
                a.cost_usd,
                a.outcome.as_str(),
            ));
        }
        lines.join("\n")
    }
}

/// Whether an attempt may win at all.
fn eligible(attempt: &ImplementationAttempt) -> bool {
    attempt.outcome == AttemptOutcome::Passed && attempt.pass_rate() >= 1.0
}

/// Score every attempt and pick the winner.
///
/// Order of preference: higher pass rate, lower duration, lower cost, earlier
/// submission. The attempt id settles exact ties so the outcome never depends
/// on input order. Only an attempt that passed every test can win.
pub fn resolve(attempts: &[ImplementationAttempt]) -> Resolution {
    let mut ranked: Vec<ScoredAttempt> = attempts
        .iter()
        .map(|attempt| ScoredAttempt {
            score: attempt.score(),
            attempt: attempt.clone(),
            winner: false,
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.score
            .cmp(&b.score)
            .then_with(|| a.attempt.id.cmp(&b.attempt.id))
    });

    if let Some(best) = ranked.iter_mut().find(|s| eligible(&s.attempt)) {
        best.winner = true;
    }
    Resolution { ranked }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ContractVersion, TestCaseResult, TestRun};
    use chrono::Utc;

    fn attempt(passed: usize, total: usize, duration_ms: u64, order: u64) -> ImplementationAttempt {
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
            agent: "mock".into(),
            artifact: Some("artifact".into()),
            outcome: if tests.all_passed() {
                AttemptOutcome::Passed
            } else {
                AttemptOutcome::TestFailure
            },
            tests,
            cost_usd: 0.1,
            duration_ms,
            submission_order: order,
            round: 0,
            notes: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_competitive_winner_is_fastest_full_pass() {
        let attempts = vec![
            attempt(5, 5, 12_000, 0),
            attempt(5, 5, 9_000, 1),
            attempt(4, 5, 5_000, 2),
        ];
        let resolution = resolve(&attempts);
        assert_eq!(resolution.winner_id(), Some(attempts[1].id));
        assert_eq!(resolution.ranked.len(), 3);
        assert!(resolution.summary().starts_with("winner"));
    }

    #[test]
    fn test_no_winner_below_full_pass() {
        let attempts = vec![attempt(4, 5, 1_000, 0), attempt(0, 5, 500, 1)];
        let resolution = resolve(&attempts);
        assert!(resolution.winner().is_none());
        assert!(resolution.summary().contains("no winner"));
    }

    #[test]
    fn test_timeout_never_wins() {
        let mut timed_out = attempt(5, 5, 100, 0);
        timed_out.outcome = AttemptOutcome::Timeout;
        let passing = attempt(5, 5, 9_000, 1);
        let resolution = resolve(&[timed_out, passing.clone()]);
        assert_eq!(resolution.winner_id(), Some(passing.id));
    }

    #[test]
    fn test_identical_scores_fall_back_to_submission_order() {
        let first = attempt(3, 3, 1_000, 7);
        let second = attempt(3, 3, 1_000, 8);
        let resolution = resolve(&[second, first.clone()]);
        assert_eq!(resolution.winner_id(), Some(first.id));
    }

    #[test]
    fn test_empty_input() {
        let resolution = resolve(&[]);
        assert!(resolution.winner().is_none());
        assert_eq!(resolution.summary(), "no attempts recorded");
    }
}
