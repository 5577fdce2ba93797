//! Systemic failure detection.
//!
//! When at least `systemic_threshold` components fail the same way in one
//! tick, the run pauses with the shared pattern instead of entering
//! diagnosis for each of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::models::{AttemptOutcome, ComponentId, ImplementationAttempt};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "detail", rename_all = "snake_case")]
pub enum SystemicPattern {
    /// No test was collected at all.
    ZeroTests,
    /// Collection errors and no passing test.
    ImportError,
    /// The same first failure message everywhere.
    IdenticalFailure(String),
}

impl SystemicPattern {
    pub fn describe(&self) -> String {
        match self {
            Self::ZeroTests => "zero_tests".to_string(),
            Self::ImportError => "import_error".to_string(),
            Self::IdenticalFailure(message) => format!("identical_failure ({message})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemicFailure {
    pub pattern: SystemicPattern,
    pub components: Vec<ComponentId>,
}

/// Pattern of one component's failed round, if it has one.
fn classify(attempts: &[ImplementationAttempt]) -> Option<SystemicPattern> {
    let mut failed: Vec<&ImplementationAttempt> = attempts
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::TestFailure)
        .collect();
    if failed.is_empty() {
        return None;
    }
    failed.sort_by_key(|a| a.submission_order);

    if failed
        .iter()
        .all(|a| a.tests.total() == 0 && a.tests.errors.is_empty())
    {
        return Some(SystemicPattern::ZeroTests);
    }
    if failed
        .iter()
        .all(|a| !a.tests.errors.is_empty() && a.tests.passed() == 0)
    {
        return Some(SystemicPattern::ImportError);
    }
    failed
        .first()
        .and_then(|a| a.tests.first_failure_message())
        .map(SystemicPattern::IdenticalFailure)
}

/// Find a pattern shared by at least `threshold` of the failed components.
///
/// `failures` holds, per component that failed this tick, the attempts of
/// the failed round. A threshold below two disables detection.
pub fn detect(
    failures: &[(ComponentId, Vec<ImplementationAttempt>)],
    threshold: usize,
) -> Option<SystemicFailure> {
    if threshold < 2 {
        return None;
    }
    let mut groups: BTreeMap<SystemicPattern, Vec<ComponentId>> = BTreeMap::new();
    for (component_id, attempts) in failures {
        if let Some(pattern) = classify(attempts) {
            groups.entry(pattern).or_default().push(component_id.clone());
        }
    }

    let mut best: Option<(SystemicPattern, Vec<ComponentId>)> = None;
    for (pattern, mut components) in groups {
        if components.len() < threshold {
            continue;
        }
        components.sort();
        let larger = match &best {
            None => true,
            Some((_, current)) => components.len() > current.len(),
        };
        if larger {
            best = Some((pattern, components));
        }
    }
    best.map(|(pattern, components)| SystemicFailure {
        pattern,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ContractVersion, TestCaseResult, TestRun};
    use chrono::Utc;
    use uuid::Uuid;

    fn attempt(component: &str, tests: TestRun, outcome: AttemptOutcome) -> ImplementationAttempt {
        ImplementationAttempt {
            id: Uuid::new_v4(),
            component_id: component.into(),
            contract_version: ContractVersion::from("v"),
            agent: "mock".into(),
            artifact: None,
            tests,
            cost_usd: 0.0,
            duration_ms: 0,
            outcome,
            submission_order: 0,
            round: 0,
            notes: None,
            recorded_at: Utc::now(),
        }
    }

    fn failure(component: &str, tests: TestRun) -> (ComponentId, Vec<ImplementationAttempt>) {
        (
            component.to_string(),
            vec![attempt(component, tests, AttemptOutcome::TestFailure)],
        )
    }

    #[test]
    fn test_zero_tests_pattern() {
        let failures = vec![
            failure("a", TestRun::default()),
            failure("b", TestRun::default()),
            failure("c", TestRun::default()),
        ];
        let found = detect(&failures, 3).unwrap();
        assert_eq!(found.pattern, SystemicPattern::ZeroTests);
        assert_eq!(found.components, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_import_error_pattern() {
        let broken = TestRun {
            results: vec![],
            errors: vec!["ModuleNotFoundError: shared".into()],
        };
        let failures = vec![
            failure("a", broken.clone()),
            failure("b", broken.clone()),
            failure("c", broken),
        ];
        assert_eq!(
            detect(&failures, 3).unwrap().pattern,
            SystemicPattern::ImportError
        );
    }

    #[test]
    fn test_identical_failure_pattern() {
        let run = |msg: &str| TestRun {
            results: vec![TestCaseResult::fail("t", msg)],
            errors: vec![],
        };
        let failures = vec![
            failure("a", run("linker not found")),
            failure("b", run("linker not found")),
            failure("c", run("assertion failed")),
        ];
        assert!(detect(&failures, 3).is_none());
        let found = detect(&failures, 2).unwrap();
        assert_eq!(
            found.pattern,
            SystemicPattern::IdenticalFailure("linker not found".into())
        );
        assert_eq!(found.components, vec!["a", "b"]);
    }

    #[test]
    fn test_timeouts_are_not_systemic() {
        let failures: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|c| {
                (
                    (*c).to_string(),
                    vec![attempt(c, TestRun::default(), AttemptOutcome::Timeout)],
                )
            })
            .collect();
        assert!(detect(&failures, 3).is_none());
    }
}
