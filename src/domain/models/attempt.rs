//! Implementation attempts and their scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::component::ComponentId;
use super::contract::ContractVersion;
use crate::domain::errors::ExecutionError;

/// Captured inputs and outputs of a failing assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoTrace {
    pub function: String,
    #[serde(default)]
    pub inputs: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
}

impl IoTrace {
    pub fn render(&self) -> String {
        format!(
            "{}({}) expected {} but got {}",
            self.function, self.inputs, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub trace: Option<IoTrace>,
}

impl TestCaseResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            trace: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            trace: None,
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: IoTrace) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Outcome of running a test suite against an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    #[serde(default)]
    pub results: Vec<TestCaseResult>,
    /// Collection or import errors that prevented tests from running.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl TestRun {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    /// Fraction of passing cases; an empty run scores zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.passed() as f64 / self.total() as f64
        }
    }

    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.errors.is_empty() && self.passed() == self.total()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestCaseResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Message of the first failing case or the first collection error.
    pub fn first_failure_message(&self) -> Option<String> {
        self.failures()
            .find_map(|r| r.message.clone())
            .or_else(|| self.errors.first().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Passed,
    TestFailure,
    Timeout,
    InvocationFailure { message: String },
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::TestFailure => "test_failure",
            Self::Timeout => "timeout",
            Self::InvocationFailure { .. } => "invocation_failure",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// One recorded implementation of a component. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationAttempt {
    pub id: Uuid,
    pub component_id: ComponentId,
    pub contract_version: ContractVersion,
    pub agent: String,
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub tests: TestRun,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    /// Global monotonically increasing order of recording within a run.
    pub submission_order: u64,
    /// Diagnosis round this attempt belongs to, starting at zero.
    pub round: u32,
    #[serde(default)]
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ImplementationAttempt {
    pub fn pass_rate(&self) -> f64 {
        match self.outcome {
            AttemptOutcome::Timeout | AttemptOutcome::InvocationFailure { .. } => 0.0,
            _ => self.tests.pass_rate(),
        }
    }

    pub fn score(&self) -> ScoreTuple {
        ScoreTuple {
            pass_rate: self.pass_rate(),
            duration_ms: self.duration_ms,
            cost_usd: self.cost_usd,
            submission_order: self.submission_order,
        }
    }

    /// The typed execution failure of this attempt, if it failed.
    pub fn execution_error(&self) -> Option<ExecutionError> {
        let component_id = self.component_id.clone();
        match &self.outcome {
            AttemptOutcome::Passed => None,
            AttemptOutcome::Timeout => Some(ExecutionError::AgentTimeout {
                component_id,
                seconds: self.duration_ms / 1000,
            }),
            AttemptOutcome::InvocationFailure { message } => {
                Some(ExecutionError::AgentInvocationFailure {
                    component_id,
                    message: message.clone(),
                })
            }
            AttemptOutcome::TestFailure => Some(ExecutionError::AttemptTestFailure {
                component_id,
                passed: self.tests.passed(),
                total: self.tests.total(),
            }),
        }
    }

    /// Short failure description for context bundles and audit entries.
    pub fn failure_summary(&self) -> String {
        match &self.outcome {
            AttemptOutcome::Passed => "passed".to_string(),
            AttemptOutcome::Timeout => "timed out".to_string(),
            AttemptOutcome::InvocationFailure { message } => format!("invocation failed: {message}"),
            AttemptOutcome::TestFailure => {
                let first = self
                    .tests
                    .first_failure_message()
                    .unwrap_or_else(|| "no detail".to_string());
                format!(
                    "{}/{} tests passed; first failure: {}",
                    self.tests.passed(),
                    self.tests.total(),
                    first
                )
            }
        }
    }
}

/// Ranking key of an attempt; `Ord` sorts the preferred attempt first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTuple {
    pub pass_rate: f64,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub submission_order: u64,
}

impl Eq for ScoreTuple {}

impl Ord for ScoreTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .pass_rate
            .total_cmp(&self.pass_rate)
            .then_with(|| self.duration_ms.cmp(&other.duration_ms))
            .then_with(|| self.cost_usd.total_cmp(&other.cost_usd))
            .then_with(|| self.submission_order.cmp(&other.submission_order))
    }
}

impl PartialOrd for ScoreTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAttempt {
    pub attempt: ImplementationAttempt,
    pub score: ScoreTuple,
    pub winner: bool,
}
