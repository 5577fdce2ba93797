//! Error taxonomy for the pact orchestrator.
//!
//! Validation issues block phase transitions, execution errors are recorded
//! per attempt, resource errors pause the run and terminal errors block the
//! dependents of a single component.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::Phase;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Whether a validation issue blocks progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A single finding of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("Contract for '{component_id}' references unknown component '{missing_id}'")]
    UnresolvedReference {
        component_id: String,
        missing_id: String,
    },

    #[error("Dependency cycle detected: {}", format_cycle_path(.path))]
    CycleDetected { path: Vec<String> },

    #[error("Component '{component_id}' has {count} children, allowed range is {min}..={max}")]
    ComponentCountOutOfRange {
        component_id: String,
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("Test '{test_name}' for '{component_id}' is malformed: {reason}")]
    MalformedTest {
        component_id: String,
        test_name: String,
        reason: String,
    },

    #[error("Test '{test_name}' for '{component_id}' exercises '{signature}' which is not in the contract")]
    SignatureMismatch {
        component_id: String,
        test_name: String,
        signature: String,
    },

    #[error("Component '{component_id}' has no contract")]
    MissingContract { component_id: String },

    #[error("Component '{component_id}' has no test suite")]
    MissingTestSuite { component_id: String },

    #[error("Test suite for '{component_id}' targets contract version {suite_version}, current is {contract_version}")]
    StaleTestSuite {
        component_id: String,
        suite_version: String,
        contract_version: String,
    },

    #[error("Contract for '{component_id}' declares '{dependency_id}' which is not a graph dependency")]
    WiderContractDependencies {
        component_id: String,
        dependency_id: String,
    },

    #[error("Component '{component_id}' depends on unknown component '{missing_id}'")]
    MissingDependency {
        component_id: String,
        missing_id: String,
    },

    #[error("Component '{component_id}' is not reachable from the root")]
    OrphanedComponent { component_id: String },

    #[error("Contract for '{component_id}' declares no functions")]
    EmptyContract { component_id: String },
}

impl ValidationIssue {
    /// Errors block the Validate gate; warnings are recorded only.
    pub fn severity(&self) -> Severity {
        match self {
            Self::EmptyContract { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// The component the issue is attributed to, if any.
    pub fn component_id(&self) -> Option<&str> {
        match self {
            Self::CycleDetected { path } => path.first().map(String::as_str),
            Self::UnresolvedReference { component_id, .. }
            | Self::ComponentCountOutOfRange { component_id, .. }
            | Self::MalformedTest { component_id, .. }
            | Self::SignatureMismatch { component_id, .. }
            | Self::MissingContract { component_id }
            | Self::MissingTestSuite { component_id }
            | Self::StaleTestSuite { component_id, .. }
            | Self::WiderContractDependencies { component_id, .. }
            | Self::MissingDependency { component_id, .. }
            | Self::OrphanedComponent { component_id }
            | Self::EmptyContract { component_id } => Some(component_id),
        }
    }

    /// Short machine-readable tag, matching the serialized `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedReference { .. } => "unresolved_reference",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::ComponentCountOutOfRange { .. } => "component_count_out_of_range",
            Self::MalformedTest { .. } => "malformed_test",
            Self::SignatureMismatch { .. } => "signature_mismatch",
            Self::MissingContract { .. } => "missing_contract",
            Self::MissingTestSuite { .. } => "missing_test_suite",
            Self::StaleTestSuite { .. } => "stale_test_suite",
            Self::WiderContractDependencies { .. } => "wider_contract_dependencies",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::OrphanedComponent { .. } => "orphaned_component",
            Self::EmptyContract { .. } => "empty_contract",
        }
    }
}

/// Failures of a single agent invocation. Recorded, never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("Agent timed out after {seconds}s on '{component_id}'")]
    AgentTimeout { component_id: String, seconds: u64 },

    #[error("Agent invocation failed on '{component_id}': {message}")]
    AgentInvocationFailure {
        component_id: String,
        message: String,
    },

    #[error("Attempt for '{component_id}' passed {passed}/{total} tests")]
    AttemptTestFailure {
        component_id: String,
        passed: usize,
        total: usize,
    },
}

/// Resource exhaustion. Pauses the run in place.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceError {
    #[error("Budget exceeded: spent ${spend:.2}, projected ${projected:.2}, cap ${cap:.2}")]
    BudgetExceeded { spend: f64, projected: f64, cap: f64 },

    #[error("Phase budget exceeded for {phase}: spent ${spend:.2}, projected ${projected:.2}, cap ${cap:.2}")]
    PhaseBudgetExceeded {
        phase: Phase,
        spend: f64,
        projected: f64,
        cap: f64,
    },
}

/// Component-level terminal failure. Blocks dependents only.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalError {
    #[error("Diagnosis exhausted for '{component_id}' after {rounds} failed rounds")]
    DiagnosisExhausted { component_id: String, rounds: u32 },
}

/// Infrastructure-level errors surfaced by ports, adapters and services.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Invalid decomposition tree: {0}")]
    InvalidTree(String),

    #[error("Dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid budget cap: {0}")]
    InvalidBudget(f64),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
