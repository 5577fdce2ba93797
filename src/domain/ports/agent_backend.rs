//! Agent backend port - the four black-box capabilities the orchestrator
//! dispatches work to, plus the harness that executes test suites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{
    ComponentContract, ComponentId, ComponentNode, ContractTestSuite, TestRun,
};

/// Failure of a capability invocation.
///
/// Cost and duration are reported even when the invocation fails.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cost_usd: 0.0,
            duration_ms: 0,
        }
    }

    #[must_use]
    pub fn with_cost(mut self, cost_usd: f64, duration_ms: u64) -> Self {
        self.cost_usd = cost_usd;
        self.duration_ms = duration_ms;
        self
    }
}

/// Output of an authoring capability with what it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authored<T> {
    pub value: T,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Task context handed to contract authoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRequest {
    pub run_id: Uuid,
    pub task: String,
    pub component: ComponentNode,
    /// Contracts of the component's dependencies, ascending by id.
    pub dependency_contracts: Vec<ComponentContract>,
    /// Error from a previous authoring attempt, if any.
    pub prior_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRequest {
    pub run_id: Uuid,
    pub contract: ComponentContract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationRequest {
    pub run_id: Uuid,
    pub attempt_id: Uuid,
    pub contract: ComponentContract,
    pub suite: ContractTestSuite,
    /// Rendered narrative context from earlier failed rounds.
    pub context: Option<String>,
    /// Isolated directory owned by this attempt alone.
    pub workspace: PathBuf,
    pub round: u32,
    /// Index of this attempt among the competitive slots.
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationReport {
    pub agent: String,
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub tests: TestRun,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// Research or plan notes the agent produced.
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildArtifact {
    pub component_id: ComponentId,
    pub contract: ComponentContract,
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionRequest {
    pub run_id: Uuid,
    pub attempt_id: Uuid,
    pub parent: ComponentContract,
    pub children: Vec<ChildArtifact>,
    pub context: Option<String>,
    pub workspace: PathBuf,
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionReport {
    pub agent: String,
    pub artifact: String,
    /// Parent-scoped test suite to run against the composed artifact.
    pub suite: ContractTestSuite,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Polymorphic agent backend, one method per capability.
///
/// Implementations are selected by configuration and never inspected at
/// runtime.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Backend name used in configuration and logs.
    fn name(&self) -> &'static str;

    async fn author_contract(
        &self,
        request: ContractRequest,
    ) -> Result<Authored<ComponentContract>, CapabilityError>;

    async fn author_tests(
        &self,
        request: TestRequest,
    ) -> Result<Authored<ContractTestSuite>, CapabilityError>;

    async fn implement(
        &self,
        request: ImplementationRequest,
    ) -> Result<ImplementationReport, CapabilityError>;

    async fn compose(
        &self,
        request: CompositionRequest,
    ) -> Result<CompositionReport, CapabilityError>;
}

/// Executes a test suite against an artifact inside a workspace.
#[async_trait]
pub trait TestHarness: Send + Sync {
    async fn run_suite(
        &self,
        workspace: &Path,
        artifact: &str,
        suite: &ContractTestSuite,
    ) -> Result<TestRun, CapabilityError>;
}
