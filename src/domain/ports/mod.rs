//! Port trait definitions (Hexagonal Architecture)
//!
//! - `AgentBackend`: contract, test, implementation and composition capabilities
//! - `TestHarness`: executes a suite against an artifact
//! - `RunStore`: durable run state, contracts, attempts and audit log

pub mod agent_backend;
pub mod run_store;

pub use agent_backend::{
    AgentBackend, Authored, CapabilityError, ChildArtifact, CompositionReport, CompositionRequest,
    ContractRequest, ImplementationReport, ImplementationRequest, TestHarness, TestRequest,
};
pub use run_store::{RunStore, RunSummary};
