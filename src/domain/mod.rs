//! Domain layer for the pact orchestrator
//!
//! Plain data models, the error taxonomy, and the ports through which the core
//! reaches agents and durable storage.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    DomainError, DomainResult, ExecutionError, ResourceError, Severity, TerminalError,
    ValidationIssue,
};
