//! Pact - contract-first build orchestrator
//!
//! Pact drives a decomposition tree of components through contract
//! authoring, test authoring, mechanical validation, competitive
//! implementation, integration and diagnosis, one persisted tick at a time.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, errors and the ports the services depend on
//! - **Service Layer** (`services`): scheduling, validation, resolution and the lifecycle
//! - **Adapters** (`adapters`): `SQLite` run store and agent backends
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator commands
//!
//! # Example
//!
//! ```ignore
//! use pact::services::Orchestrator;
//!
//! let run = orchestrator.init_run("build a calculator", tree, None).await?;
//! while orchestrator.tick(run.id).await?.is_progressed() {}
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, DecompositionTree, Phase, RunState, RunStatus, TickOutcome, TreeDocument,
};
pub use domain::ports::{AgentBackend, RunStore, TestHarness};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Orchestrator, ValidationReport};
