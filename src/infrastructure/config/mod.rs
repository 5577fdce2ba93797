//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Programmatic defaults
//! - Project YAML files under `.pact/`
//! - Environment variable overrides
//! - Range validation

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
