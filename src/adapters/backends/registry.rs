//! Backend selection by configured kind.

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BackendConfig, BackendKind};
use crate::domain::ports::{AgentBackend, TestHarness};

use super::command::CommandBackend;
use super::mock::MockBackend;

/// A backend together with the harness that runs its composition suites.
#[derive(Clone)]
pub struct BackendPair {
    pub backend: Arc<dyn AgentBackend>,
    pub harness: Arc<dyn TestHarness>,
}

impl BackendPair {
    /// Use one value for both roles.
    pub fn from_shared<B>(shared: Arc<B>) -> Self
    where
        B: AgentBackend + TestHarness + 'static,
    {
        Self {
            backend: shared.clone(),
            harness: shared,
        }
    }
}

pub struct BackendRegistry {
    config: BackendConfig,
}

impl BackendRegistry {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn create_by_kind(&self, kind: BackendKind) -> DomainResult<BackendPair> {
        let pair = match kind {
            BackendKind::Mock => BackendPair::from_shared(Arc::new(MockBackend::new())),
            BackendKind::Command => {
                BackendPair::from_shared(Arc::new(CommandBackend::new(self.config.command.clone())?))
            }
        };
        tracing::debug!(backend = pair.backend.name(), "Agent backend selected");
        Ok(pair)
    }

    /// Backend named by the configuration.
    pub fn create(&self) -> DomainResult<BackendPair> {
        self.create_by_kind(self.config.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CommandBackendConfig;

    #[test]
    fn test_selects_configured_backend() {
        let registry = BackendRegistry::new(BackendConfig::default());
        assert_eq!(registry.create().unwrap().backend.name(), "mock");

        let registry = BackendRegistry::new(BackendConfig {
            kind: BackendKind::Command,
            command: CommandBackendConfig {
                program: "pact-agent".to_string(),
                ..CommandBackendConfig::default()
            },
        });
        assert_eq!(registry.create().unwrap().backend.name(), "command");
    }

    #[test]
    fn test_command_without_program_is_rejected() {
        let registry = BackendRegistry::new(BackendConfig::default());
        assert!(registry.create_by_kind(BackendKind::Command).is_err());
    }
}
