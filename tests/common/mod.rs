//! Common test utilities for integration tests
//!
//! Provides tree builders, an in-memory store and an orchestrator wired to
//! the scripted backend.

#![allow(dead_code)]

use std::sync::Arc;

use pact::adapters::backends::MockBackend;
use pact::adapters::sqlite::{create_migrated_test_pool, SqliteRunStore};
use pact::domain::models::{ComponentNode, Config, DecompositionTree, TickOutcome};
use pact::domain::ports::RunStore;
use pact::services::Orchestrator;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Root with the given leaves as children.
pub fn tree_with_leaves(root: &str, leaves: &[&str]) -> DecompositionTree {
    let mut tree = DecompositionTree::new(ComponentNode::new(root, root));
    for leaf in leaves {
        tree.insert_child(root, ComponentNode::new(*leaf, *leaf))
            .expect("Failed to insert leaf");
    }
    tree
}

/// Root with leaves, where each `(dependent, dependency)` pair adds a
/// declared dependency.
pub fn tree_with_dependencies(
    root: &str,
    leaves: &[&str],
    edges: &[(&str, &str)],
) -> DecompositionTree {
    let mut tree = tree_with_leaves(root, leaves);
    for (dependent, dependency) in edges {
        tree.get_mut(dependent)
            .expect("Unknown dependent")
            .dependencies
            .insert((*dependency).to_string());
    }
    tree
}

/// Single-node tree; the root is also the only leaf.
pub fn single_leaf(id: &str) -> DecompositionTree {
    DecompositionTree::new(ComponentNode::new(id, id))
}

pub async fn test_store() -> Arc<SqliteRunStore> {
    let pool = create_migrated_test_pool()
        .await
        .expect("Failed to create test database");
    Arc::new(SqliteRunStore::new(pool))
}

/// Configuration with attempt workspaces under `workspace`.
pub fn test_config(workspace: &TempDir) -> Config {
    let mut config = Config::default();
    config.scheduling.workspace_root = workspace.path().to_path_buf();
    config.scheduling.attempt_timeout_secs = 30;
    config
}

/// Orchestrator, its backend and the workspace directory it writes into.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: Arc<MockBackend>,
    pub store: Arc<SqliteRunStore>,
    pub cancel: CancellationToken,
    _workspace: TempDir,
}

impl Harness {
    pub async fn new(configure: impl FnOnce(&mut Config)) -> Self {
        Self::with_backend(MockBackend::new(), configure).await
    }

    pub async fn with_backend(backend: MockBackend, configure: impl FnOnce(&mut Config)) -> Self {
        let workspace = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = test_config(&workspace);
        configure(&mut config);

        let backend = backend.shared();
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            store.clone() as Arc<dyn RunStore>,
            backend.clone(),
            backend.clone(),
            config,
            cancel.clone(),
        );
        Self {
            orchestrator,
            backend,
            store,
            cancel,
            _workspace: workspace,
        }
    }

    pub async fn init(&self, tree: DecompositionTree) -> Uuid {
        self.orchestrator
            .init_run("test task", tree, None)
            .await
            .expect("Failed to initialize run")
            .id
    }

    /// Tick until a tick makes no progress, returning every outcome.
    pub async fn drive(&self, run_id: Uuid, max_ticks: usize) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..max_ticks {
            let outcome = self.orchestrator.tick(run_id).await.expect("Tick failed");
            let progressed = outcome.is_progressed();
            outcomes.push(outcome);
            if !progressed {
                break;
            }
        }
        outcomes
    }

    /// Tick until the run has passed validation.
    pub async fn drive_through_validation(&self, run_id: Uuid) {
        for _ in 0..50 {
            let snapshot = self.orchestrator.status(run_id).await.expect("Status failed");
            if snapshot.run.validation_passed {
                return;
            }
            let outcome = self.orchestrator.tick(run_id).await.expect("Tick failed");
            assert!(outcome.is_progressed(), "run stalled before validation: {outcome:?}");
        }
        panic!("run did not pass validation within 50 ticks");
    }
}
