//! Wiring of store, backend and orchestrator for one CLI invocation.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::backends::BackendRegistry;
use crate::adapters::sqlite::{initialize_database, SqliteRunStore};
use crate::domain::models::Config;
use crate::domain::ports::RunStore;
use crate::services::Orchestrator;

/// Open the configured database and backend and build an orchestrator.
pub async fn open_orchestrator(config: Config, cancel: CancellationToken) -> Result<Orchestrator> {
    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    let store: Arc<dyn RunStore> = Arc::new(SqliteRunStore::new(pool));
    let pair = BackendRegistry::new(config.backend.clone())
        .create()
        .context("Failed to create agent backend")?;
    Ok(Orchestrator::new(store, pair.backend, pair.harness, config, cancel))
}

/// The explicitly requested run, or the most recently updated one.
pub async fn resolve_run(orchestrator: &Orchestrator, explicit: Option<Uuid>) -> Result<Uuid> {
    match explicit {
        Some(id) => Ok(id),
        None => orchestrator
            .latest_run()
            .await
            .context("No run selected. Use 'pact init <tree>' first or pass --run"),
    }
}
