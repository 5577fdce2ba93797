//! Durable state surface of the orchestrator.

use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AuditEntry, ComponentContract, ComponentId, ContractTestSuite, DecompositionTree,
    ImplementationAttempt, RunState,
};

/// Summary row for listing runs.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: Uuid,
    pub task: String,
    pub status: String,
    pub phase: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Persistence port for runs, contracts, suites, attempts and the audit log.
///
/// Every record is independently readable so a crash between writes leaves
/// earlier rows intact.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run record with its tree.
    async fn create_run(&self, run: &RunState, tree: &DecompositionTree) -> DomainResult<()>;

    async fn load_run(&self, id: Uuid) -> DomainResult<Option<(RunState, DecompositionTree)>>;

    /// Most recently updated run, if any.
    async fn latest_run(&self) -> DomainResult<Option<Uuid>>;

    async fn list_runs(&self) -> DomainResult<Vec<RunSummary>>;

    /// Replace the run record and tree and insert `attempts`, all in one
    /// transaction. The spend and submission counter in `run` must already
    /// account for `attempts`.
    async fn commit_tick(
        &self,
        run: &RunState,
        tree: &DecompositionTree,
        attempts: &[ImplementationAttempt],
    ) -> DomainResult<()>;

    /// Store a contract revision; the latest revision is current.
    async fn save_contract(&self, run_id: Uuid, contract: &ComponentContract) -> DomainResult<()>;

    /// Current contract of every component that has one.
    async fn current_contracts(
        &self,
        run_id: Uuid,
    ) -> DomainResult<BTreeMap<ComponentId, ComponentContract>>;

    async fn save_suite(&self, run_id: Uuid, suite: &ContractTestSuite) -> DomainResult<()>;

    /// Latest suite of every component that has one.
    async fn current_suites(
        &self,
        run_id: Uuid,
    ) -> DomainResult<BTreeMap<ComponentId, ContractTestSuite>>;

    /// Insert an attempt. Attempts are never updated.
    async fn record_attempt(&self, run_id: Uuid, attempt: &ImplementationAttempt)
        -> DomainResult<()>;

    /// All attempts for a component, ascending by submission order.
    async fn attempts_for(
        &self,
        run_id: Uuid,
        component_id: &str,
    ) -> DomainResult<Vec<ImplementationAttempt>>;

    async fn get_attempt(&self, id: Uuid) -> DomainResult<Option<ImplementationAttempt>>;

    /// Append an audit entry and return its sequence number.
    async fn append_audit(&self, entry: &AuditEntry) -> DomainResult<i64>;

    /// Audit entries of a run, oldest first; `limit` keeps the newest N.
    async fn list_audit(&self, run_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<AuditEntry>>;
}
