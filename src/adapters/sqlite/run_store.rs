//! SQLite implementation of the RunStore.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditAction, AuditEntry, ComponentContract, ComponentId, ContractTestSuite, DecompositionTree,
    ImplementationAttempt, Phase, RunState,
};
use crate::domain::ports::{RunStore, RunSummary};

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, run: &RunState, tree: &DecompositionTree) -> DomainResult<()> {
        let state_json = serde_json::to_string(run)?;
        let tree_json = serde_json::to_string(tree)?;

        sqlx::query(
            r#"INSERT INTO runs (id, task, status, phase, state, tree, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.task)
        .bind(run.status.as_str())
        .bind(run.phase.as_str())
        .bind(&state_json)
        .bind(&tree_json)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_run(&self, id: Uuid) -> DomainResult<Option<(RunState, DecompositionTree)>> {
        let row: Option<(String, String)> = sqlx::query_as("SELECT state, tree FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(state, tree)| -> DomainResult<_> {
            Ok((serde_json::from_str(&state)?, serde_json::from_str(&tree)?))
        })
        .transpose()
    }

    async fn latest_run(&self) -> DomainResult<Option<Uuid>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM runs ORDER BY updated_at DESC, rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id,)| parse_uuid(&id)).transpose()
    }

    async fn list_runs(&self) -> DomainResult<Vec<RunSummary>> {
        let rows: Vec<RunSummaryRow> = sqlx::query_as(
            "SELECT id, task, status, phase, updated_at FROM runs ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn commit_tick(
        &self,
        run: &RunState,
        tree: &DecompositionTree,
        attempts: &[ImplementationAttempt],
    ) -> DomainResult<()> {
        let state_json = serde_json::to_string(run)?;
        let tree_json = serde_json::to_string(tree)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"UPDATE runs SET status = ?, phase = ?, state = ?, tree = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(run.status.as_str())
        .bind(run.phase.as_str())
        .bind(&state_json)
        .bind(&tree_json)
        .bind(run.updated_at.to_rfc3339())
        .bind(run.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RunNotFound(run.id.to_string()));
        }
        for attempt in attempts {
            insert_attempt(&mut *tx, run.id, attempt).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_contract(&self, run_id: Uuid, contract: &ComponentContract) -> DomainResult<()> {
        let body = serde_json::to_string(contract)?;
        sqlx::query(
            r#"INSERT INTO contracts (run_id, component_id, version, revision, body, created_at)
               SELECT ?, ?, ?, COALESCE(MAX(revision), 0) + 1, ?, ?
               FROM contracts WHERE run_id = ? AND component_id = ?"#,
        )
        .bind(run_id.to_string())
        .bind(&contract.component_id)
        .bind(contract.version.as_str())
        .bind(&body)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(run_id.to_string())
        .bind(&contract.component_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_contracts(
        &self,
        run_id: Uuid,
    ) -> DomainResult<BTreeMap<ComponentId, ComponentContract>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT c.component_id, c.body FROM contracts c
               WHERE c.run_id = ?
                 AND c.revision = (SELECT MAX(revision) FROM contracts
                                   WHERE run_id = c.run_id AND component_id = c.component_id)"#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, body)| -> DomainResult<(ComponentId, ComponentContract)> {
                Ok((id, serde_json::from_str(&body)?))
            })
            .collect()
    }

    async fn save_suite(&self, run_id: Uuid, suite: &ContractTestSuite) -> DomainResult<()> {
        let body = serde_json::to_string(suite)?;
        sqlx::query(
            r#"INSERT INTO test_suites (run_id, component_id, contract_version, revision, body, created_at)
               SELECT ?, ?, ?, COALESCE(MAX(revision), 0) + 1, ?, ?
               FROM test_suites WHERE run_id = ? AND component_id = ?"#,
        )
        .bind(run_id.to_string())
        .bind(&suite.component_id)
        .bind(suite.contract_version.as_str())
        .bind(&body)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(run_id.to_string())
        .bind(&suite.component_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_suites(
        &self,
        run_id: Uuid,
    ) -> DomainResult<BTreeMap<ComponentId, ContractTestSuite>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT s.component_id, s.body FROM test_suites s
               WHERE s.run_id = ?
                 AND s.revision = (SELECT MAX(revision) FROM test_suites
                                   WHERE run_id = s.run_id AND component_id = s.component_id)"#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, body)| -> DomainResult<(ComponentId, ContractTestSuite)> {
                Ok((id, serde_json::from_str(&body)?))
            })
            .collect()
    }

    async fn record_attempt(
        &self,
        run_id: Uuid,
        attempt: &ImplementationAttempt,
    ) -> DomainResult<()> {
        insert_attempt(&self.pool, run_id, attempt).await
    }

    async fn attempts_for(
        &self,
        run_id: Uuid,
        component_id: &str,
    ) -> DomainResult<Vec<ImplementationAttempt>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM attempts WHERE run_id = ? AND component_id = ? ORDER BY submission_order",
        )
        .bind(run_id.to_string())
        .bind(component_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).map_err(DomainError::from))
            .collect()
    }

    async fn get_attempt(&self, id: Uuid) -> DomainResult<Option<ImplementationAttempt>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM attempts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(body,)| serde_json::from_str(&body).map_err(DomainError::from))
            .transpose()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> DomainResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO audit_log (run_id, timestamp, phase, component_id, action, decision, detail)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.run_id.to_string())
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.phase.as_str())
        .bind(entry.component_id.as_deref())
        .bind(entry.action.as_str())
        .bind(&entry.decision)
        .bind(&entry.detail)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_audit(&self, run_id: Uuid, limit: Option<i64>) -> DomainResult<Vec<AuditEntry>> {
        let mut rows: Vec<AuditRow> = sqlx::query_as(
            r#"SELECT seq, run_id, timestamp, phase, component_id, action, decision, detail
               FROM audit_log WHERE run_id = ? ORDER BY seq DESC LIMIT ?"#,
        )
        .bind(run_id.to_string())
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RunSummaryRow {
    id: String,
    task: String,
    status: String,
    phase: String,
    updated_at: String,
}

impl TryFrom<RunSummaryRow> for RunSummary {
    type Error = DomainError;

    fn try_from(row: RunSummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            task: row.task,
            status: row.status,
            phase: row.phase,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    seq: i64,
    run_id: String,
    timestamp: String,
    phase: String,
    component_id: Option<String>,
    action: String,
    decision: String,
    detail: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DomainError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let phase = Phase::parse_str(&row.phase)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase)))?;
        let action = AuditAction::parse_str(&row.action)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid action: {}", row.action)))?;

        Ok(Self {
            seq: Some(row.seq),
            run_id: parse_uuid(&row.run_id)?,
            timestamp: parse_datetime(&row.timestamp)?,
            phase,
            component_id: row.component_id,
            action,
            decision: row.decision,
            detail: row.detail,
        })
    }
}

/// Insert one attempt row on any executor, pool or open transaction.
async fn insert_attempt<'e, E>(executor: E, run_id: Uuid, attempt: &ImplementationAttempt) -> DomainResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let body = serde_json::to_string(attempt)?;
    let order = i64::try_from(attempt.submission_order)
        .map_err(|e| DomainError::SerializationError(e.to_string()))?;

    sqlx::query(
        r#"INSERT INTO attempts (id, run_id, component_id, contract_version, submission_order, outcome, body, recorded_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(attempt.id.to_string())
    .bind(run_id.to_string())
    .bind(&attempt.component_id)
    .bind(attempt.contract_version.as_str())
    .bind(order)
    .bind(attempt.outcome.as_str())
    .bind(&body)
    .bind(attempt.recorded_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{
        AttemptOutcome, ComponentNode, ContractVersion, RunStatus, TestRun,
    };
    use chrono::Utc;

    async fn setup() -> (SqliteRunStore, RunState, DecompositionTree) {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = SqliteRunStore::new(pool);
        let mut tree = DecompositionTree::new(ComponentNode::new("root", "Root"));
        tree.insert_child("root", ComponentNode::new("a", "A")).unwrap();
        let run = RunState::new("build a thing", &tree, 10.0);
        store.create_run(&run, &tree).await.unwrap();
        (store, run, tree)
    }

    fn attempt(component: &str, order: u64) -> ImplementationAttempt {
        ImplementationAttempt {
            id: Uuid::new_v4(),
            component_id: component.into(),
            contract_version: ContractVersion::from("v1"),
            agent: "mock".into(),
            artifact: Some("artifact".into()),
            tests: TestRun::default(),
            cost_usd: 0.25,
            duration_ms: 100,
            outcome: AttemptOutcome::TestFailure,
            submission_order: order,
            round: 0,
            notes: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_tick_replaces_record() {
        let (store, mut run, tree) = setup().await;
        run.status = RunStatus::Paused;
        run.spend_usd = 3.5;
        store.commit_tick(&run, &tree, &[]).await.unwrap();

        let (loaded, loaded_tree) = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded_tree, tree);
        assert_eq!(store.latest_run().await.unwrap(), Some(run.id));
    }

    #[tokio::test]
    async fn test_commit_tick_writes_attempts_with_run() {
        let (store, mut run, tree) = setup().await;
        let first = attempt("a", 0);
        run.spend_usd = first.cost_usd;
        run.next_submission = 1;
        store.commit_tick(&run, &tree, &[first.clone()]).await.unwrap();

        let (loaded, _) = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.next_submission, 1);
        assert_eq!(store.attempts_for(run.id, "a").await.unwrap(), vec![first.clone()]);

        // A duplicate attempt rolls back the whole commit
        let mut later = run.clone();
        later.spend_usd = 9.0;
        later.next_submission = 2;
        let second = attempt("a", 1);
        assert!(store
            .commit_tick(&later, &tree, &[second.clone(), first])
            .await
            .is_err());
        let (reloaded, _) = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(reloaded.next_submission, 1);
        assert!((reloaded.spend_usd - 0.25).abs() < f64::EPSILON);
        assert!(store.get_attempt(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_tick_unknown_run() {
        let (store, _, tree) = setup().await;
        let other = RunState::new("other", &tree, 1.0);
        assert!(matches!(
            store.commit_tick(&other, &tree, &[]).await,
            Err(DomainError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_contract_revision_wins() {
        let (store, run, _) = setup().await;
        let first = ComponentContract::new("a").sealed();
        let mut second = ComponentContract::new("a");
        second.description = "revised".into();
        let second = second.sealed();

        store.save_contract(run.id, &first).await.unwrap();
        store.save_contract(run.id, &second).await.unwrap();
        let current = store.current_contracts(run.id).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current["a"], second);
    }

    #[tokio::test]
    async fn test_attempts_are_insert_only_and_ordered() {
        let (store, run, _) = setup().await;
        let late = attempt("a", 5);
        let early = attempt("a", 2);
        store.record_attempt(run.id, &late).await.unwrap();
        store.record_attempt(run.id, &early).await.unwrap();

        let listed = store.attempts_for(run.id, "a").await.unwrap();
        assert_eq!(listed, vec![early.clone(), late]);
        assert!(store.record_attempt(run.id, &early).await.is_err());
        assert_eq!(store.get_attempt(early.id).await.unwrap(), Some(early));
    }

    #[tokio::test]
    async fn test_audit_limit_keeps_newest_in_order() {
        let (store, run, _) = setup().await;
        for i in 0..5 {
            let entry = AuditEntry::new(run.id, Phase::Contract, AuditAction::AuthorContract, format!("entry {i}"))
                .component("a");
            store.append_audit(&entry).await.unwrap();
        }

        let all = store.list_audit(run.id, None).await.unwrap();
        assert_eq!(all.len(), 5);
        let newest = store.list_audit(run.id, Some(2)).await.unwrap();
        let decisions: Vec<_> = newest.iter().map(|e| e.decision.as_str()).collect();
        assert_eq!(decisions, vec!["entry 3", "entry 4"]);
        assert!(newest[0].seq < newest[1].seq);
    }
}
