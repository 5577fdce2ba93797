//! Durability of the SQLite run store across pool reopenings.

mod common;

use common::tree_with_leaves;
use pact::adapters::backends::{default_contract, default_suite};
use pact::adapters::sqlite::{initialize_database, SqliteRunStore};
use pact::domain::models::{DatabaseConfig, RunState, RunStatus};
use pact::domain::ports::RunStore;

fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("state").join("pact.db").display().to_string(),
        ..DatabaseConfig::default()
    }
}

#[tokio::test]
async fn test_run_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);
    let tree = tree_with_leaves("root", &["a", "b"]);
    let mut run = RunState::new("persist me", &tree, 12.0);

    {
        let pool = initialize_database(&config).await.unwrap();
        let store = SqliteRunStore::new(pool.clone());
        store.create_run(&run, &tree).await.unwrap();

        run.spend_usd = 1.25;
        run.status = RunStatus::Paused;
        store.commit_tick(&run, &tree, &[]).await.unwrap();

        let contract = default_contract(tree.get("a").unwrap()).sealed();
        store.save_contract(run.id, &contract).await.unwrap();
        store.save_suite(run.id, &default_suite(&contract)).await.unwrap();
        pool.close().await;
    }

    let pool = initialize_database(&config).await.unwrap();
    let store = SqliteRunStore::new(pool);
    let (loaded, loaded_tree) = store.load_run(run.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Paused);
    assert!((loaded.spend_usd - 1.25).abs() < f64::EPSILON);
    assert_eq!(loaded_tree, tree);
    assert_eq!(store.latest_run().await.unwrap(), Some(run.id));

    let contracts = store.current_contracts(run.id).await.unwrap();
    let suites = store.current_suites(run.id).await.unwrap();
    assert_eq!(contracts.len(), 1);
    assert!(!suites["a"].is_stale(&contracts["a"]));
}

#[tokio::test]
async fn test_list_runs_reports_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let pool = initialize_database(&file_config(&dir)).await.unwrap();
    let store = SqliteRunStore::new(pool);
    let tree = tree_with_leaves("root", &["a", "b"]);

    let first = RunState::new("first", &tree, 5.0);
    let second = RunState::new("second", &tree, 5.0);
    store.create_run(&first, &tree).await.unwrap();
    store.create_run(&second, &tree).await.unwrap();

    let runs = store.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    let mut tasks: Vec<&str> = runs.iter().map(|r| r.task.as_str()).collect();
    tasks.sort_unstable();
    assert_eq!(tasks, vec!["first", "second"]);
    assert!(store.load_run(uuid::Uuid::new_v4()).await.unwrap().is_none());
}
