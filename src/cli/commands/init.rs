//! Implementation of the `pact init` command.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cli::output::{output, CommandOutput};
use crate::cli::types::InitArgs;
use crate::domain::models::{DecompositionTree, TreeDocument};
use crate::services::Orchestrator;

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub run_id: Uuid,
    pub task: String,
    pub root: String,
    pub components: usize,
    pub budget_cap_usd: f64,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        [
            format!("Run initialized: {}", self.run_id),
            format!("  Task: {}", self.task),
            format!("  Root: {} ({} components)", self.root, self.components),
            format!("  Budget cap: ${:.2}", self.budget_cap_usd),
            "\nNext: 'pact tick' or 'pact run'".to_string(),
        ]
        .join("\n")
    }
}

/// Parse a decomposition document and return its task alongside the tree.
pub fn load_tree(text: &str) -> Result<(String, DecompositionTree)> {
    let doc: TreeDocument =
        serde_yaml::from_str(text).context("Failed to parse decomposition tree document")?;
    let task = doc.task.clone();
    let tree = DecompositionTree::from_document(doc).context("Invalid decomposition tree")?;
    Ok((task, tree))
}

pub async fn execute(orchestrator: &Orchestrator, args: InitArgs, json_mode: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.tree)
        .await
        .with_context(|| format!("Failed to read {}", args.tree.display()))?;
    let (document_task, tree) = load_tree(&text)?;
    let task = args
        .task
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(document_task);
    let root = tree.root_id.clone();
    let components = tree.len();

    let run = orchestrator
        .init_run(task, tree, args.budget)
        .await
        .context("Failed to initialize run")?;

    output(
        &InitOutput {
            run_id: run.id,
            task: run.task.clone(),
            root,
            components,
            budget_cap_usd: run.budget_cap_usd,
        },
        json_mode,
    );
    Ok(())
}
