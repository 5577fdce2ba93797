//! `pact tick` and `pact run`.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cli::output::{output, CommandOutput};
use crate::cli::types::RunArgs;
use crate::domain::models::TickOutcome;
use crate::services::Orchestrator;

/// Structured result of a single orchestrator operation.
#[derive(Debug, serde::Serialize)]
pub struct OutcomeOutput {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

impl CommandOutput for OutcomeOutput {
    fn to_human(&self) -> String {
        self.outcome.describe()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunLoopOutput {
    pub run_id: Uuid,
    pub ticks: Vec<TickOutcome>,
    /// The outcome that ended the loop.
    pub last: Option<TickOutcome>,
}

impl CommandOutput for RunLoopOutput {
    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .ticks
            .iter()
            .enumerate()
            .map(|(i, outcome)| format!("[{:>3}] {}", i + 1, outcome.describe()))
            .collect();
        if lines.is_empty() {
            lines.push("No tick executed.".to_string());
        }
        lines.push(format!("\n{} tick(s) on run {}", self.ticks.len(), self.run_id));
        lines.join("\n")
    }
}

pub async fn execute_tick(orchestrator: &Orchestrator, run_id: Uuid, json_mode: bool) -> Result<()> {
    let outcome = orchestrator
        .tick(run_id)
        .await
        .with_context(|| format!("Tick failed for run {run_id}"))?;
    output(&OutcomeOutput { run_id, outcome }, json_mode);
    Ok(())
}

pub async fn execute_run(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    args: RunArgs,
    json_mode: bool,
) -> Result<()> {
    let mut ticks = Vec::new();
    for _ in 0..args.max_ticks {
        let outcome = orchestrator
            .tick(run_id)
            .await
            .with_context(|| format!("Tick {} failed for run {run_id}", ticks.len() + 1))?;
        let progressed = outcome.is_progressed();
        if !json_mode {
            tracing::info!(run_id = %run_id, tick = ticks.len() + 1, outcome = outcome.label(), "Tick finished");
        }
        ticks.push(outcome);
        if !progressed {
            break;
        }
    }
    let last = ticks.last().cloned();
    output(&RunLoopOutput { run_id, ticks, last }, json_mode);
    Ok(())
}
