//! Operator controls: `pause`, `resume` and `budget`.

use anyhow::{Context, Result};
use uuid::Uuid;

use super::tick::OutcomeOutput;
use crate::cli::output::output;
use crate::cli::types::{BudgetArgs, PauseArgs};
use crate::services::Orchestrator;

pub async fn pause(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    args: PauseArgs,
    json_mode: bool,
) -> Result<()> {
    let outcome = orchestrator
        .pause(run_id, args.reason)
        .await
        .with_context(|| format!("Failed to pause run {run_id}"))?;
    output(&OutcomeOutput { run_id, outcome }, json_mode);
    Ok(())
}

pub async fn resume(orchestrator: &Orchestrator, run_id: Uuid, json_mode: bool) -> Result<()> {
    let outcome = orchestrator
        .resume(run_id)
        .await
        .with_context(|| format!("Failed to resume run {run_id}"))?;
    output(&OutcomeOutput { run_id, outcome }, json_mode);
    Ok(())
}

pub async fn budget(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    args: BudgetArgs,
    json_mode: bool,
) -> Result<()> {
    let outcome = orchestrator
        .set_budget(run_id, args.cap)
        .await
        .with_context(|| format!("Failed to set budget cap on run {run_id}"))?;
    output(&OutcomeOutput { run_id, outcome }, json_mode);
    Ok(())
}
