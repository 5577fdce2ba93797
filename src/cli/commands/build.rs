//! `pact build <component>`: advance one component's pipeline.

use anyhow::{Context, Result};
use uuid::Uuid;

use super::tick::OutcomeOutput;
use crate::cli::output::output;
use crate::cli::types::BuildArgs;
use crate::services::Orchestrator;

pub async fn execute(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    args: BuildArgs,
    json_mode: bool,
) -> Result<()> {
    let outcome = orchestrator
        .build(run_id, &args.component_id)
        .await
        .with_context(|| format!("Targeted build of '{}' failed", args.component_id))?;
    output(&OutcomeOutput { run_id, outcome }, json_mode);
    Ok(())
}
