//! `pact audit`: print the decision trail.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::cli::types::AuditArgs;
use crate::domain::models::AuditEntry;
use crate::services::Orchestrator;

#[derive(Debug, serde::Serialize)]
pub struct AuditOutput {
    pub run_id: Uuid,
    pub entries: Vec<AuditEntry>,
}

impl CommandOutput for AuditOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return format!("No audit entries for run {}.", self.run_id);
        }
        let mut table = list_table(&["seq", "time", "phase", "component", "action", "decision"]);
        for entry in &self.entries {
            table.add_row(vec![
                entry.seq.map_or_else(|| "-".to_string(), |s| s.to_string()),
                entry.timestamp.format("%H:%M:%S").to_string(),
                entry.phase.as_str().to_string(),
                entry.component_id.clone().unwrap_or_else(|| "-".to_string()),
                entry.action.as_str().to_string(),
                truncate(&entry.decision, 60),
            ]);
        }
        format!("{table}\n\n{} entr(ies)", self.entries.len())
    }
}

pub async fn execute(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    args: AuditArgs,
    json_mode: bool,
) -> Result<()> {
    let entries = orchestrator
        .audit(run_id, args.limit)
        .await
        .with_context(|| format!("Failed to read audit log of run {run_id}"))?;
    output(&AuditOutput { run_id, entries }, json_mode);
    Ok(())
}
