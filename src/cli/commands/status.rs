//! `pact status`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::Phase;
use crate::services::{Orchestrator, RunSnapshot};

#[derive(Debug, serde::Serialize)]
pub struct ComponentRow {
    pub id: String,
    pub status: String,
    pub state: String,
    pub round: u32,
    pub rounds_failed: u32,
    pub attempts: usize,
    pub winner: Option<Uuid>,
    pub exhausted: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusOutput {
    pub run_id: Uuid,
    pub task: String,
    pub status: String,
    pub phase: String,
    pub phases: BTreeMap<String, String>,
    pub spend_usd: f64,
    pub budget_cap_usd: f64,
    pub phase_spend: BTreeMap<String, f64>,
    pub pause_reason: Option<String>,
    pub failure: Option<String>,
    pub ticks: u64,
    pub components: Vec<ComponentRow>,
}

impl From<&RunSnapshot> for StatusOutput {
    fn from(snapshot: &RunSnapshot) -> Self {
        let run = &snapshot.run;
        let phases = Phase::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), run.phase_status(*p).as_str().to_string()))
            .collect();
        let phase_spend = run
            .phase_spend
            .iter()
            .map(|(p, spend)| (p.as_str().to_string(), *spend))
            .collect();
        let components = snapshot
            .tree
            .nodes
            .values()
            .map(|node| {
                let task = run.task(&node.id);
                ComponentRow {
                    id: node.id.clone(),
                    status: node.status.as_str().to_string(),
                    state: task.map_or("queued", |t| t.state.as_str()).to_string(),
                    round: task.map_or(0, |t| t.round),
                    rounds_failed: task.map_or(0, |t| t.rounds_failed),
                    attempts: task.map_or(0, |t| t.attempt_ids.len()),
                    winner: task.and_then(|t| t.winner),
                    exhausted: task.is_some_and(|t| t.exhausted),
                }
            })
            .collect();

        Self {
            run_id: run.id,
            task: run.task.clone(),
            status: run.status.as_str().to_string(),
            phase: run.phase.as_str().to_string(),
            phases,
            spend_usd: run.spend_usd,
            budget_cap_usd: run.budget_cap_usd,
            phase_spend,
            pause_reason: run.pause_reason.as_ref().map(|r| r.describe()),
            failure: run.failure.as_ref().map(|f| f.describe()),
            ticks: run.tick_count,
            components,
        }
    }
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Run: {}", self.run_id),
            format!("Task: {}", self.task),
            format!("Status: {} (phase: {}, {} tick(s))", self.status, self.phase, self.ticks),
            format!("Spend: ${:.2} of ${:.2}", self.spend_usd, self.budget_cap_usd),
        ];
        if let Some(reason) = &self.pause_reason {
            lines.push(format!("Paused: {reason}"));
        }
        if let Some(failure) = &self.failure {
            lines.push(format!("Failed: {failure}"));
        }

        lines.push("\nPhases:".to_string());
        for phase in Phase::ALL {
            let key = phase.as_str();
            let status = self.phases.get(key).map_or("not_started", String::as_str);
            match self.phase_spend.get(key) {
                Some(spend) => lines.push(format!("  {key:<10} {status:<12} ${spend:.2}")),
                None => lines.push(format!("  {key:<10} {status}")),
            }
        }

        let mut table = list_table(&["id", "status", "state", "round", "failed", "attempts", "winner"]);
        for c in &self.components {
            let winner = c
                .winner
                .map_or_else(|| "-".to_string(), |w| w.to_string()[..8].to_string());
            let state = if c.exhausted {
                format!("{} (exhausted)", c.state)
            } else {
                c.state.clone()
            };
            table.add_row(vec![
                c.id.clone(),
                c.status.clone(),
                state,
                c.round.to_string(),
                c.rounds_failed.to_string(),
                c.attempts.to_string(),
                winner,
            ]);
        }
        lines.push(format!("\nComponents:\n{table}"));
        lines.join("\n")
    }
}

pub async fn execute(orchestrator: &Orchestrator, run_id: Uuid, json_mode: bool) -> Result<()> {
    let snapshot = orchestrator
        .status(run_id)
        .await
        .with_context(|| format!("Failed to load run {run_id}"))?;
    output(&StatusOutput::from(&snapshot), json_mode);
    Ok(())
}
