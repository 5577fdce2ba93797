//! `pact validate`: run the mechanical gate without dispatching.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::errors::ValidationIssue;
use crate::domain::models::TickOutcome;
use crate::services::{validation_outcome, Orchestrator, ValidationReport};

#[derive(Debug, serde::Serialize)]
pub struct IssueRow {
    pub kind: &'static str,
    pub component_id: Option<String>,
    pub message: String,
}

impl From<&ValidationIssue> for IssueRow {
    fn from(issue: &ValidationIssue) -> Self {
        Self {
            kind: issue.kind(),
            component_id: issue.component_id().map(str::to_string),
            message: issue.to_string(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ValidateOutput {
    pub run_id: Uuid,
    pub passed: bool,
    pub errors: Vec<IssueRow>,
    pub warnings: Vec<IssueRow>,
    pub outcome: TickOutcome,
}

impl ValidateOutput {
    pub fn new(run_id: Uuid, report: &ValidationReport) -> Self {
        Self {
            run_id,
            passed: report.passed(),
            errors: report.errors.iter().map(IssueRow::from).collect(),
            warnings: report.warnings.iter().map(IssueRow::from).collect(),
            outcome: validation_outcome(report),
        }
    }
}

fn issue_table(rows: &[IssueRow]) -> String {
    let mut table = list_table(&["kind", "component", "message"]);
    for row in rows {
        table.add_row(vec![
            row.kind.to_string(),
            row.component_id.clone().unwrap_or_else(|| "-".to_string()),
            row.message.clone(),
        ]);
    }
    table.to_string()
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![if self.passed {
            format!("Validation passed ({} warning(s))", self.warnings.len())
        } else {
            format!(
                "Validation failed: {} error(s), {} warning(s)",
                self.errors.len(),
                self.warnings.len()
            )
        }];
        if !self.errors.is_empty() {
            lines.push(format!("\nErrors:\n{}", issue_table(&self.errors)));
        }
        if !self.warnings.is_empty() {
            lines.push(format!("\nWarnings:\n{}", issue_table(&self.warnings)));
        }
        lines.join("\n")
    }
}

pub async fn execute(orchestrator: &Orchestrator, run_id: Uuid, json_mode: bool) -> Result<()> {
    let report = orchestrator
        .validate(run_id)
        .await
        .with_context(|| format!("Failed to validate run {run_id}"))?;
    output(&ValidateOutput::new(run_id, &report), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_report_lists_errors() {
        let report = ValidationReport {
            errors: vec![ValidationIssue::MissingContract {
                component_id: "parser".into(),
            }],
            warnings: vec![],
        };
        let out = ValidateOutput::new(Uuid::new_v4(), &report);
        assert!(!out.passed);
        assert_eq!(out.errors[0].kind, "missing_contract");
        assert_eq!(out.errors[0].component_id.as_deref(), Some("parser"));
        assert_eq!(out.outcome.label(), "failed");
        assert!(out.to_human().contains("parser"));
    }

    #[test]
    fn test_clean_report_progresses() {
        let out = ValidateOutput::new(Uuid::new_v4(), &ValidationReport::default());
        assert!(out.passed);
        assert!(out.outcome.is_progressed());
        assert!(out.to_human().starts_with("Validation passed"));
    }
}
