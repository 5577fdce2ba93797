//! CLI type definitions
//!
//! Clap structures for the operator surface of the orchestrator.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pact")]
#[command(about = "Pact - contract-first build orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Run to operate on (defaults to the most recently updated run)
    #[arg(long, global = true, env = "PACT_RUN")]
    pub run: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a run from a decomposition tree document
    Init(InitArgs),

    /// Advance the run by one tick
    Tick,

    /// Tick repeatedly until the run stops making progress
    Run(RunArgs),

    /// Show phase statuses, spend and per-component state
    Status,

    /// Run the validator without dispatching anything
    Validate,

    /// Build one component out of the natural order
    Build(BuildArgs),

    /// Pause the run
    Pause(PauseArgs),

    /// Resume a paused run
    Resume,

    /// Change the run's spend cap
    Budget(BudgetArgs),

    /// Show the audit log
    Audit(AuditArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Decomposition tree document (YAML or JSON)
    pub tree: PathBuf,

    /// Task description; defaults to the document's `task` field
    #[arg(short, long)]
    pub task: Option<String>,

    /// Spend cap in USD; defaults to `budget.cap_usd`
    #[arg(short, long)]
    pub budget: Option<f64>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Upper bound on ticks for this invocation
    #[arg(long, default_value = "100")]
    pub max_ticks: usize,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Component to build
    pub component_id: String,
}

#[derive(Args, Debug)]
pub struct PauseArgs {
    /// Note recorded with the pause
    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct BudgetArgs {
    /// New spend cap in USD
    #[arg(long)]
    pub cap: f64,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Keep only the newest N entries
    #[arg(short, long)]
    pub limit: Option<i64>,
}
