//! Operator command-line surface.

pub mod commands;
pub mod context;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::LoggerImpl;
use crate::services::Orchestrator;

/// Load configuration, install logging and dispatch one command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&config.logging)?;

    // Ctrl+C stops new dispatch; in-flight attempts finish and are recorded.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested, finishing in-flight work");
            signal_token.cancel();
        }
    });

    let orchestrator = context::open_orchestrator(config, cancel).await?;
    let json = cli.json;

    match cli.command {
        Commands::Init(args) => commands::init::execute(&orchestrator, args, json).await,
        command => {
            let run_id = context::resolve_run(&orchestrator, cli.run).await?;
            dispatch(&orchestrator, run_id, command, json).await
        }
    }
}

async fn dispatch(
    orchestrator: &Orchestrator,
    run_id: Uuid,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Init(args) => commands::init::execute(orchestrator, args, json).await,
        Commands::Tick => commands::tick::execute_tick(orchestrator, run_id, json).await,
        Commands::Run(args) => commands::tick::execute_run(orchestrator, run_id, args, json).await,
        Commands::Status => commands::status::execute(orchestrator, run_id, json).await,
        Commands::Validate => commands::validate::execute(orchestrator, run_id, json).await,
        Commands::Build(args) => commands::build::execute(orchestrator, run_id, args, json).await,
        Commands::Pause(args) => commands::control::pause(orchestrator, run_id, args, json).await,
        Commands::Resume => commands::control::resume(orchestrator, run_id, json).await,
        Commands::Budget(args) => commands::control::budget(orchestrator, run_id, args, json).await,
        Commands::Audit(args) => commands::audit::execute(orchestrator, run_id, args, json).await,
    }
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": true,
            "message": format!("{err:#}"),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
