//! Pact CLI entry point.

use clap::Parser;

use pact::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = pact::cli::run(cli).await {
        pact::cli::handle_error(err, json);
    }
}
