use clap::Parser;
use pact::cli::{Cli, Commands};
use std::path::PathBuf;
use uuid::Uuid;

#[test]
fn test_parse_init_with_budget() {
    let cli = Cli::try_parse_from(["pact", "init", "tree.yaml", "--task", "calculator", "--budget", "12.5"])
        .unwrap();
    match cli.command {
        Commands::Init(args) => {
            assert_eq!(args.tree, PathBuf::from("tree.yaml"));
            assert_eq!(args.task.as_deref(), Some("calculator"));
            assert_eq!(args.budget, Some(12.5));
        }
        _ => panic!("Wrong command"),
    }
    assert!(!cli.json);
    assert!(cli.run.is_none());
}

#[test]
fn test_parse_run_default_max_ticks() {
    let cli = Cli::try_parse_from(["pact", "run"]).unwrap();
    match cli.command {
        Commands::Run(args) => assert_eq!(args.max_ticks, 100),
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_global_flags_after_subcommand() {
    let id = Uuid::new_v4();
    let cli = Cli::try_parse_from(["pact", "status", "--json", "--run", &id.to_string()]).unwrap();
    assert!(matches!(cli.command, Commands::Status));
    assert!(cli.json);
    assert_eq!(cli.run, Some(id));
}

#[test]
fn test_parse_build_requires_component() {
    assert!(Cli::try_parse_from(["pact", "build"]).is_err());
    let cli = Cli::try_parse_from(["pact", "build", "parser"]).unwrap();
    match cli.command {
        Commands::Build(args) => assert_eq!(args.component_id, "parser"),
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_budget_and_audit() {
    let cli = Cli::try_parse_from(["pact", "budget", "--cap", "40"]).unwrap();
    match cli.command {
        Commands::Budget(args) => assert!((args.cap - 40.0).abs() < f64::EPSILON),
        _ => panic!("Wrong command"),
    }

    let cli = Cli::try_parse_from(["pact", "audit", "-l", "5"]).unwrap();
    match cli.command {
        Commands::Audit(args) => assert_eq!(args.limit, Some(5)),
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_pause_reason() {
    let cli = Cli::try_parse_from(["pact", "pause", "--reason", "review contracts"]).unwrap();
    match cli.command {
        Commands::Pause(args) => assert_eq!(args.reason.as_deref(), Some("review contracts")),
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_rejects_invalid_run_id() {
    assert!(Cli::try_parse_from(["pact", "tick", "--run", "not-a-uuid"]).is_err());
}
