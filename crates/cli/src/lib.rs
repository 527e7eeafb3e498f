pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "buybuddy",
    about = "BuyBuddy operator CLI",
    long_about = "Inspect BuyBuddy configuration, check specialist readiness, and dry-run routing decisions offline.",
    after_help = "Examples:\n  buybuddy doctor --json\n  buybuddy config\n  buybuddy route packet.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and report which specialist endpoints are configured")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Dry-run one intake packet: transition and routing, no specialist calls")]
    Route {
        #[arg(help = "Path to an intake packet JSON file")]
        packet: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Route { packet } => commands::route::run(&packet),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
