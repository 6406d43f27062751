pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "waypoint",
    about = "Waypoint operator CLI",
    long_about = "Classify raw text into signed intent snapshots, replay stored snapshots, \
                  probe pipeline determinism, and inspect runtime readiness.",
    after_help = "Examples:\n  waypoint classify --text \"schedule a meeting tomorrow\" --intent-type SCHEDULE\n  waypoint verify --text \"find coffee near me\" --intent-type SEARCH --runs 100\n  waypoint doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the full pipeline for one input and print the signed snapshot")]
    Classify {
        #[arg(long, help = "Raw user text to classify")]
        text: String,
        #[arg(long, help = "Intent type, e.g. SCHEDULE, SEARCH, ACTION")]
        intent_type: String,
        #[arg(long, help = "RFC 3339 reference time; defaults to now")]
        at: Option<String>,
    },
    #[command(about = "Replay a stored pipeline snapshot and report divergence")]
    Replay {
        #[arg(help = "Path to a snapshot JSON file")]
        state_file: PathBuf,
        #[arg(long, help = "Fail replay when the snapshot's temporal window has expired")]
        strict: bool,
    },
    #[command(about = "Re-run the pipeline many times and check for a single signature")]
    Verify {
        #[arg(long, help = "Raw user text to classify")]
        text: String,
        #[arg(long, help = "Intent type, e.g. SCHEDULE, SEARCH, ACTION")]
        intent_type: String,
        #[arg(long, default_value_t = 100, help = "Number of pipeline runs")]
        runs: usize,
        #[arg(long, help = "RFC 3339 reference time; defaults to now")]
        at: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Validate config, state store connectivity, and pipeline determinism")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Classify { text, intent_type, at } => {
            commands::classify::run(&text, &intent_type, at.as_deref())
        }
        Command::Replay { state_file, strict } => commands::replay::run(&state_file, strict),
        Command::Verify { text, intent_type, runs, at } => {
            commands::verify::run(&text, &intent_type, runs, at.as_deref())
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
