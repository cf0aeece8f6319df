pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ledgerlens_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ledgerlens",
    about = "LedgerLens role-aware financial insights CLI",
    long_about = "Ask role-scoped questions over the financial corpus, inspect access-filtered \
                  retrieval, run the role demo, and check runtime readiness.",
    after_help = "Examples:\n  ledgerlens ask --role executive \"What is the status of Project Blackwell?\"\n  \
                  ledgerlens retrieve --role analyst \"Q3 revenue\"\n  ledgerlens demo\n  \
                  ledgerlens doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a ledgerlens.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Answer a question as the given role and record an audit entry")]
    Ask {
        #[arg(long, help = "analyst, product_manager, or executive")]
        role: String,
        #[arg(required = true, num_args = 1.., help = "Question text")]
        question: Vec<String>,
    },
    #[command(about = "Show the documents the given role may see for a question")]
    Retrieve {
        #[arg(long, help = "analyst, product_manager, or executive")]
        role: String,
        #[arg(required = true, num_args = 1.., help = "Question text")]
        question: Vec<String>,
    },
    #[command(about = "Run the access-control demo questions across all roles")]
    Demo,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, corpus, and audit log readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config.clone(), ..LoadOptions::default() };

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Ask { role, question } => commands::ask::run(options, &role, &question.join(" ")),
        Command::Retrieve { role, question } => {
            commands::retrieve::run(options, &role, &question.join(" "))
        }
        Command::Demo => commands::demo::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(options, json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Diagnostics go to stderr; stdout carries only command payloads.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
