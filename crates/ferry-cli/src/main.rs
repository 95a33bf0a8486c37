//! Ferry CLI - Main entry point

use clap::Parser;
use ferry_cli::commands::{self, Completion};
use ferry_cli::{CheckpointCommand, Cli, Commands};
use ferry_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::{error, warn};

/// Conventional exit status after SIGINT
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    // Load .env before clap reads env-backed arguments
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command.as_ref() else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("ferry-cli")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let guard = init_logging(&log_config).ok();

    let code = tokio::select! {
        result = execute_command(command, cli.database_url.as_deref()) => match result {
            Ok(completion) => completion.exit_code(),
            Err(e) => {
                error!(error = %e, "Command failed");
                eprintln!("Error: {}", e);
                1
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            eprintln!();
            eprintln!("Interrupted. Completed units are checkpointed; re-run the same command to resume.");
            INTERRUPTED
        }
    };

    drop(guard);
    if code != 0 {
        process::exit(code);
    }
}

async fn execute_command(command: &Commands, database_url: Option<&str>) -> ferry_cli::Result<Completion> {
    match command {
        Commands::Run(args) => commands::run::run(args, database_url).await,

        Commands::Reconcile(args) => commands::reconcile::run(args, database_url).await,

        Commands::Checkpoint { command } => match command {
            CheckpointCommand::Stats { checkpoint_dir } => commands::checkpoint::stats(checkpoint_dir).await,
            CheckpointCommand::Errors { checkpoint_dir, limit } => {
                commands::checkpoint::errors(checkpoint_dir, *limit).await
            }
        },
    }
}
