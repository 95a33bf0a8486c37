//! Ferry CLI Library
//!
//! Command-line front end for the ferry transfer engine.
//!
//! - **Transfer passes**: run an operation over a catalog with checkpointing (`ferry run`)
//! - **Reconciliation**: diff catalog targets against a namespace listing (`ferry reconcile`)
//! - **Checkpoint inspection**: counts and recorded failures (`ferry checkpoint stats|errors`)

pub mod commands;
pub mod error;
pub mod progress;

pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use commands::CatalogSpec;
use ferry_engine::transfer::OperationKind;
use std::path::PathBuf;

/// Ferry - checkpointed bulk object transfer
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// PostgreSQL connection string for `postgres:` catalogs
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Print the CLI reference as markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a transfer pass over a catalog
    Run(RunArgs),

    /// Compare catalog targets with the objects under a prefix
    Reconcile(ReconcileArgs),

    /// Inspect a checkpoint directory
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

/// Catalog selection shared by `run` and `reconcile`
#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Catalog to enumerate: `csv:PATH` or `postgres:TABLE`
    #[arg(short, long)]
    pub catalog: CatalogSpec,

    /// Only units whose source starts with this prefix
    #[arg(short, long)]
    pub prefix: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Operation applied to every unit
    #[arg(short, long)]
    pub operation: OperationKind,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Directory holding completed.log and errors.log
    #[arg(long, default_value = "./checkpoint")]
    pub checkpoint_dir: PathBuf,

    /// Parallel workers (overrides FERRY_WORKERS)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Units per batch (overrides FERRY_BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Attempts per unit (overrides FERRY_MAX_ATTEMPTS)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Catalog rows per page (overrides FERRY_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Re-run units recorded in errors.log
    #[arg(long)]
    pub retry_failed: bool,

    /// Reconcile against this target prefix after the run
    #[arg(long)]
    pub reconcile_prefix: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Listing prefix holding the transferred objects, e.g. `s3://archive/studies/`
    #[arg(short, long)]
    pub target_prefix: String,

    /// Missing and unexpected locators to print
    #[arg(long, default_value = "20")]
    pub show: usize,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Show record counts
    Stats {
        #[arg(long, default_value = "./checkpoint")]
        checkpoint_dir: PathBuf,
    },

    /// List failures not since completed
    Errors {
        #[arg(long, default_value = "./checkpoint")]
        checkpoint_dir: PathBuf,

        /// Limit number of failures to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "ferry",
            "run",
            "--operation",
            "archive",
            "--catalog",
            "csv:units.csv",
            "--workers",
            "4",
            "--retry-failed",
        ])
        .unwrap();

        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.operation, OperationKind::ArchiveCreate);
        assert_eq!(args.catalog.catalog, CatalogSpec::Csv(PathBuf::from("units.csv")));
        assert_eq!(args.workers, Some(4));
        assert!(args.retry_failed);
        assert_eq!(args.checkpoint_dir, PathBuf::from("./checkpoint"));
    }

    #[test]
    fn test_rejects_unknown_operation() {
        let result = Cli::try_parse_from(["ferry", "run", "--operation", "move", "--catalog", "csv:x.csv"]);
        assert!(result.is_err());
    }
}
