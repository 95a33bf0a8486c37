//! `ferry run` command implementation
//!
//! Runs one transfer pass and prints its summary.

use super::{open_catalog, open_store, parse_locator, reconcile, Completion};
use crate::error::Result;
use crate::progress::{format_elapsed, RunProgress};
use crate::RunArgs;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use ferry_engine::checkpoint::Checkpoint;
use ferry_engine::config::EngineConfig;
use ferry_engine::transfer::TransferOperation;
use ferry_engine::{Engine, RunSummary};
use std::sync::Arc;
use tracing::info;

pub async fn run(args: &RunArgs, database_url: Option<&str>) -> Result<Completion> {
    let config = engine_config(args)?;
    config.validate()?;

    let reconcile_prefix = args.reconcile_prefix.as_deref().map(parse_locator).transpose()?;

    let catalog = open_catalog(&args.catalog.catalog, database_url).await?;
    let store = open_store().await?;
    let checkpoint = Arc::new(Checkpoint::open(&args.checkpoint_dir).await?);
    let operation = TransferOperation::from_config(args.operation, &config);

    info!(
        operation = %args.operation,
        catalog = %args.catalog.catalog,
        checkpoint_dir = %args.checkpoint_dir.display(),
        "Starting transfer"
    );
    let engine = Arc::new(Engine::new(config, catalog, store, operation));
    let filter = args.catalog.filter();

    let progress = RunProgress::start(Arc::clone(&engine), &format!("Running {}...", args.operation));
    let result = engine.run(&filter, Arc::clone(&checkpoint)).await;
    progress.finish();
    checkpoint.close().await?;
    let summary = result?;

    print_summary(&summary);
    let mut completion = if summary.is_success() {
        Completion::Clean
    } else {
        println!(
            "{}",
            format!(
                "{} unit(s) failed. Inspect them with 'ferry checkpoint errors --checkpoint-dir {}' and re-run with --retry-failed.",
                summary.failed,
                args.checkpoint_dir.display()
            )
            .yellow()
        );
        Completion::Unclean
    };

    if let Some(prefix) = reconcile_prefix {
        println!();
        let report = engine.reconcile(&filter, &prefix).await?;
        reconcile::print_report(&report, reconcile::DEFAULT_SHOW);
        if !report.is_clean() {
            completion = Completion::Unclean;
        }
    }

    Ok(completion)
}

/// Environment configuration with command-line overrides applied
pub fn engine_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    config.retry_failed |= args.retry_failed;
    Ok(config)
}

pub fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Units", "Count"]);

    let rows = [
        ("Seen", summary.seen),
        ("Already completed", summary.skipped_completed),
        ("Previously failed", summary.skipped_failed),
        ("Duplicates", summary.duplicates),
        ("Rejected rows", summary.rejected),
        ("Dispatched", summary.dispatched),
        ("Succeeded", summary.succeeded),
        ("Failed", summary.failed),
        ("Attempts", summary.attempts),
    ];
    for (label, count) in rows {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }
    if summary.checkpoint_write_failures > 0 {
        table.add_row(vec![
            "Checkpoint write failures".to_string(),
            summary.checkpoint_write_failures.to_string(),
        ]);
    }
    table
}

fn print_summary(summary: &RunSummary) {
    let title = if summary.is_success() {
        "Run complete".green().bold()
    } else {
        "Run complete with failures".red().bold()
    };
    println!("{} in {}", title, format_elapsed(summary.elapsed));
    println!("{}", summary_table(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CatalogSpec;
    use crate::CatalogArgs;
    use ferry_engine::transfer::OperationKind;
    use std::path::PathBuf;

    fn args() -> RunArgs {
        RunArgs {
            operation: OperationKind::Copy,
            catalog: CatalogArgs {
                catalog: CatalogSpec::Csv(PathBuf::from("units.csv")),
                prefix: None,
            },
            checkpoint_dir: PathBuf::from("./checkpoint"),
            workers: Some(2),
            batch_size: None,
            max_attempts: Some(5),
            page_size: None,
            retry_failed: true,
            reconcile_prefix: None,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let config = engine_config(&args()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_attempts, 5);
        assert!(config.retry_failed);
    }

    #[test]
    fn test_summary_table_lists_counts() {
        let summary = RunSummary {
            seen: 10,
            succeeded: 7,
            failed: 1,
            checkpoint_write_failures: 2,
            ..RunSummary::default()
        };
        let rendered = summary_table(&summary).to_string();
        assert!(rendered.contains("Succeeded"));
        assert!(rendered.contains("Checkpoint write failures"));

        let rendered = summary_table(&RunSummary::default()).to_string();
        assert!(!rendered.contains("Checkpoint write failures"));
    }
}
