//! `ferry reconcile` command implementation
//!
//! Diffs catalog targets against a listing of the target prefix. Read-only.

use super::{open_catalog, open_store, parse_locator, Completion};
use crate::error::Result;
use crate::progress::create_spinner;
use crate::ReconcileArgs;
use colored::Colorize;
use ferry_engine::config::EngineConfig;
use ferry_engine::reconcile::ReconcileReport;
use ferry_engine::transfer::TransferOperation;
use ferry_engine::Engine;

pub const DEFAULT_SHOW: usize = 20;

pub async fn run(args: &ReconcileArgs, database_url: Option<&str>) -> Result<Completion> {
    let target_prefix = parse_locator(&args.target_prefix)?;
    let config = EngineConfig::from_env()?;

    let catalog = open_catalog(&args.catalog.catalog, database_url).await?;
    let store = open_store().await?;
    // reconciliation never applies the operation
    let engine = Engine::new(config, catalog, store, TransferOperation::HashValidate);

    let spinner = (!args.json).then(|| create_spinner("Reconciling..."));
    let report = engine.reconcile(&args.catalog.filter(), &target_prefix).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.show);
    }

    Ok(if report.is_clean() {
        Completion::Clean
    } else {
        Completion::Unclean
    })
}

pub fn print_report(report: &ReconcileReport, show: usize) {
    println!("{}", "Reconciliation:".cyan().bold());
    println!("  Expected:   {}", report.expected);
    println!("  Actual:     {}", report.actual);
    println!("  Missing:    {}", report.missing.len());
    println!("  Unexpected: {}", report.unexpected.len());
    if report.units_without_target > 0 {
        println!("  Units without a target (not compared): {}", report.units_without_target);
    }

    if report.is_clean() {
        println!("{}", "No drift: every expected object is present and nothing else is.".green());
        return;
    }

    print_sample("Missing (expected but absent)", &report.missing, show);
    print_sample("Unexpected (present but not in the catalog)", &report.unexpected, show);
}

fn print_sample(title: &str, locators: &[String], show: usize) {
    if locators.is_empty() {
        return;
    }
    println!();
    println!("{}", title.yellow().bold());
    for locator in locators.iter().take(show) {
        println!("  {}", locator);
    }
    if locators.len() > show {
        println!("  ... and {} more", locators.len() - show);
    }
}
