//! `ferry checkpoint` command implementation
//!
//! Reads a checkpoint directory without opening it for writing, so it is safe
//! to use while a run is in progress.

use super::Completion;
use crate::error::Result;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use ferry_engine::checkpoint::CheckpointState;
use std::path::Path;

pub async fn stats(dir: &Path) -> Result<Completion> {
    let Some(state) = load(dir).await? else {
        return Ok(Completion::Clean);
    };
    let outstanding = state.outstanding_failures().len();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Checkpoint", "Count"]);
    table.add_row(vec!["Completed units".to_string(), state.completed.len().to_string()]);
    table.add_row(vec!["Completion records".to_string(), state.completed_records.to_string()]);
    table.add_row(vec!["Failed units".to_string(), state.failed.len().to_string()]);
    table.add_row(vec!["Still failing".to_string(), outstanding.to_string()]);
    table.add_row(vec!["Error records".to_string(), state.error_records.to_string()]);

    println!("{} {}", "Checkpoint:".cyan().bold(), dir.display());
    println!("{}", table);
    if outstanding > 0 {
        println!(
            "Run 'ferry checkpoint errors --checkpoint-dir {}' to list failures.",
            dir.display()
        );
    }
    Ok(Completion::Clean)
}

pub async fn errors(dir: &Path, limit: usize) -> Result<Completion> {
    let Some(state) = load(dir).await? else {
        return Ok(Completion::Clean);
    };
    let failures = state.outstanding_failures();

    if failures.is_empty() {
        println!("{}", "No outstanding failures.".green());
        return Ok(Completion::Clean);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Unit", "Cause"]);
    for (id, cause) in failures.iter().take(limit) {
        table.add_row(vec![*id, *cause]);
    }

    println!("{}", table);
    if failures.len() > limit {
        println!("... and {} more (use --limit to show more)", failures.len() - limit);
    }
    println!("Re-run with --retry-failed to attempt these units again.");
    Ok(Completion::Clean)
}

async fn load(dir: &Path) -> Result<Option<CheckpointState>> {
    if !dir.is_dir() {
        println!("No checkpoint found at '{}'.", dir.display());
        return Ok(None);
    }
    Ok(Some(CheckpointState::read(dir).await?))
}
