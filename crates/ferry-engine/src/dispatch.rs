//! Checkpoint-aware batching of enumerated units
//!
//! The dispatcher is the only producer on the work queue. It drops units the
//! checkpoint already accounts for and ids it has already dispatched in this
//! run, groups the rest into batches, and closes the queue by dropping its
//! sender when enumeration ends.

use crate::catalog::enumerator::{Enumerated, EnumerationFailure};
use crate::checkpoint::CheckpointState;
use crate::types::{Batch, RunStats, WorkUnit};
use async_channel::Sender;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub batch_size: usize,
    /// Dispatch units recorded in the error log
    pub retry_failed: bool,
}

/// Why a unit was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Completed,
    Failed,
    Duplicate,
}

struct Filter<'a> {
    state: &'a CheckpointState,
    retry_failed: bool,
    seen: HashSet<String>,
}

impl Filter<'_> {
    fn check(&mut self, unit: &WorkUnit) -> Option<Skip> {
        if self.state.is_completed(&unit.id) {
            return Some(Skip::Completed);
        }
        if !self.retry_failed && self.state.is_failed(&unit.id) {
            return Some(Skip::Failed);
        }
        if !self.seen.insert(unit.id.clone()) {
            return Some(Skip::Duplicate);
        }
        None
    }
}

/// Feed `entries` into `sender` as batches until the stream ends
///
/// Units accumulated before an enumeration failure are still dispatched, then
/// the failure is returned. The sender is dropped on every return path.
pub async fn dispatch(
    mut entries: BoxStream<'static, Result<Enumerated, EnumerationFailure>>,
    state: &CheckpointState,
    options: DispatchOptions,
    sender: Sender<Batch>,
    stats: &RunStats,
) -> Result<(), EnumerationFailure> {
    let batch_size = options.batch_size.max(1);
    let mut filter = Filter {
        state,
        retry_failed: options.retry_failed,
        seen: HashSet::new(),
    };
    let mut pending = Vec::with_capacity(batch_size);
    let mut offset = 0u64;

    while let Some(entry) = entries.next().await {
        let unit = match entry {
            Ok(Enumerated::Unit(unit)) => unit,
            Ok(Enumerated::Rejected { .. }) => {
                RunStats::incr(&stats.seen);
                RunStats::incr(&stats.rejected);
                continue;
            }
            Err(failure) => {
                send(&sender, &mut pending, &mut offset, stats).await;
                return Err(failure);
            }
        };
        RunStats::incr(&stats.seen);

        match filter.check(&unit) {
            Some(Skip::Completed) => RunStats::incr(&stats.skipped_completed),
            Some(Skip::Failed) => RunStats::incr(&stats.skipped_failed),
            Some(Skip::Duplicate) => {
                debug!(unit_id = %unit.id, "Skipping duplicate unit");
                RunStats::incr(&stats.duplicates);
            }
            None => {
                pending.push(unit);
                if pending.len() >= batch_size && !send(&sender, &mut pending, &mut offset, stats).await {
                    return Ok(());
                }
            }
        }
    }

    send(&sender, &mut pending, &mut offset, stats).await;
    debug!(batches = offset, "Dispatch complete");
    Ok(())
}

/// Send the pending units as one batch; false once the queue is closed
async fn send(sender: &Sender<Batch>, pending: &mut Vec<WorkUnit>, offset: &mut u64, stats: &RunStats) -> bool {
    if pending.is_empty() {
        return true;
    }
    let units = std::mem::take(pending);
    let count = units.len() as u64;
    let batch = Batch {
        offset: *offset,
        units,
    };

    if sender.send(batch).await.is_err() {
        warn!(offset = *offset, "Work queue closed, stopping dispatch");
        return false;
    }
    *offset += 1;
    RunStats::add(&stats.dispatched, count);
    RunStats::incr(&stats.batches);
    true
}
