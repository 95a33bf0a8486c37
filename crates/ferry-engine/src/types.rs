//! Work units, batches, and run counters

use crate::error::TransferError;
use ferry_common::ObjectLocator;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One atomic unit of work with a stable identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Checkpoint key
    pub id: String,
    pub source: String,
    /// Absent for delete and validate
    pub target: Option<String>,
    /// Hex or base64 MD5
    pub expected_hash: Option<String>,
    /// Position in enumeration order
    pub sequence_index: u64,
}

impl WorkUnit {
    /// Build a unit whose id is derived from its locators
    pub fn new(source: impl Into<String>, target: Option<String>, sequence_index: u64) -> Self {
        let source = source.into();
        let id = default_id(&source, target.as_deref());
        Self {
            id,
            source,
            target,
            expected_hash: None,
            sequence_index,
        }
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    pub fn source_locator(&self) -> Result<ObjectLocator, TransferError> {
        ObjectLocator::parse(&self.source)
            .map_err(|e| TransferError::fatal(format!("Malformed unit: {}", e)))
    }

    pub fn target_locator(&self) -> Result<Option<ObjectLocator>, TransferError> {
        self.target
            .as_deref()
            .map(ObjectLocator::parse)
            .transpose()
            .map_err(|e| TransferError::fatal(format!("Malformed unit: {}", e)))
    }

    /// Target locator for operations that write somewhere
    pub fn required_target(&self) -> Result<ObjectLocator, TransferError> {
        self.target_locator()?
            .ok_or_else(|| TransferError::fatal(format!("Malformed unit: {} has no target", self.id)))
    }
}

/// Id used when a catalog row carries none: the target, else the source
pub fn default_id(source: &str, target: Option<&str>) -> String {
    target.unwrap_or(source).to_string()
}

/// Ordered, non-empty group of units handed to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Sequence number of the batch within the run, for progress only
    pub offset: u64,
    pub units: Vec<WorkUnit>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Live counters shared by the dispatcher and workers
#[derive(Debug, Default)]
pub struct RunStats {
    pub seen: AtomicU64,
    pub skipped_completed: AtomicU64,
    pub skipped_failed: AtomicU64,
    pub duplicates: AtomicU64,
    pub rejected: AtomicU64,
    pub dispatched: AtomicU64,
    pub batches: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub attempts: AtomicU64,
    pub checkpoint_write_failures: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Units finished, successfully or not
    pub fn finished(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, elapsed: Duration) -> RunSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RunSummary {
            seen: load(&self.seen),
            skipped_completed: load(&self.skipped_completed),
            skipped_failed: load(&self.skipped_failed),
            duplicates: load(&self.duplicates),
            rejected: load(&self.rejected),
            dispatched: load(&self.dispatched),
            batches: load(&self.batches),
            succeeded: load(&self.succeeded),
            failed: load(&self.failed),
            attempts: load(&self.attempts),
            checkpoint_write_failures: load(&self.checkpoint_write_failures),
            elapsed,
        }
    }
}

/// Final counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Rows produced by the catalog, including rejected ones
    pub seen: u64,
    pub skipped_completed: u64,
    pub skipped_failed: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub batches: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub attempts: u64,
    pub checkpoint_write_failures: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Wall clock for a run
pub(crate) struct RunClock(Instant);

impl RunClock {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}
