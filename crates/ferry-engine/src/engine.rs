//! One transfer pass, wired end to end

use crate::catalog::{Catalog, CatalogEnumerator, CatalogFilter};
use crate::checkpoint::Checkpoint;
use crate::config::EngineConfig;
use crate::dispatch::{dispatch, DispatchOptions};
use crate::error::{EngineError, EngineResult};
use crate::pool::{WorkerContext, WorkerPool};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::ObjectStore;
use crate::transfer::TransferOperation;
use crate::types::{RunClock, RunStats, RunSummary};
use ferry_common::ObjectLocator;
use std::sync::{Arc, Mutex};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn ObjectStore>,
    operation: Arc<TransferOperation>,
    stats: Mutex<Arc<RunStats>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn ObjectStore>,
        operation: TransferOperation,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            operation: Arc::new(operation),
            stats: Mutex::new(Arc::new(RunStats::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counters of the current (or last) run
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn enumerator(&self, filter: &CatalogFilter) -> CatalogEnumerator {
        CatalogEnumerator::new(Arc::clone(&self.catalog), filter.clone(), self.config.page_size)
    }

    /// Run one pass over the catalog
    ///
    /// Per-unit failures end up in the checkpoint error log and the summary.
    /// Only configuration, checkpoint and enumeration failures are errors; on
    /// an enumeration failure the batches already queued are still processed.
    pub async fn run(&self, filter: &CatalogFilter, checkpoint: Arc<Checkpoint>) -> EngineResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            %run_id,
            catalog = self.catalog.name(),
            operation = %self.operation.kind()
        );
        self.run_inner(filter, checkpoint).instrument(span).await
    }

    async fn run_inner(&self, filter: &CatalogFilter, checkpoint: Arc<Checkpoint>) -> EngineResult<RunSummary> {
        self.config.validate()?;
        let clock = RunClock::start();

        let state = checkpoint.load().await?;
        info!(
            completed = state.completed.len(),
            failed = state.failed.len(),
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            "Starting run"
        );

        let stats = Arc::new(RunStats::new());
        *self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&stats);

        let (sender, receiver) = async_channel::bounded(self.config.effective_queue_depth());
        let pool = WorkerPool::spawn(
            self.config.workers,
            receiver,
            WorkerContext {
                store: Arc::clone(&self.store),
                operation: Arc::clone(&self.operation),
                checkpoint,
                retry: self.config.retry_policy(),
                stats: Arc::clone(&stats),
            },
        );

        let options = DispatchOptions {
            batch_size: self.config.batch_size,
            retry_failed: self.config.retry_failed,
        };
        let dispatched = dispatch(self.enumerator(filter).entries(), &state, options, sender, &stats).await;
        drop(state);

        let joined = pool.join().await;
        let summary = stats.snapshot(clock.elapsed());

        if let Err(failure) = dispatched {
            error!(page = failure.page, error = %failure.source, "Enumeration failed, run aborted");
            return Err(failure.into());
        }
        joined?;

        info!(
            seen = summary.seen,
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped_completed + summary.skipped_failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(summary)
    }

    /// Diff the catalog targets selected by `filter` against a listing of `target_prefix`
    pub async fn reconcile(&self, filter: &CatalogFilter, target_prefix: &ObjectLocator) -> Result<ReconcileReport, EngineError> {
        Reconciler::new(self.enumerator(filter), Arc::clone(&self.store))
            .reconcile(target_prefix)
            .await
    }
}
