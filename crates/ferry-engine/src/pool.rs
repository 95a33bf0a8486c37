//! Worker pool
//!
//! Each worker is a tokio task looping `Idle -> Fetch -> Execute -> Record`
//! over batches from the shared queue, and stops once the queue is closed
//! and drained. A unit's failure, or a panic inside its operation, is
//! recorded against that unit only.

use crate::checkpoint::Checkpoint;
use crate::error::{EngineError, TransferError};
use crate::retry::RetryPolicy;
use crate::store::ObjectStore;
use crate::transfer::{Outcome, TransferOperation};
use crate::types::{Batch, RunStats, WorkUnit};
use async_channel::Receiver;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, trace, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetch,
    Execute,
    Record,
    Stopped,
}

/// Everything a worker shares with its siblings
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn ObjectStore>,
    pub operation: Arc<TransferOperation>,
    pub checkpoint: Arc<Checkpoint>,
    pub retry: RetryPolicy,
    pub stats: Arc<RunStats>,
}

struct Worker {
    id: usize,
    state: WorkerState,
    ctx: WorkerContext,
}

impl Worker {
    fn transition(&mut self, next: WorkerState) {
        trace!(worker = self.id, from = ?self.state, to = ?next, "Worker state");
        self.state = next;
    }

    async fn run(mut self, receiver: Receiver<Batch>) {
        loop {
            self.transition(WorkerState::Fetch);
            let Ok(batch) = receiver.recv().await else {
                break;
            };
            debug!(worker = self.id, offset = batch.offset, units = batch.len(), "Processing batch");

            for unit in &batch.units {
                self.transition(WorkerState::Execute);
                let result = self.execute(unit).await;
                self.transition(WorkerState::Record);
                self.record(unit, result).await;
            }
            self.transition(WorkerState::Idle);
        }
        self.transition(WorkerState::Stopped);
    }

    async fn execute(&self, unit: &WorkUnit) -> Result<Outcome, TransferError> {
        let store: &dyn ObjectStore = self.ctx.store.as_ref();
        let operation: &TransferOperation = self.ctx.operation.as_ref();

        let outcome = self
            .ctx
            .retry
            .run(&unit.id, move |_attempt| async move {
                AssertUnwindSafe(operation.apply(store, unit))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(TransferError::fatal(format!(
                            "Operation panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    })
            })
            .await;

        RunStats::add(&self.ctx.stats.attempts, u64::from(outcome.attempts));
        outcome.result
    }

    async fn record(&self, unit: &WorkUnit, result: Result<Outcome, TransferError>) {
        let stats = &self.ctx.stats;
        let written = match result {
            Ok(outcome) => {
                debug!(unit_id = %unit.id, ?outcome, "Unit completed");
                RunStats::incr(&stats.succeeded);
                self.ctx.checkpoint.append(&unit.id).await
            }
            Err(err) => {
                warn!(unit_id = %unit.id, error = %err, retryable = err.is_retryable(), "Unit failed");
                RunStats::incr(&stats.failed);
                self.ctx.checkpoint.append_error(&unit.id, err.cause()).await
            }
        };

        if let Err(err) = written {
            error!(unit_id = %unit.id, error = %err, "Failed to write checkpoint record");
            RunStats::incr(&stats.checkpoint_write_failures);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Running worker tasks
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, receiver: Receiver<Batch>, ctx: WorkerContext) -> Self {
        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    state: WorkerState::Idle,
                    ctx: ctx.clone(),
                };
                let receiver = receiver.clone();
                tokio::spawn(worker.run(receiver).instrument(info_span!("worker", worker = id)))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop
    pub async fn join(self) -> Result<(), EngineError> {
        let mut failure = None;
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker task failed");
                failure.get_or_insert_with(|| EngineError::Worker(err.to_string()));
            }
        }
        failure.map_or(Ok(()), Err)
    }
}
