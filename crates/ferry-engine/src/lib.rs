//! Ferry transfer engine
//!
//! Enumerates work units from a [`catalog::Catalog`], skips what the
//! [`checkpoint::Checkpoint`] already records, fans batches out to a pool of
//! workers that apply a [`transfer::TransferOperation`] against an
//! [`store::ObjectStore`], and afterwards reconciles the catalog against the
//! target namespace.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferry_engine::catalog::{CatalogFilter, CsvCatalog};
//! use ferry_engine::checkpoint::Checkpoint;
//! use ferry_engine::config::EngineConfig;
//! use ferry_engine::engine::Engine;
//! use ferry_engine::store::{S3ObjectStore, StorageConfig};
//! use ferry_engine::transfer::{OperationKind, TransferOperation};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let store = Arc::new(S3ObjectStore::new(StorageConfig::from_env()?).await?);
//! let catalog = Arc::new(CsvCatalog::new("manifest.csv"));
//! let operation = TransferOperation::from_config(OperationKind::Copy, &config);
//!
//! let checkpoint = Arc::new(Checkpoint::open("./checkpoint").await?);
//! let engine = Engine::new(config, catalog, store, operation);
//! let summary = engine.run(&CatalogFilter::default(), checkpoint).await?;
//! println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pool;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod transfer;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, TransferError};
pub use types::{Batch, RunSummary, WorkUnit};
