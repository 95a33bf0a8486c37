//! Error types for the transfer engine
//!
//! Per-unit failures are [`TransferError`]s and never leave a worker. Only
//! configuration, checkpoint, and enumeration failures surface as
//! [`EngineError`] and end a run.

use std::path::PathBuf;
use thiserror::Error;

/// Object store failures, classified by how the caller should react
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object (or upload) does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Throttling, timeouts, 5xx: worth retrying
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Access denied, bad request, invalid state: retrying will not help
    #[error("Storage error: {0}")]
    Permanent(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Catalog backend failures
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog backend error: {0}")]
    Backend(String),

    #[error("Invalid catalog cursor '{0}'")]
    InvalidCursor(String),

    #[error("Invalid catalog configuration: {0}")]
    Config(String),

    #[error("Failed to read catalog manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[cfg(feature = "postgres")]
    #[error("Catalog query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Checkpoint log failures
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Ids are written one per line, so they may not contain line breaks
    #[error("Invalid checkpoint id {0:?}: ids may not contain line breaks")]
    InvalidId(String),

    #[error("Checkpoint is closed")]
    Closed,

    #[error("Checkpoint I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid engine configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed unit attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Transient failure, retried with backoff
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure, recorded immediately
    #[error("{0}")]
    Fatal(String),
}

impl TransferError {
    pub fn retryable(cause: impl Into<String>) -> Self {
        Self::Retryable(cause.into())
    }

    pub fn fatal(cause: impl Into<String>) -> Self {
        Self::Fatal(cause.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn cause(&self) -> &str {
        match self {
            Self::Retryable(cause) | Self::Fatal(cause) => cause,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(_) => Self::Retryable(err.to_string()),
            StoreError::NotFound(_) | StoreError::Permanent(_) => Self::Fatal(err.to_string()),
        }
    }
}

impl From<ferry_common::CommonError> for TransferError {
    fn from(err: ferry_common::CommonError) -> Self {
        Self::Fatal(err.to_string())
    }
}

/// Errors that end a run
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Enumeration failed at page {page}: {source}")]
    Enumeration {
        page: u64,
        #[source]
        source: CatalogError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
