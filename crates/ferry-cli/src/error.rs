//! Error types for the ferry CLI
//!
//! Messages are user-facing and say what to check next.

use ferry_engine::error::{CatalogError, CheckpointError, ConfigError, EngineError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Catalog argument is not `csv:PATH` or `postgres:TABLE`
    #[error("Invalid catalog '{0}'. Expected 'csv:PATH' or 'postgres:TABLE'.")]
    InvalidCatalog(String),

    #[error("A postgres catalog needs a connection string. Pass --database-url or set DATABASE_URL.")]
    MissingDatabaseUrl,

    #[error("This build has no PostgreSQL support. Rebuild ferry with the 'postgres' feature.")]
    PostgresDisabled,

    #[error("Invalid locator '{locator}': {reason}. Expected 'scheme://bucket/prefix'.")]
    InvalidLocator { locator: String, reason: String },

    #[error("Configuration error: {0}. Check FERRY_* environment variables and flags.")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Checkpoint error: {0}. Check that the checkpoint directory is readable and writable.")]
    Checkpoint(#[from] CheckpointError),

    #[error("Object store error: {0}. Check S3_ENDPOINT, S3_REGION and credentials.")]
    Storage(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invalid_locator(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidLocator {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}
