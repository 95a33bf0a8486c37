//! Engine configuration
//!
//! Plain scalars with defaults, overridable from `FERRY_*` environment
//! variables (a `.env` file is loaded first) and then from CLI flags.
//! [`EngineConfig::validate`] runs once before a run starts.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Smallest multipart part S3 accepts (except the last)
pub const MIN_PART_BYTES: u64 = 5 * MIB;
/// Largest multipart part or single server-side copy S3 accepts
pub const MAX_PART_BYTES: u64 = 5 * 1024 * MIB;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Parallel worker tasks
    pub workers: usize,
    /// Units per dispatched batch
    pub batch_size: usize,
    /// Attempts per unit, including the first
    pub max_attempts: u32,
    /// Rows requested per catalog page
    pub page_size: usize,
    /// Bounded queue capacity in batches; 0 means twice the worker count
    pub queue_depth: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: bool,
    /// Bytes copied per rewrite call; objects at or below this use a single copy
    pub rewrite_chunk_bytes: u64,
    /// Archive bytes buffered per multipart upload part
    pub archive_part_bytes: u64,
    /// Re-admit units recorded in the error log
    pub retry_failed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            batch_size: 100,
            max_attempts: 3,
            page_size: 1000,
            queue_depth: 0,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            backoff_jitter: true,
            rewrite_chunk_bytes: 512 * MIB,
            archive_part_bytes: 8 * MIB,
            retry_failed: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults, malformed values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        set_from_env(&mut config.workers, "FERRY_WORKERS")?;
        set_from_env(&mut config.batch_size, "FERRY_BATCH_SIZE")?;
        set_from_env(&mut config.max_attempts, "FERRY_MAX_ATTEMPTS")?;
        set_from_env(&mut config.page_size, "FERRY_PAGE_SIZE")?;
        set_from_env(&mut config.queue_depth, "FERRY_QUEUE_DEPTH")?;
        set_from_env(&mut config.backoff_base_ms, "FERRY_BACKOFF_BASE_MS")?;
        set_from_env(&mut config.backoff_max_ms, "FERRY_BACKOFF_MAX_MS")?;
        set_from_env(&mut config.backoff_jitter, "FERRY_BACKOFF_JITTER")?;
        set_from_env(&mut config.rewrite_chunk_bytes, "FERRY_REWRITE_CHUNK_BYTES")?;
        set_from_env(&mut config.archive_part_bytes, "FERRY_ARCHIVE_PART_BYTES")?;
        set_from_env(&mut config.retry_failed, "FERRY_RETRY_FAILED")?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be greater than 0"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::invalid("page_size", "must be greater than 0"));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::invalid(
                "backoff_base_ms",
                format!("({}) must not exceed backoff_max_ms ({})", self.backoff_base_ms, self.backoff_max_ms),
            ));
        }
        check_part_bounds("rewrite_chunk_bytes", self.rewrite_chunk_bytes)?;
        check_part_bounds("archive_part_bytes", self.archive_part_bytes)?;
        Ok(())
    }

    /// Queue capacity in batches
    pub fn effective_queue_depth(&self) -> usize {
        if self.queue_depth == 0 {
            self.workers.saturating_mul(2).max(1)
        } else {
            self.queue_depth
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
        }
    }
}

fn check_part_bounds(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(MIN_PART_BYTES..=MAX_PART_BYTES).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("({}) must be between {} and {} bytes", value, MIN_PART_BYTES, MAX_PART_BYTES),
        ));
    }
    Ok(())
}

fn set_from_env<T>(slot: &mut T, var: &str) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(value) = std::env::var(var) else {
        return Ok(());
    };
    *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        value: value.clone(),
        reason: e.to_string(),
    })?;
    Ok(())
}
