//! Transfer operations
//!
//! The operation for a run is chosen once from [`OperationKind`] and applied
//! to every unit. Operations are idempotent per unit: running one twice
//! leaves the same end state.

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::store::ObjectStore;
use crate::types::WorkUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod archive;
mod copy;
mod delete;
mod validate;
pub mod zipstream;

pub use archive::ArchiveOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Copy,
    Delete,
    ChunkedCopy,
    #[serde(rename = "archive")]
    ArchiveCreate,
    #[serde(rename = "validate")]
    HashValidate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Copy,
        OperationKind::Delete,
        OperationKind::ChunkedCopy,
        OperationKind::ArchiveCreate,
        OperationKind::HashValidate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Delete => "delete",
            OperationKind::ChunkedCopy => "chunked-copy",
            OperationKind::ArchiveCreate => "archive",
            OperationKind::HashValidate => "validate",
        }
    }

    /// Whether units must name a target
    pub fn writes_target(self) -> bool {
        matches!(
            self,
            OperationKind::Copy | OperationKind::ChunkedCopy | OperationKind::ArchiveCreate
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown operation '{}' (expected one of: copy, delete, chunked-copy, archive, validate)",
                    s
                )
            })
    }
}

/// What a successful operation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Copied { bytes: u64, chunks: u32 },
    Deleted { existed: bool },
    Archived { entries: usize, bytes: u64 },
    Validated { md5: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOperation {
    /// Single server-side copy, or chunked rewrite above `rewrite_chunk_bytes`
    Copy { rewrite_chunk_bytes: u64 },
    /// Always the chunked rewrite loop
    ChunkedCopy { rewrite_chunk_bytes: u64 },
    Delete,
    ArchiveCreate(ArchiveOptions),
    HashValidate,
}

impl TransferOperation {
    pub fn from_config(kind: OperationKind, config: &EngineConfig) -> Self {
        match kind {
            OperationKind::Copy => TransferOperation::Copy {
                rewrite_chunk_bytes: config.rewrite_chunk_bytes,
            },
            OperationKind::ChunkedCopy => TransferOperation::ChunkedCopy {
                rewrite_chunk_bytes: config.rewrite_chunk_bytes,
            },
            OperationKind::Delete => TransferOperation::Delete,
            OperationKind::ArchiveCreate => TransferOperation::ArchiveCreate(ArchiveOptions {
                part_bytes: config.archive_part_bytes,
                timestamp: None,
            }),
            OperationKind::HashValidate => TransferOperation::HashValidate,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            TransferOperation::Copy { .. } => OperationKind::Copy,
            TransferOperation::ChunkedCopy { .. } => OperationKind::ChunkedCopy,
            TransferOperation::Delete => OperationKind::Delete,
            TransferOperation::ArchiveCreate(_) => OperationKind::ArchiveCreate,
            TransferOperation::HashValidate => OperationKind::HashValidate,
        }
    }

    /// Apply the operation to one unit
    pub async fn apply(&self, store: &dyn ObjectStore, unit: &WorkUnit) -> Result<Outcome, TransferError> {
        match self {
            TransferOperation::Copy { rewrite_chunk_bytes } => {
                copy::copy(store, unit, *rewrite_chunk_bytes).await
            }
            TransferOperation::ChunkedCopy { rewrite_chunk_bytes } => {
                copy::chunked_copy(store, unit, *rewrite_chunk_bytes).await
            }
            TransferOperation::Delete => delete::delete(store, unit).await,
            TransferOperation::ArchiveCreate(options) => archive::create(store, unit, options).await,
            TransferOperation::HashValidate => validate::validate(store, unit).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_strings() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
        assert_eq!("COPY".parse::<OperationKind>().unwrap(), OperationKind::Copy);
        assert!("move".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_from_config_carries_sizes() {
        let config = EngineConfig::default();
        let op = TransferOperation::from_config(OperationKind::ArchiveCreate, &config);
        assert_eq!(op.kind(), OperationKind::ArchiveCreate);
        match op {
            TransferOperation::ArchiveCreate(options) => {
                assert_eq!(options.part_bytes, config.archive_part_bytes)
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }
}
