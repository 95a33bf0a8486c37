use super::Outcome;
use crate::error::TransferError;
use crate::store::ObjectStore;
use crate::types::WorkUnit;
use ferry_common::ObjectLocator;
use tracing::{debug, warn};

pub(super) async fn copy(
    store: &dyn ObjectStore,
    unit: &WorkUnit,
    rewrite_chunk_bytes: u64,
) -> Result<Outcome, TransferError> {
    let source = unit.source_locator()?;
    let target = unit.required_target()?;

    let meta = store
        .head(&source)
        .await?
        .ok_or_else(|| TransferError::fatal(format!("Source object not found: {}", source)))?;

    if meta.size <= rewrite_chunk_bytes {
        store.copy(&source, &target).await?;
        debug!(unit_id = %unit.id, bytes = meta.size, "Copied object");
        return Ok(Outcome::Copied {
            bytes: meta.size,
            chunks: 1,
        });
    }

    rewrite_loop(store, unit, &source, &target, rewrite_chunk_bytes).await
}

pub(super) async fn chunked_copy(
    store: &dyn ObjectStore,
    unit: &WorkUnit,
    rewrite_chunk_bytes: u64,
) -> Result<Outcome, TransferError> {
    let source = unit.source_locator()?;
    let target = unit.required_target()?;
    rewrite_loop(store, unit, &source, &target, rewrite_chunk_bytes).await
}

/// Call `rewrite` until the token comes back empty
///
/// A failure abandons the pending rewrite; the next attempt starts over.
async fn rewrite_loop(
    store: &dyn ObjectStore,
    unit: &WorkUnit,
    source: &ObjectLocator,
    target: &ObjectLocator,
    chunk_bytes: u64,
) -> Result<Outcome, TransferError> {
    let mut token: Option<String> = None;
    let mut chunks = 0u32;

    loop {
        let progress = match store.rewrite(source, target, token.as_deref(), chunk_bytes).await {
            Ok(progress) => progress,
            Err(err) => {
                if let Some(pending) = token.as_deref() {
                    if let Err(abort_err) = store.abort_rewrite(target, pending).await {
                        warn!(unit_id = %unit.id, error = %abort_err, "Failed to abort rewrite");
                    }
                }
                return Err(err.into());
            }
        };
        chunks += 1;

        debug!(
            unit_id = %unit.id,
            chunk = chunks,
            bytes_rewritten = progress.bytes_rewritten,
            total_bytes = progress.total_bytes,
            "Rewrite progress"
        );

        match progress.token {
            Some(next) => token = Some(next),
            None => {
                return Ok(Outcome::Copied {
                    bytes: progress.total_bytes,
                    chunks,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{Fault, MemoryObjectStore};

    fn unit(source: &str, target: &str) -> WorkUnit {
        WorkUnit::new(source, Some(target.to_string()), 0)
    }

    #[tokio::test]
    async fn test_small_object_single_copy() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", "abc");

        let outcome = copy(&store, &unit("s3://src/a", "s3://dst/a"), 10).await.unwrap();
        assert_eq!(outcome, Outcome::Copied { bytes: 3, chunks: 1 });
        assert_eq!(store.contents("s3://dst/a").unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_large_object_uses_rewrite() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", vec![7u8; 35]);

        let outcome = copy(&store, &unit("s3://src/a", "s3://dst/a"), 10).await.unwrap();
        assert_eq!(outcome, Outcome::Copied { bytes: 35, chunks: 4 });
        assert_eq!(store.contents("s3://dst/a").unwrap().len(), 35);
    }

    #[tokio::test]
    async fn test_chunked_copy_always_rewrites() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", vec![1u8; 5]);

        let outcome = chunked_copy(&store, &unit("s3://src/a", "s3://dst/a"), 10).await.unwrap();
        assert_eq!(outcome, Outcome::Copied { bytes: 5, chunks: 1 });
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let store = MemoryObjectStore::new();
        let err = copy(&store, &unit("s3://src/none", "s3://dst/none"), 10).await.unwrap_err();
        assert!(matches!(err, TransferError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_missing_target_is_fatal() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", "abc");
        let err = copy(&store, &WorkUnit::new("s3://src/a", None, 0), 10).await.unwrap_err();
        assert!(err.cause().contains("no target"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retryable() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", "abc");
        store.fail_always("s3://dst/a", Fault::Transient);

        let err = copy(&store, &unit("s3://src/a", "s3://dst/a"), 10).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
