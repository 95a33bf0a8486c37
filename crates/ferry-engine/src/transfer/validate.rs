use super::Outcome;
use crate::error::TransferError;
use crate::store::ObjectStore;
use crate::types::WorkUnit;
use ferry_common::checksum;
use tracing::debug;

/// Compare the stored MD5 of the target (or the source, for units without
/// one) with the unit's expected hash
pub(super) async fn validate(store: &dyn ObjectStore, unit: &WorkUnit) -> Result<Outcome, TransferError> {
    let locator = match unit.target_locator()? {
        Some(target) => target,
        None => unit.source_locator()?,
    };

    let expected = unit
        .expected_hash
        .as_deref()
        .ok_or_else(|| TransferError::fatal(format!("Malformed unit: {} has no expected hash", unit.id)))?;

    let meta = store
        .head(&locator)
        .await?
        .ok_or_else(|| TransferError::fatal(format!("Object not found: {}", locator)))?;
    let actual = meta
        .md5
        .ok_or_else(|| TransferError::fatal(format!("Store reports no MD5 for {}", locator)))?;

    checksum::verify_md5(expected, &actual)
        .map_err(|e| TransferError::fatal(format!("{} for {}", e, locator)))?;

    debug!(unit_id = %unit.id, md5 = %actual, "Checksum verified");
    Ok(Outcome::Validated { md5: actual })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    const TEST_MD5: &str = "098f6bcd4621d373cade4e832627b4f6";

    #[tokio::test]
    async fn test_accepts_hex_and_base64() {
        let store = MemoryObjectStore::new();
        store.insert("s3://dst/a", "test");

        let hex = WorkUnit::new("s3://src/a", Some("s3://dst/a".into()), 0)
            .with_expected_hash(TEST_MD5.to_uppercase());
        assert_eq!(
            validate(&store, &hex).await.unwrap(),
            Outcome::Validated { md5: TEST_MD5.into() }
        );

        let b64 = WorkUnit::new("s3://src/a", Some("s3://dst/a".into()), 0)
            .with_expected_hash("CY9rzUYh03PK3k6DJie09g==");
        assert!(validate(&store, &b64).await.is_ok());
    }

    #[tokio::test]
    async fn test_falls_back_to_source() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", "test");
        let unit = WorkUnit::new("s3://src/a", None, 0).with_expected_hash(TEST_MD5);
        assert!(validate(&store, &unit).await.is_ok());
    }

    #[tokio::test]
    async fn test_failures_are_fatal() {
        let store = MemoryObjectStore::new();
        store.insert("s3://src/a", "not test");

        let mismatch = WorkUnit::new("s3://src/a", None, 0).with_expected_hash(TEST_MD5);
        let err = validate(&store, &mismatch).await.unwrap_err();
        assert!(matches!(err, TransferError::Fatal(_)));
        assert!(err.cause().contains("mismatch"));

        let missing = WorkUnit::new("s3://src/none", None, 0).with_expected_hash(TEST_MD5);
        assert!(matches!(validate(&store, &missing).await, Err(TransferError::Fatal(_))));

        let no_hash = WorkUnit::new("s3://src/a", None, 0);
        assert!(matches!(validate(&store, &no_hash).await, Err(TransferError::Fatal(_))));

        let garbage = WorkUnit::new("s3://src/a", None, 0).with_expected_hash("xyz");
        assert!(matches!(validate(&store, &garbage).await, Err(TransferError::Fatal(_))));
    }
}
