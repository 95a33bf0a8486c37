//! S3 object store against a MinIO container
//!
//! **Running tests**:
//! ```bash
//! cargo test -p ferry-engine --test s3_store_tests -- --ignored
//! ```

mod common;

use bytes::Bytes;
use common::*;
use ferry_common::ObjectLocator;
use ferry_engine::catalog::{CatalogFilter, CatalogRow, MemoryCatalog};
use ferry_engine::store::{list_all, ObjectStore, S3ObjectStore, StorageConfig};
use ferry_engine::transfer::{ArchiveOptions, TransferOperation};
use ferry_engine::Engine;
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

fn loc(key: &str) -> ObjectLocator {
    ObjectLocator::new("s3", TEST_BUCKET, key).unwrap()
}

async fn store(minio: &TestMinio) -> S3ObjectStore {
    S3ObjectStore::new(StorageConfig::for_minio(minio.endpoint()))
        .await
        .expect("Failed to create S3 store")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_put_head_get_delete() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let store = store(&minio).await;

    store.put(&loc("basic/a.txt"), Bytes::from_static(b"test")).await.unwrap();
    let meta = store.head(&loc("basic/a.txt")).await.unwrap().unwrap();
    assert_eq!(meta.size, 4);
    assert_eq!(meta.md5.as_deref(), Some("098f6bcd4621d373cade4e832627b4f6"));
    assert_eq!(store.get(&loc("basic/a.txt")).await.unwrap(), Bytes::from_static(b"test"));

    store.delete(&loc("basic/a.txt")).await.unwrap();
    store.delete(&loc("basic/a.txt")).await.unwrap();
    assert!(store.head(&loc("basic/a.txt")).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_list_pages_through_prefix() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let store = store(&minio).await;

    for i in 0..5 {
        store
            .put(&loc(&format!("listing/{}.txt", i)), Bytes::from(vec![b'x'; i]))
            .await
            .unwrap();
    }
    store.put(&loc("other/x.txt"), Bytes::from_static(b"x")).await.unwrap();

    let listed = list_all(&store, &loc("listing/")).await.unwrap();
    assert_eq!(listed.len(), 5);
    assert!(listed.iter().all(|l| l.key().starts_with("listing/")));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rewrite_with_upload_part_copy() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let store = store(&minio).await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(11 * MIB).collect();
    store.put(&loc("big/source.bin"), Bytes::from(payload.clone())).await.unwrap();

    let mut token = None;
    let mut calls = 0;
    loop {
        let progress = store
            .rewrite(&loc("big/source.bin"), &loc("big/copy.bin"), token.as_deref(), 5 * MIB as u64)
            .await
            .unwrap();
        calls += 1;
        if progress.is_done() {
            break;
        }
        token = progress.token;
    }
    assert!(calls >= 3);
    assert_eq!(store.get(&loc("big/copy.bin")).await.unwrap().to_vec(), payload);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_archive_run_against_minio() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let store = Arc::new(store(&minio).await);

    for i in 0..3 {
        store
            .put(&loc(&format!("series/1/{}.dcm", i)), Bytes::from(vec![i as u8; 2 * MIB]))
            .await
            .unwrap();
    }
    let target = loc("archives/series-1.zip").to_string();
    let rows = vec![CatalogRow::new(loc("series/1/").to_string(), Some(&target))];
    let operation = TransferOperation::ArchiveCreate(ArchiveOptions {
        part_bytes: 5 * MIB as u64,
        timestamp: None,
    });
    let (_dir, checkpoint) = checkpoint().await;

    let engine = Engine::new(fast_config(), Arc::new(MemoryCatalog::new(rows)), store.clone(), operation);
    let summary = engine.run(&CatalogFilter::default(), checkpoint).await.unwrap();
    assert_eq!(summary.succeeded, 1, "archive failed: {:?}", summary);

    let report = engine.reconcile(&CatalogFilter::default(), &loc("archives/")).await.unwrap();
    assert!(report.is_clean());
}
