//! PostgreSQL catalog against a testcontainers database
//!
//! ```bash
//! cargo test -p ferry-engine --features postgres --test postgres_catalog_tests -- --ignored
//! ```

#![cfg(feature = "postgres")]

mod common;

use common::*;
use ferry_engine::catalog::{Catalog, CatalogEnumerator, CatalogFilter, PgCatalog};
use ferry_engine::checkpoint::CheckpointState;
use ferry_engine::transfer::{OperationKind, TransferOperation};
use ferry_engine::{Engine, WorkUnit};
use futures::TryStreamExt;
use std::sync::Arc;

async fn seed(pg: &TestPostgres, rows: &[(Option<&str>, &str, Option<&str>)]) {
    sqlx::query(
        "CREATE TABLE transfer_units (\
            unit_id TEXT NULL, source TEXT NOT NULL, target TEXT NULL, expected_hash TEXT NULL)",
    )
    .execute(pg.pool())
    .await
    .expect("create table");

    for &(id, source, target) in rows {
        sqlx::query("INSERT INTO transfer_units (unit_id, source, target) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(source)
            .bind(target)
            .execute(pg.pool())
            .await
            .expect("insert row");
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_keyset_pages_in_order() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let rows: Vec<(Option<&str>, &str, Option<&str>)> = vec![
        (None, "s3://src/c", Some("s3://dst/c")),
        (None, "s3://src/a", Some("s3://dst/a")),
        (Some("custom"), "s3://src/b", None),
        (None, "s3://src/d", Some("s3://dst/d")),
        (None, "s3://src/e", Some("s3://dst/e")),
    ];
    seed(&pg, &rows).await;

    let catalog = PgCatalog::new(pg.pool().clone(), "transfer_units").unwrap();
    let first = catalog.fetch_page(&CatalogFilter::default(), None, 2).await.unwrap();
    assert_eq!(first.rows.len(), 2);
    assert!(first.next.is_some());

    let enumerator = CatalogEnumerator::new(Arc::new(catalog), CatalogFilter::default(), 2);
    let units: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
    let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
    // ordered by COALESCE(target, source)
    assert_eq!(ids, vec!["s3://dst/a", "s3://dst/c", "s3://dst/d", "s3://dst/e", "custom"]);
    assert_eq!(units.last().unwrap().source, "s3://src/b");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rows_sharing_locators_survive_page_boundaries() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    seed(
        &pg,
        &[
            (Some("scan-3"), "s3://src/shared", Some("s3://dst/shared")),
            (Some("scan-1"), "s3://src/shared", Some("s3://dst/shared")),
            (None, "s3://src/shared", Some("s3://dst/shared")),
            (Some("scan-2"), "s3://src/shared", Some("s3://dst/shared")),
        ],
    )
    .await;

    let catalog = PgCatalog::new(pg.pool().clone(), "transfer_units").unwrap();
    let enumerator = CatalogEnumerator::new(Arc::new(catalog), CatalogFilter::default(), 1);
    let units: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
    let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
    // the row without an id sorts first and takes its target as id
    assert_eq!(ids, vec!["s3://dst/shared", "scan-1", "scan-2", "scan-3"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_prefix_filter_is_literal() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    seed(
        &pg,
        &[
            (None, "s3://src/a_1/x", Some("s3://dst/1")),
            (None, "s3://src/ab1/x", Some("s3://dst/2")),
        ],
    )
    .await;

    let catalog = PgCatalog::new(pg.pool().clone(), "transfer_units").unwrap();
    let page = catalog
        .fetch_page(&CatalogFilter::with_source_prefix("s3://src/a_"), None, 10)
        .await
        .unwrap();
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].source, "s3://src/a_1/x");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_engine_run_from_postgres() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    seed(
        &pg,
        &[
            (None, "s3://src/a", Some("s3://dst/a")),
            (None, "s3://src/b", Some("s3://dst/b")),
        ],
    )
    .await;
    let store = seeded_store(&["a", "b"]);
    let (dir, checkpoint) = checkpoint().await;

    let config = fast_config();
    let operation = TransferOperation::from_config(OperationKind::Copy, &config);
    let catalog = PgCatalog::new(pg.pool().clone(), "transfer_units").unwrap();
    let engine = Engine::new(config, Arc::new(catalog), Arc::new(store), operation);

    let summary = engine.run(&CatalogFilter::default(), checkpoint).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    let state = CheckpointState::read(dir.path()).await.unwrap();
    assert!(state.is_completed("s3://dst/a") && state.is_completed("s3://dst/b"));
}
