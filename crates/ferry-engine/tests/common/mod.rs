//! Shared fixtures for ferry-engine integration tests
//!
//! In-memory fixtures need nothing external. [`TestMinio`] and
//! [`TestPostgres`] start containers through testcontainers and are only used
//! by tests marked `#[ignore = "requires Docker"]`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use ferry_engine::catalog::{CatalogRow, MemoryCatalog};
use ferry_engine::checkpoint::Checkpoint;
use ferry_engine::config::EngineConfig;
use ferry_engine::store::MemoryObjectStore;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::{debug, info};

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";
pub const TEST_BUCKET: &str = "ferry-test";

static TRACING: Once = Once::new();

/// Route engine logs to the test harness output
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ferry_engine=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// In-memory fixtures
// ============================================================================

/// Config with small batches and no backoff
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        workers: 3,
        batch_size: 2,
        page_size: 2,
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        backoff_jitter: false,
        ..EngineConfig::default()
    }
}

pub fn source(name: &str) -> String {
    format!("s3://src/{}", name)
}

pub fn target(name: &str) -> String {
    format!("s3://dst/{}", name)
}

/// Copy rows `s3://src/<name> -> s3://dst/<name>`
pub fn copy_rows(names: &[&str]) -> Vec<CatalogRow> {
    names
        .iter()
        .map(|name| CatalogRow::new(source(name), Some(&target(name))))
        .collect()
}

pub fn catalog(names: &[&str]) -> Arc<MemoryCatalog> {
    Arc::new(MemoryCatalog::new(copy_rows(names)))
}

/// Store holding `s3://src/<name>` for every name
pub fn seeded_store(names: &[&str]) -> MemoryObjectStore {
    let store = MemoryObjectStore::new();
    for name in names {
        store.insert(&source(name), format!("payload of {}", name));
    }
    store
}

/// Checkpoint directory that lives as long as the returned guard
pub async fn checkpoint() -> (TempDir, Arc<Checkpoint>) {
    let dir = TempDir::new().expect("create checkpoint dir");
    let checkpoint = Checkpoint::open(dir.path()).await.expect("open checkpoint");
    (dir, Arc::new(checkpoint))
}

pub async fn reopen(dir: &TempDir) -> Arc<Checkpoint> {
    Arc::new(Checkpoint::open(dir.path()).await.expect("reopen checkpoint"))
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    _container: ContainerAsync<GenericImage>,
    client: aws_sdk_s3::Client,
    endpoint: String,
}

impl TestMinio {
    /// Start MinIO and create [`TEST_BUCKET`]
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", MINIO_ACCESS_KEY)
            .with_env_var("MINIO_ROOT_PASSWORD", MINIO_SECRET_KEY)
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container.get_host().await.context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;
        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                MINIO_ACCESS_KEY,
                MINIO_SECRET_KEY,
                None,
                None,
                "ferry-test",
            ))
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(config);

        client
            .create_bucket()
            .bucket(TEST_BUCKET)
            .send()
            .await
            .context("Failed to create test bucket")?;

        Ok(Self {
            _container: container,
            client,
            endpoint,
        })
    }

    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

#[cfg(feature = "postgres")]
pub struct TestPostgres {
    _container: ContainerAsync<testcontainers_modules::postgres::Postgres>,
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = testcontainers_modules::postgres::Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}
