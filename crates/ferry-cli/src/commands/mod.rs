//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod checkpoint;
pub mod reconcile;
pub mod run;

use crate::error::{CliError, Result};
use crate::CatalogArgs;
use ferry_common::ObjectLocator;
use ferry_engine::catalog::{Catalog, CatalogFilter, CsvCatalog};
use ferry_engine::store::{ObjectStore, S3ObjectStore, StorageConfig};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// How a command finished when it did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    /// Units failed or reconciliation found drift
    Unclean,
}

impl Completion {
    pub fn exit_code(self) -> i32 {
        match self {
            Completion::Clean => 0,
            Completion::Unclean => 1,
        }
    }
}

/// `csv:PATH` or `postgres:TABLE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSpec {
    Csv(PathBuf),
    Postgres(String),
}

impl FromStr for CatalogSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("csv", path)) if !path.is_empty() => Ok(CatalogSpec::Csv(PathBuf::from(path))),
            Some(("postgres" | "pg", table)) if !table.is_empty() => Ok(CatalogSpec::Postgres(table.to_string())),
            _ => Err(CliError::InvalidCatalog(s.to_string()).to_string()),
        }
    }
}

impl fmt::Display for CatalogSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogSpec::Csv(path) => write!(f, "csv:{}", path.display()),
            CatalogSpec::Postgres(table) => write!(f, "postgres:{}", table),
        }
    }
}

pub async fn open_catalog(spec: &CatalogSpec, database_url: Option<&str>) -> Result<Arc<dyn Catalog>> {
    match spec {
        CatalogSpec::Csv(path) => Ok(Arc::new(CsvCatalog::new(path))),
        CatalogSpec::Postgres(table) => open_postgres(table, database_url).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(table: &str, database_url: Option<&str>) -> Result<Arc<dyn Catalog>> {
    let url = database_url.ok_or(CliError::MissingDatabaseUrl)?;
    let catalog = ferry_engine::catalog::PgCatalog::connect(url, table).await?;
    Ok(Arc::new(catalog))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_table: &str, _database_url: Option<&str>) -> Result<Arc<dyn Catalog>> {
    Err(CliError::PostgresDisabled)
}

pub async fn open_store() -> Result<Arc<dyn ObjectStore>> {
    let config = StorageConfig::from_env().map_err(|e| CliError::storage(e.to_string()))?;
    let store = S3ObjectStore::new(config)
        .await
        .map_err(|e| CliError::storage(e.to_string()))?;
    Ok(Arc::new(store))
}

pub fn parse_locator(value: &str) -> Result<ObjectLocator> {
    ObjectLocator::parse(value).map_err(|e| CliError::invalid_locator(value, e))
}

impl CatalogArgs {
    pub fn filter(&self) -> CatalogFilter {
        CatalogFilter {
            source_prefix: self.prefix.clone(),
        }
    }
}
