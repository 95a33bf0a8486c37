//! Work catalogs
//!
//! A [`Catalog`] serves rows describing work units one page at a time. The
//! cursor is opaque to everyone but the backend that produced it.

use crate::error::CatalogError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod csv;
pub mod enumerator;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use self::csv::CsvCatalog;
pub use enumerator::{CatalogEnumerator, EnumerationFailure};
pub use memory::MemoryCatalog;
#[cfg(feature = "postgres")]
pub use postgres::PgCatalog;

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Restricts which rows a catalog returns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFilter {
    /// Only rows whose source locator starts with this string
    pub source_prefix: Option<String>,
}

impl CatalogFilter {
    pub fn with_source_prefix(prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: Some(prefix.into()),
        }
    }

    pub fn matches(&self, source: &str) -> bool {
        self.source_prefix
            .as_deref()
            .map_or(true, |prefix| source.starts_with(prefix))
    }
}

/// One catalog row as stored by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    /// Explicit unit id; derived from the locators when absent
    pub id: Option<String>,
    pub source: String,
    pub target: Option<String>,
    pub expected_hash: Option<String>,
}

impl CatalogRow {
    pub fn new(source: impl Into<String>, target: Option<&str>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.map(str::to_string),
            expected_hash: None,
        }
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }
}

/// A page of rows; `next` is `None` on the last page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub rows: Vec<CatalogRow>,
    pub next: Option<String>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Fetch up to `page_size` rows after `cursor` (`None` for the first page)
    async fn fetch_page(
        &self,
        filter: &CatalogFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> CatalogResult<Page>;
}

/// Treat empty strings as absent values
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
