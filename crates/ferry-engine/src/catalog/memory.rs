//! In-memory catalog for tests and small ad-hoc runs

use super::{Catalog, CatalogFilter, CatalogResult, CatalogRow, Page};
use crate::error::CatalogError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rows held in a vector; the cursor is the offset of the next row
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rows: Vec<CatalogRow>,
    failure_at: Option<u64>,
    pages_served: AtomicU64,
}

impl MemoryCatalog {
    pub fn new(rows: Vec<CatalogRow>) -> Self {
        Self {
            rows,
            failure_at: None,
            pages_served: AtomicU64::new(0),
        }
    }

    /// Fail every fetch of the given zero-based page
    pub fn with_failure_at(mut self, page: u64) -> Self {
        self.failure_at = Some(page);
        self
    }

    /// Pages returned successfully so far
    pub fn pages_served(&self) -> u64 {
        self.pages_served.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_page(
        &self,
        filter: &CatalogFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> CatalogResult<Page> {
        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| CatalogError::InvalidCursor(c.to_string()))?,
            None => 0,
        };
        let page_size = page_size.max(1);

        if self.failure_at == Some((offset / page_size) as u64) {
            return Err(CatalogError::Backend(format!(
                "injected failure at offset {}",
                offset
            )));
        }

        let matching: Vec<&CatalogRow> = self
            .rows
            .iter()
            .filter(|row| filter.matches(&row.source))
            .collect();

        let end = (offset + page_size).min(matching.len());
        let rows = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|row| (*row).clone())
            .collect();
        let next = (end < matching.len()).then(|| end.to_string());

        self.pages_served.fetch_add(1, Ordering::Relaxed);
        Ok(Page { rows, next })
    }
}
