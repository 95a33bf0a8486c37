//! Lazy, restartable enumeration of work units

use super::{non_empty, Catalog, CatalogFilter, CatalogRow};
use crate::error::{CatalogError, EngineError};
use crate::types::{default_id, WorkUnit};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// A catalog page that could not be fetched
#[derive(Debug, thiserror::Error)]
#[error("Enumeration failed at page {page}: {source}")]
pub struct EnumerationFailure {
    pub page: u64,
    #[source]
    pub source: CatalogError,
}

impl From<EnumerationFailure> for EngineError {
    fn from(failure: EnumerationFailure) -> Self {
        EngineError::Enumeration {
            page: failure.page,
            source: failure.source,
        }
    }
}

/// One row as seen by the enumerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enumerated {
    Unit(WorkUnit),
    /// Row that cannot become a unit; logged and skipped
    Rejected { sequence_index: u64, reason: String },
}

/// Turns a paginated [`Catalog`] into a stream of [`WorkUnit`]s
#[derive(Clone)]
pub struct CatalogEnumerator {
    catalog: Arc<dyn Catalog>,
    filter: CatalogFilter,
    page_size: usize,
}

struct PageState {
    catalog: Arc<dyn Catalog>,
    filter: CatalogFilter,
    page_size: usize,
    cursor: Option<String>,
    page: u64,
    next_index: u64,
    exhausted: bool,
}

impl CatalogEnumerator {
    pub fn new(catalog: Arc<dyn Catalog>, filter: CatalogFilter, page_size: usize) -> Self {
        Self {
            catalog,
            filter,
            page_size: page_size.max(1),
        }
    }

    /// Fresh stream over every row, starting from the first page
    ///
    /// Pages are fetched only as the stream is polled. The stream ends after
    /// the first failure.
    pub fn entries(&self) -> BoxStream<'static, Result<Enumerated, EnumerationFailure>> {
        let state = PageState {
            catalog: Arc::clone(&self.catalog),
            filter: self.filter.clone(),
            page_size: self.page_size,
            cursor: None,
            page: 0,
            next_index: 0,
            exhausted: false,
        };

        stream::try_unfold(state, |mut state| async move {
            if state.exhausted {
                return Ok(None);
            }

            let page_number = state.page;
            let page = state
                .catalog
                .fetch_page(&state.filter, state.cursor.as_deref(), state.page_size)
                .await
                .map_err(|source| EnumerationFailure {
                    page: page_number,
                    source,
                })?;

            debug!(
                catalog = state.catalog.name(),
                page = page_number,
                rows = page.rows.len(),
                "Fetched catalog page"
            );

            match page.next {
                Some(ref next) if state.cursor.as_deref() == Some(next.as_str()) => {
                    return Err(EnumerationFailure {
                        page: page_number,
                        source: CatalogError::InvalidCursor(next.clone()),
                    });
                }
                Some(next) => state.cursor = Some(next),
                None => state.exhausted = true,
            }
            state.page += 1;

            let entries: Vec<_> = page
                .rows
                .into_iter()
                .map(|row| {
                    let index = state.next_index;
                    state.next_index += 1;
                    Ok::<_, EnumerationFailure>(to_entry(row, index))
                })
                .collect();

            Ok(Some((stream::iter(entries), state)))
        })
        .try_flatten()
        .boxed()
    }

    /// Fresh stream of the accepted units only
    pub fn units(&self) -> BoxStream<'static, Result<WorkUnit, EnumerationFailure>> {
        self.entries()
            .try_filter_map(|entry| async move {
                Ok(match entry {
                    Enumerated::Unit(unit) => Some(unit),
                    Enumerated::Rejected { .. } => None,
                })
            })
            .boxed()
    }
}

fn to_entry(row: CatalogRow, sequence_index: u64) -> Enumerated {
    let target = non_empty(row.target);
    let id = non_empty(row.id).unwrap_or_else(|| default_id(&row.source, target.as_deref()));

    if id.is_empty() {
        return reject(sequence_index, "row has no id and no locators".to_string());
    }
    if id.contains(['\n', '\r']) {
        return reject(sequence_index, format!("unit id {:?} contains a line break", id));
    }

    Enumerated::Unit(WorkUnit {
        id,
        source: row.source,
        target,
        expected_hash: non_empty(row.expected_hash),
        sequence_index,
    })
}

fn reject(sequence_index: u64, reason: String) -> Enumerated {
    warn!(sequence_index, reason = %reason, "Rejecting catalog row");
    Enumerated::Rejected {
        sequence_index,
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    fn rows(n: usize) -> Vec<CatalogRow> {
        (0..n)
            .map(|i| {
                let target = format!("s3://dst/{}", i);
                CatalogRow::new(format!("s3://src/{}", i), Some(&target))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_units_span_pages_in_order() {
        let catalog = Arc::new(MemoryCatalog::new(rows(25)));
        let enumerator = CatalogEnumerator::new(catalog.clone(), CatalogFilter::default(), 10);

        let units: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
        assert_eq!(units.len(), 25);
        assert_eq!(units[0].id, "s3://dst/0");
        assert_eq!(units[24].sequence_index, 24);
        assert_eq!(catalog.pages_served(), 3);
    }

    #[tokio::test]
    async fn test_units_is_restartable() {
        let catalog = Arc::new(MemoryCatalog::new(rows(7)));
        let enumerator = CatalogEnumerator::new(catalog, CatalogFilter::default(), 3);

        let first: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
        let second: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_pages_are_fetched_lazily() {
        let catalog = Arc::new(MemoryCatalog::new(rows(30)));
        let enumerator = CatalogEnumerator::new(catalog.clone(), CatalogFilter::default(), 10);

        let first = enumerator.units().next().await.unwrap().unwrap();
        assert_eq!(first.sequence_index, 0);
        assert_eq!(catalog.pages_served(), 1);
    }

    #[tokio::test]
    async fn test_failure_carries_page_number() {
        let catalog = Arc::new(MemoryCatalog::new(rows(30)).with_failure_at(2));
        let enumerator = CatalogEnumerator::new(catalog, CatalogFilter::default(), 10);

        let mut stream = enumerator.units();
        let mut ok = 0;
        let failure = loop {
            match stream.next().await {
                Some(Ok(_)) => ok += 1,
                Some(Err(failure)) => break failure,
                None => panic!("stream ended without the injected failure"),
            }
        };
        assert_eq!(ok, 20);
        assert_eq!(failure.page, 2);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_rows_with_line_breaks_are_rejected() {
        let mut rows = rows(2);
        rows.insert(
            1,
            CatalogRow {
                id: Some("bad\nid".into()),
                ..CatalogRow::new("s3://src/x", None)
            },
        );
        let catalog = Arc::new(MemoryCatalog::new(rows));
        let enumerator = CatalogEnumerator::new(catalog, CatalogFilter::default(), 10);

        let entries: Vec<Enumerated> = enumerator.entries().try_collect().await.unwrap();
        assert!(matches!(entries[1], Enumerated::Rejected { sequence_index: 1, .. }));

        let units: Vec<WorkUnit> = enumerator.units().try_collect().await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].sequence_index, 2);
    }

    #[tokio::test]
    async fn test_empty_fields_normalize_to_absent() {
        let row = CatalogRow {
            id: Some(String::new()),
            source: "s3://src/a".into(),
            target: Some(String::new()),
            expected_hash: Some("  ".into()),
        };
        let Enumerated::Unit(unit) = to_entry(row, 0) else {
            panic!("row should be accepted");
        };
        assert_eq!(unit.id, "s3://src/a");
        assert_eq!(unit.target, None);
        assert_eq!(unit.expected_hash, None);
    }
}
