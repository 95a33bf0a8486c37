//! Post-hoc set reconciliation
//!
//! The expected set comes from re-enumerating the catalog, never from the
//! checkpoint: the checkpoint records what was attempted, not what is present.
//! The actual set is a full listing of the target prefix. Nothing is repaired.

use crate::catalog::CatalogEnumerator;
use crate::error::EngineError;
use crate::store::{list_all, ObjectStore};
use ferry_common::ObjectLocator;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub expected: usize,
    pub actual: usize,
    /// Expected but absent, sorted
    pub missing: Vec<String>,
    /// Present but not expected, sorted
    pub unexpected: Vec<String>,
    /// Catalog units with no target, which take no part in the diff
    pub units_without_target: u64,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// `(expected - actual, actual - expected)`, both sorted
pub fn diff(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let missing = expected.difference(actual).cloned().collect();
    let unexpected = actual.difference(expected).cloned().collect();
    (missing, unexpected)
}

pub struct Reconciler {
    enumerator: CatalogEnumerator,
    store: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(enumerator: CatalogEnumerator, store: Arc<dyn ObjectStore>) -> Self {
        Self { enumerator, store }
    }

    #[instrument(skip(self), fields(target_prefix = %target_prefix))]
    pub async fn reconcile(&self, target_prefix: &ObjectLocator) -> Result<ReconcileReport, EngineError> {
        let mut expected = BTreeSet::new();
        let mut units_without_target = 0u64;

        let mut units = self.enumerator.units();
        while let Some(unit) = units.try_next().await? {
            match unit.target {
                Some(target) => {
                    expected.insert(canonical(target));
                }
                None => units_without_target += 1,
            }
        }

        let actual: BTreeSet<String> = list_all(self.store.as_ref(), target_prefix)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect();

        let (missing, unexpected) = diff(&expected, &actual);
        let report = ReconcileReport {
            expected: expected.len(),
            actual: actual.len(),
            missing,
            unexpected,
            units_without_target,
        };

        if report.is_clean() {
            info!(expected = report.expected, actual = report.actual, "Reconciliation clean");
        } else {
            warn!(
                expected = report.expected,
                actual = report.actual,
                missing = report.missing.len(),
                unexpected = report.unexpected.len(),
                "Reconciliation found drift"
            );
        }
        Ok(report)
    }
}

/// Display form of the parsed locator; strings that do not parse are kept as is
fn canonical(target: String) -> String {
    match ObjectLocator::parse(&target) {
        Ok(locator) => locator.to_string(),
        Err(_) => target,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogFilter, CatalogRow, MemoryCatalog};
    use crate::store::MemoryObjectStore;
    use proptest::prelude::*;

    fn reconciler(rows: Vec<CatalogRow>, store: &MemoryObjectStore) -> Reconciler {
        let enumerator = CatalogEnumerator::new(Arc::new(MemoryCatalog::new(rows)), CatalogFilter::default(), 2);
        Reconciler::new(enumerator, Arc::new(store.clone()))
    }

    fn rows(names: &[&str]) -> Vec<CatalogRow> {
        names
            .iter()
            .map(|n| CatalogRow::new(format!("s3://src/{}", n), Some(&format!("s3://dst/{}", n))))
            .collect()
    }

    #[tokio::test]
    async fn test_clean_when_sets_match() {
        let store = MemoryObjectStore::new();
        for n in ["a", "b", "c"] {
            store.insert(&format!("s3://dst/{}", n), "x");
        }
        let report = reconciler(rows(&["a", "b", "c"]), &store)
            .reconcile(&ObjectLocator::parse("s3://dst/").unwrap())
            .await
            .unwrap();
        assert!(report.is_clean());
        assert_eq!((report.expected, report.actual), (3, 3));
    }

    #[tokio::test]
    async fn test_reports_missing_and_unexpected() {
        let store = MemoryObjectStore::new().with_list_page_size(1);
        store.insert("s3://dst/a", "x");
        store.insert("s3://dst/stale", "x");
        store.insert("s3://elsewhere/b", "x");

        let mut catalog = rows(&["a", "b"]);
        catalog.push(CatalogRow::new("s3://src/only-source", None));
        let report = reconciler(catalog, &store)
            .reconcile(&ObjectLocator::parse("s3://dst/").unwrap())
            .await
            .unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.missing, vec!["s3://dst/b"]);
        assert_eq!(report.unexpected, vec!["s3://dst/stale"]);
        assert_eq!(report.units_without_target, 1);
    }

    #[tokio::test]
    async fn test_does_not_touch_the_store() {
        let store = MemoryObjectStore::new();
        store.insert("s3://dst/a", "x");
        reconciler(rows(&["b"]), &store)
            .reconcile(&ObjectLocator::parse("s3://dst/").unwrap())
            .await
            .unwrap();
        assert_eq!(store.keys(), vec!["s3://dst/a"]);
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error() {
        let store = MemoryObjectStore::new();
        store.fail_always("s3://dst/", crate::store::Fault::Permanent);
        let result = reconciler(rows(&["a"]), &store)
            .reconcile(&ObjectLocator::parse("s3://dst/").unwrap())
            .await;
        assert!(matches!(result, Err(EngineError::Store(_))));
    }

    proptest! {
        #[test]
        fn diff_is_empty_iff_sets_equal(
            expected in proptest::collection::btree_set("[a-e]{1,2}", 0..12),
            actual in proptest::collection::btree_set("[a-e]{1,2}", 0..12),
        ) {
            let (missing, unexpected) = diff(&expected, &actual);
            prop_assert_eq!(missing.is_empty() && unexpected.is_empty(), expected == actual);
            for m in &missing {
                prop_assert!(expected.contains(m) && !actual.contains(m));
            }
            for u in &unexpected {
                prop_assert!(actual.contains(u) && !expected.contains(u));
            }
            prop_assert!(missing.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn diff_of_identical_sets_is_clean(set in proptest::collection::btree_set("[a-z]{1,4}", 0..20)) {
            let (missing, unexpected) = diff(&set, &set);
            prop_assert!(missing.is_empty());
            prop_assert!(unexpected.is_empty());
        }
    }
}
