//! CSV manifest catalog
//!
//! A headered file with columns `source,target,expected_hash,unit_id`. Only
//! `source` is required and empty fields count as absent. The cursor is the
//! index of the next record. Sequential pages reuse one open reader; any other
//! cursor reopens the file and skips ahead.

use super::{non_empty, Catalog, CatalogFilter, CatalogResult, CatalogRow, Page};
use crate::error::CatalogError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ManifestRecord {
    source: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    expected_hash: Option<String>,
    #[serde(default)]
    unit_id: Option<String>,
}

impl From<ManifestRecord> for CatalogRow {
    fn from(record: ManifestRecord) -> Self {
        CatalogRow {
            id: non_empty(record.unit_id),
            source: record.source.trim().to_string(),
            target: non_empty(record.target).map(|t| t.trim().to_string()),
            expected_hash: non_empty(record.expected_hash).map(|h| h.trim().to_string()),
        }
    }
}

struct OpenManifest {
    reader: csv::Reader<File>,
    headers: csv::StringRecord,
    /// Index of the next record the reader will yield
    position: u64,
}

pub struct CsvCatalog {
    path: PathBuf,
    open: Arc<Mutex<Option<OpenManifest>>>,
}

impl CsvCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Catalog for CsvCatalog {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch_page(
        &self,
        filter: &CatalogFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> CatalogResult<Page> {
        let start: u64 = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| CatalogError::InvalidCursor(c.to_string()))?,
            None => 0,
        };

        let path = self.path.clone();
        let open = Arc::clone(&self.open);
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = open
                .lock()
                .map_err(|_| CatalogError::Backend("manifest reader lock poisoned".to_string()))?;
            read_page(&path, &mut guard, &filter, start, page_size.max(1))
        })
        .await
        .map_err(|e| CatalogError::Backend(format!("manifest reader task failed: {}", e)))?
    }
}

fn read_page(
    path: &Path,
    open: &mut Option<OpenManifest>,
    filter: &CatalogFilter,
    start: u64,
    page_size: usize,
) -> CatalogResult<Page> {
    let manifest_err = |source: csv::Error| CatalogError::Manifest {
        path: path.to_path_buf(),
        source,
    };

    if open.as_ref().map(|m| m.position) != Some(start) {
        debug!(path = %path.display(), start, "Opening manifest");
        *open = Some(open_at(path, start).map_err(manifest_err)?);
    }
    let Some(manifest) = open.as_mut() else {
        return Err(CatalogError::Backend("manifest reader unavailable".to_string()));
    };

    let mut rows = Vec::with_capacity(page_size);
    let mut record = csv::StringRecord::new();
    let mut exhausted = false;

    while rows.len() < page_size {
        if !manifest.reader.read_record(&mut record).map_err(manifest_err)? {
            exhausted = true;
            break;
        }
        manifest.position += 1;

        let parsed: ManifestRecord = record
            .deserialize(Some(&manifest.headers))
            .map_err(manifest_err)?;
        let row = CatalogRow::from(parsed);
        if filter.matches(&row.source) {
            rows.push(row);
        }
    }

    if exhausted {
        *open = None;
        return Ok(Page { rows, next: None });
    }
    let next = Some(manifest.position.to_string());
    Ok(Page { rows, next })
}

fn open_at(path: &Path, start: u64) -> Result<OpenManifest, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut record = csv::StringRecord::new();
    let mut position = 0;
    while position < start && reader.read_record(&mut record)? {
        position += 1;
    }

    Ok(OpenManifest {
        reader,
        headers,
        position,
    })
}
