//! PostgreSQL catalog
//!
//! Reads a table shaped like
//!
//! ```sql
//! CREATE TABLE transfer_units (
//!     unit_id       TEXT NULL,
//!     source        TEXT NOT NULL,
//!     target        TEXT NULL,
//!     expected_hash TEXT NULL
//! );
//! ```
//!
//! with keyset pagination on `(COALESCE(target, source), source,
//! COALESCE(unit_id, ''))`. The cursor is the JSON-encoded key of the last row
//! served.

use super::{Catalog, CatalogFilter, CatalogResult, CatalogRow, Page};
use crate::error::CatalogError;
use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, sqlx::FromRow)]
struct UnitRecord {
    unit_id: Option<String>,
    source: String,
    target: Option<String>,
    expected_hash: Option<String>,
    sort_key: String,
    id_key: String,
}

pub struct PgCatalog {
    pool: PgPool,
    table: String,
    query: String,
}

// Literal pattern, always compiles
#[allow(clippy::expect_used)]
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid identifier regex")
    })
}

impl PgCatalog {
    /// Wrap an existing pool; `table` may be schema-qualified
    pub fn new(pool: PgPool, table: impl Into<String>) -> CatalogResult<Self> {
        let table = table.into();
        if !identifier_pattern().is_match(&table) {
            return Err(CatalogError::Config(format!(
                "'{}' is not a valid table name",
                table
            )));
        }

        let query = format!(
            "SELECT unit_id, source, target, expected_hash, \
                    COALESCE(target, source) AS sort_key, COALESCE(unit_id, '') AS id_key \
             FROM {table} \
             WHERE ($1::text IS NULL OR source LIKE $1 || '%') \
               AND ($2::text IS NULL OR \
                    (COALESCE(target, source), source, COALESCE(unit_id, '')) > ($2, $3::text, $4::text)) \
             ORDER BY COALESCE(target, source), source, COALESCE(unit_id, '') \
             LIMIT $5"
        );

        Ok(Self { pool, table, query })
    }

    /// Connect to `database_url` and read from `table`
    pub async fn connect(database_url: &str, table: impl Into<String>) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        let catalog = Self::new(pool, table)?;
        info!(table = %catalog.table, "PostgreSQL catalog connected");
        Ok(catalog)
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Escape `LIKE` metacharacters so a prefix matches literally
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn encode_cursor(sort_key: &str, source: &str, id_key: &str) -> String {
    serde_json::json!([sort_key, source, id_key]).to_string()
}

fn decode_cursor(cursor: &str) -> CatalogResult<(String, String, String)> {
    serde_json::from_str(cursor).map_err(|_| CatalogError::InvalidCursor(cursor.to_string()))
}

#[async_trait]
impl Catalog for PgCatalog {
    fn name(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self, filter), fields(table = %self.table))]
    async fn fetch_page(
        &self,
        filter: &CatalogFilter,
        cursor: Option<&str>,
        page_size: usize,
    ) -> CatalogResult<Page> {
        let after = cursor.map(decode_cursor).transpose()?;
        let (after_key, after_source, after_id) = match after {
            Some((key, source, id)) => (Some(key), Some(source), Some(id)),
            None => (None, None, None),
        };
        let limit = i64::try_from(page_size.max(1))
            .map_err(|_| CatalogError::Config(format!("page size {} too large", page_size)))?;

        let records: Vec<UnitRecord> = sqlx::query_as(&self.query)
            .bind(filter.source_prefix.as_deref().map(like_prefix))
            .bind(after_key)
            .bind(after_source)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let next = match records.last() {
            Some(last) if records.len() as i64 == limit => {
                Some(encode_cursor(&last.sort_key, &last.source, &last.id_key))
            }
            _ => None,
        };

        let rows = records
            .into_iter()
            .map(|r| CatalogRow {
                id: r.unit_id,
                source: r.source,
                target: r.target,
                expected_hash: r.expected_hash,
            })
            .collect();

        Ok(Page { rows, next })
    }
}
