//! Ordered row source
//!
//! Reads rows with an id greater than the cursor, oldest first.

use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::sync::Mutex;

use crate::config::{is_valid_identifier, SourceConfig};
use crate::db::Database;
use crate::error::{ConfigError, DbError, Result};
use crate::types::{RawText, SourceRow};

#[async_trait]
pub trait RowSource: Send + Sync {
    /// Rows with `id > last_id`, ascending by id
    async fn fetch_rows_after(&self, last_id: i64) -> Result<Vec<SourceRow>>;
}

/// Row source backed by a SQL table
pub struct SqlRowSource {
    db: Database,
    query: String,
}

impl SqlRowSource {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if an identifier is not a plain
    /// SQL name.
    pub fn new(db: Database, config: &SourceConfig) -> Result<Self> {
        let query = build_query(config)?;
        Ok(Self { db, query })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Fetch query for the configured table and columns
fn build_query(config: &SourceConfig) -> Result<String> {
    for (field, value) in [
        ("source.table", &config.table),
        ("source.id_column", &config.id_column),
        ("source.text_column", &config.text_column),
    ] {
        if !is_valid_identifier(value) {
            return Err(ConfigError::invalid(
                field,
                format!("'{}' is not a plain SQL identifier", value),
            )
            .into());
        }
    }

    let mut query = format!(
        "SELECT {id}, {text} FROM {table} WHERE {id} > ? ORDER BY {id} ASC",
        id = config.id_column,
        text = config.text_column,
        table = config.table,
    );
    if let Some(limit) = config.max_rows_per_run {
        query.push_str(&format!(" LIMIT {}", limit));
    }
    Ok(query)
}

fn decode_row(row: &AnyRow) -> Result<SourceRow> {
    let id = match row.try_get::<i64, _>(0) {
        Ok(id) => id,
        Err(_) => i64::from(row.try_get::<i32, _>(0).map_err(DbError::SqlxError)?),
    };

    // Text columns come back as strings; binary or legacy-charset columns as bytes
    let text = match row.try_get::<Option<String>, _>(1) {
        Ok(text) => RawText::Text(text.unwrap_or_default()),
        Err(_) => {
            let bytes = row
                .try_get::<Option<Vec<u8>>, _>(1)
                .map_err(DbError::SqlxError)?;
            RawText::Bytes(bytes.unwrap_or_default())
        }
    };

    Ok(SourceRow { id, text })
}

#[async_trait]
impl RowSource for SqlRowSource {
    async fn fetch_rows_after(&self, last_id: i64) -> Result<Vec<SourceRow>> {
        let rows = sqlx::query(&self.query)
            .bind(last_id)
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        tracing::debug!(after = last_id, count = rows.len(), "Fetched rows");
        Ok(rows)
    }
}

/// In-process row source for tests and embedding
///
/// Rows are kept sorted by id; `fetch_rows_after` behaves like the SQL query.
#[derive(Default)]
pub struct MemoryRowSource {
    rows: Mutex<Vec<SourceRow>>,
    limit: Option<usize>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        let source = Self::default();
        for row in rows {
            source.push(row);
        }
        source
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn push(&self, row: SourceRow) {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let at = rows.partition_point(|r| r.id < row.id);
        rows.insert(at, row);
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn fetch_rows_after(&self, last_id: i64) -> Result<Vec<SourceRow>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let unseen = rows.iter().filter(|r| r.id > last_id).cloned();
        Ok(match self.limit {
            Some(limit) => unseen.take(limit).collect(),
            None => unseen.collect(),
        })
    }
}
