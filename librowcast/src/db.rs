//! Database connection handling
//!
//! One `AnyPool` per process, shared by the row source and the database
//! progress store. MySQL and SQLite URLs are both accepted.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::error::{DbError, Result};

#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Open a pool for `url`
    ///
    /// SQLite file paths are tilde-expanded, their parent directory is
    /// created, and the file is created if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let url = prepare_url(url)?;
        let mut options = AnyPoolOptions::new();
        if url.contains(":memory:") {
            // each in-memory connection is its own database
            options = options.max_connections(1);
        } else {
            options = options.max_connections(4);
        }

        let pool = options.connect(&url).await.map_err(DbError::SqlxError)?;
        tracing::debug!(backend = %backend_name(&url), "Connected to database");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend_name(url: &str) -> &str {
    url.split(':').next().unwrap_or("unknown")
}

fn prepare_url(url: &str) -> Result<String> {
    let url = url.trim();
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return Ok(url.to_string());
    };

    if rest.contains(":memory:") {
        return Ok(url.to_string());
    }

    let rest = rest.trim_start_matches("//");
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let expanded = shellexpand::tilde(path).to_string();
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }
    }

    let path = expanded.replace('\\', "/");
    Ok(match query {
        Some(query) => format!("sqlite://{}?{}", path, query),
        None => format!("sqlite://{}?mode=rwc", path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_url_leaves_mysql_alone() {
        let url = "mysql://bot:pw@localhost:3306/site";
        assert_eq!(prepare_url(url).unwrap(), url);
    }

    #[test]
    fn test_prepare_url_memory() {
        assert_eq!(prepare_url("sqlite::memory:").unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_prepare_url_creates_parent_and_mode() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("rows.db");
        let url = format!("sqlite://{}", db_path.display());

        let prepared = prepare_url(&url).unwrap();
        assert!(prepared.ends_with("rows.db?mode=rwc"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_prepare_url_keeps_existing_query() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}/rows.db?mode=ro", dir.path().display());
        assert!(prepare_url(&url).unwrap().ends_with("rows.db?mode=ro"));
    }

    #[tokio::test]
    async fn test_connect_sqlite_file() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("rows.db").display());

        let db = Database::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        assert!(dir.path().join("rows.db").exists());
    }
}
