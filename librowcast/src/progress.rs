//! Durable publish cursor
//!
//! The cursor is the id of the last row whose segments were all published.
//! Quota state is stored next to it so a restart does not forget how many
//! posts the current window already holds.

use async_trait::async_trait;
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::db::Database;
use crate::error::{DbError, Result, StoreError};
use crate::quota::QuotaSnapshot;

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Last published id, or 0 if nothing has been recorded
    async fn load(&self) -> Result<i64>;

    /// Durably replace the cursor
    async fn save(&self, last_published_id: i64) -> Result<()>;

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>>;

    async fn save_quota(&self, snapshot: QuotaSnapshot) -> Result<()>;
}

fn parse_cursor(raw: &str, origin: &str) -> i64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(origin, "Cursor is empty; starting from 0");
        return 0;
    }
    match trimmed.parse::<i64>() {
        Ok(id) if id >= 0 => id,
        Ok(id) => {
            tracing::warn!(origin, value = id, "Cursor is negative; starting from 0");
            0
        }
        Err(e) => {
            tracing::warn!(origin, value = %trimmed, error = %e, "Cursor is not a number; starting from 0");
            0
        }
    }
}

/// Cursor kept as a decimal string in a plain file
///
/// Quota state goes to `<path>.quota.json`.
pub struct FileProgressStore {
    path: PathBuf,
    quota_path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut quota_path = path.clone().into_os_string();
        quota_path.push(".quota.json");
        Self {
            path,
            quota_path: PathBuf::from(quota_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn quota_path(&self) -> &Path {
        &self.quota_path
    }
}

/// Write `contents` to a temp file beside `target`, fsync, then rename over it
async fn write_atomic(target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "progress".to_string());
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    // Directory fsync is best-effort; not every platform supports it
    match fs::File::open(&dir).await {
        Ok(dir_file) => {
            if let Err(e) = dir_file.sync_all().await {
                tracing::debug!(error = %e, "directory fsync failed");
            }
        }
        Err(e) => tracing::debug!(error = %e, "failed to open directory for fsync"),
    }

    Ok(())
}

/// Read a small state file; bytes that are not UTF-8 become U+FFFD
async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn load(&self) -> Result<i64> {
        match read_optional(&self.path).await.map_err(StoreError::Io)? {
            Some(contents) => Ok(parse_cursor(&contents, &self.path.display().to_string())),
            None => {
                tracing::info!(path = %self.path.display(), "No cursor file; initializing to 0");
                write_atomic(&self.path, b"0").await.map_err(StoreError::Io)?;
                Ok(0)
            }
        }
    }

    async fn save(&self, last_published_id: i64) -> Result<()> {
        write_atomic(&self.path, last_published_id.to_string().as_bytes())
            .await
            .map_err(StoreError::Io)?;
        Ok(())
    }

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>> {
        let Some(contents) = read_optional(&self.quota_path).await.map_err(StoreError::Io)? else {
            return Ok(None);
        };

        match serde_json::from_str(&contents) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(
                    path = %self.quota_path.display(),
                    error = %e,
                    "Ignoring malformed quota state"
                );
                Ok(None)
            }
        }
    }

    async fn save_quota(&self, snapshot: QuotaSnapshot) -> Result<()> {
        let json = serde_json::to_vec(&snapshot).map_err(StoreError::Serialize)?;
        write_atomic(&self.quota_path, &json)
            .await
            .map_err(StoreError::Io)?;
        Ok(())
    }
}

/// Cursor kept as a keyed row in the database
pub struct DatabaseProgressStore {
    db: Database,
    key: String,
}

impl DatabaseProgressStore {
    /// Create the progress tables if needed
    pub async fn new(db: Database, key: impl Into<String>) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_progress (
                progress_key VARCHAR(64) NOT NULL PRIMARY KEY,
                last_published_id BIGINT NOT NULL
            )
            "#,
        )
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publish_quota (
                progress_key VARCHAR(64) NOT NULL PRIMARY KEY,
                window_start BIGINT NOT NULL,
                post_count BIGINT NOT NULL
            )
            "#,
        )
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(Self {
            db,
            key: key.into(),
        })
    }

    async fn stored_cursor(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT last_published_id FROM publish_progress WHERE progress_key = ?")
            .bind(&self.key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| r.try_get::<i64, _>(0))
            .transpose()
            .map_err(|e| DbError::SqlxError(e).into())
    }

    async fn quota_row_exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT post_count FROM publish_quota WHERE progress_key = ?")
            .bind(&self.key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ProgressStore for DatabaseProgressStore {
    async fn load(&self) -> Result<i64> {
        match self.stored_cursor().await? {
            Some(id) if id >= 0 => Ok(id),
            Some(id) => {
                tracing::warn!(key = %self.key, value = id, "Cursor is negative; starting from 0");
                Ok(0)
            }
            None => {
                tracing::info!(key = %self.key, "No cursor row; initializing to 0");
                sqlx::query(
                    "INSERT INTO publish_progress (progress_key, last_published_id) VALUES (?, ?)",
                )
                .bind(&self.key)
                .bind(0_i64)
                .execute(self.db.pool())
                .await
                .map_err(DbError::SqlxError)?;
                Ok(0)
            }
        }
    }

    async fn save(&self, last_published_id: i64) -> Result<()> {
        // MySQL reports 0 affected rows for a no-op UPDATE, so check first
        let sql = if self.stored_cursor().await?.is_some() {
            "UPDATE publish_progress SET last_published_id = ? WHERE progress_key = ?"
        } else {
            "INSERT INTO publish_progress (last_published_id, progress_key) VALUES (?, ?)"
        };

        sqlx::query(sql)
            .bind(last_published_id)
            .bind(&self.key)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>> {
        let row = sqlx::query(
            "SELECT window_start, post_count FROM publish_quota WHERE progress_key = ?",
        )
        .bind(&self.key)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let window_start: i64 = row.try_get(0).map_err(DbError::SqlxError)?;
        let post_count: i64 = row.try_get(1).map_err(DbError::SqlxError)?;
        match u32::try_from(post_count) {
            Ok(count) => Ok(Some(QuotaSnapshot {
                count,
                window_start,
            })),
            Err(_) => {
                tracing::warn!(key = %self.key, post_count, "Ignoring malformed quota state");
                Ok(None)
            }
        }
    }

    async fn save_quota(&self, snapshot: QuotaSnapshot) -> Result<()> {
        let sql = if self.quota_row_exists().await? {
            "UPDATE publish_quota SET window_start = ?, post_count = ? WHERE progress_key = ?"
        } else {
            "INSERT INTO publish_quota (window_start, post_count, progress_key) VALUES (?, ?, ?)"
        };

        sqlx::query(sql)
            .bind(snapshot.window_start)
            .bind(i64::from(snapshot.count))
            .bind(&self.key)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

/// In-process store; nothing survives the process
#[derive(Default)]
pub struct MemoryProgressStore {
    cursor: Mutex<i64>,
    quota: Mutex<Option<QuotaSnapshot>>,
    history: Mutex<Vec<i64>>,
}

impl MemoryProgressStore {
    pub fn with_cursor(last_published_id: i64) -> Self {
        let store = Self::default();
        *store.cursor.lock().unwrap_or_else(|e| e.into_inner()) = last_published_id;
        store
    }

    /// Every value passed to `save`, in order
    pub fn saved_history(&self) -> Vec<i64> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn quota(&self) -> Option<QuotaSnapshot> {
        *self.quota.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self) -> Result<i64> {
        Ok(*self.cursor.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn save(&self, last_published_id: i64) -> Result<()> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = last_published_id;
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(last_published_id);
        Ok(())
    }

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>> {
        Ok(self.quota())
    }

    async fn save_quota(&self, snapshot: QuotaSnapshot) -> Result<()> {
        *self.quota.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("42", "t"), 42);
        assert_eq!(parse_cursor(" 42\n", "t"), 42);
        assert_eq!(parse_cursor("", "t"), 0);
        assert_eq!(parse_cursor("-3", "t"), 0);
        assert_eq!(parse_cursor("forty-two", "t"), 0);
    }

    #[tokio::test]
    async fn test_file_store_initializes_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("last_entry_id.txt");
        let store = FileProgressStore::new(&path);

        assert_eq!(store.load().await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("cursor.txt"));

        store.save(17).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 17);

        store.save(18).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 18);

        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_tolerates_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.txt");
        std::fs::write(&path, "not a number").unwrap();

        let store = FileProgressStore::new(&path);
        assert_eq!(store.load().await.unwrap(), 0);

        std::fs::write(&path, "").unwrap();
        assert_eq!(store.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_tolerates_non_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.txt");
        std::fs::write(&path, [0xff, 0xfe, b'1']).unwrap();

        let store = FileProgressStore::new(&path);
        assert_eq!(store.load().await.unwrap(), 0);

        std::fs::write(store.quota_path(), [0xc3, 0x28]).unwrap();
        assert!(store.load_quota().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_quota_sidecar() {
        let dir = TempDir::new().unwrap();
        let store = FileProgressStore::new(dir.path().join("cursor.txt"));
        assert_eq!(store.quota_path(), dir.path().join("cursor.txt.quota.json"));

        assert!(store.load_quota().await.unwrap().is_none());

        let snapshot = QuotaSnapshot {
            count: 7,
            window_start: 1_700_000_000,
        };
        store.save_quota(snapshot).await.unwrap();
        assert_eq!(store.load_quota().await.unwrap(), Some(snapshot));

        std::fs::write(store.quota_path(), "{broken").unwrap();
        assert!(store.load_quota().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_unwritable_directory_is_store_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        // root ignores directory permissions
        if std::fs::write(locked.join("writable"), "x").is_ok() {
            return;
        }

        let store = FileProgressStore::new(locked.join("cursor.txt"));
        let err = store.save(3).await.unwrap_err();
        assert!(matches!(err, crate::RowcastError::Store(StoreError::Io(_))));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_database_store_round_trip() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let store = DatabaseProgressStore::new(db.clone(), "default").await.unwrap();

        assert_eq!(store.load().await.unwrap(), 0);
        store.save(5).await.unwrap();
        store.save(5).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 5);

        let other = DatabaseProgressStore::new(db, "other").await.unwrap();
        assert_eq!(other.load().await.unwrap(), 0);
        other.save(99).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_database_store_save_before_load() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let store = DatabaseProgressStore::new(db, "fresh").await.unwrap();
        store.save(12).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_database_store_quota() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let store = DatabaseProgressStore::new(db, "default").await.unwrap();

        assert!(store.load_quota().await.unwrap().is_none());

        let first = QuotaSnapshot {
            count: 1,
            window_start: 1_000,
        };
        store.save_quota(first).await.unwrap();
        let second = QuotaSnapshot {
            count: 2,
            window_start: 1_000,
        };
        store.save_quota(second).await.unwrap();
        assert_eq!(store.load_quota().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_memory_store_history() {
        let store = MemoryProgressStore::with_cursor(3);
        assert_eq!(store.load().await.unwrap(), 3);
        store.save(4).await.unwrap();
        store.save(6).await.unwrap();
        assert_eq!(store.saved_history(), vec![4, 6]);
        assert_eq!(store.load().await.unwrap(), 6);
    }
}
