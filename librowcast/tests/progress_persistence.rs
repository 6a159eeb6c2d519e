//! Cursor and quota persistence across process restarts
//!
//! Each scenario runs against both durable backends, reopening the store
//! (and the database connection) between steps the way a restarted process
//! would.

use anyhow::Result;
use librowcast::progress::{DatabaseProgressStore, FileProgressStore, ProgressStore};
use librowcast::quota::QuotaSnapshot;
use librowcast::Database;
use std::path::Path;
use tempfile::TempDir;

#[derive(Clone, Copy, Debug)]
enum Backend {
    File,
    Sqlite,
}

async fn open(backend: Backend, dir: &Path) -> Result<(Box<dyn ProgressStore>, Option<Database>)> {
    match backend {
        Backend::File => Ok((
            Box::new(FileProgressStore::new(dir.join("last_entry_id.txt"))),
            None,
        )),
        Backend::Sqlite => {
            let url = format!("sqlite://{}", dir.join("progress.db").display());
            let db = Database::connect(&url).await?;
            let store = DatabaseProgressStore::new(db.clone(), "default").await?;
            Ok((Box::new(store), Some(db)))
        }
    }
}

async fn close(db: Option<Database>) {
    if let Some(db) = db {
        db.close().await;
    }
}

async fn cursor_round_trip(backend: Backend) -> Result<()> {
    let temp_dir = TempDir::new()?;

    let (store, db) = open(backend, temp_dir.path()).await?;
    assert_eq!(store.load().await?, 0, "{:?}: fresh store starts at 0", backend);
    store.save(41).await?;
    store.save(42).await?;
    close(db).await;

    let (store, db) = open(backend, temp_dir.path()).await?;
    assert_eq!(store.load().await?, 42, "{:?}: cursor survives reopen", backend);
    close(db).await;
    Ok(())
}

async fn quota_round_trip(backend: Backend) -> Result<()> {
    let temp_dir = TempDir::new()?;
    let snapshot = QuotaSnapshot {
        count: 12,
        window_start: 1_700_000_000,
    };

    let (store, db) = open(backend, temp_dir.path()).await?;
    assert_eq!(store.load_quota().await?, None);
    store.save_quota(snapshot).await?;
    close(db).await;

    let (store, db) = open(backend, temp_dir.path()).await?;
    assert_eq!(store.load_quota().await?, Some(snapshot), "{:?}", backend);
    close(db).await;
    Ok(())
}

#[tokio::test]
async fn test_file_cursor_round_trip() -> Result<()> {
    cursor_round_trip(Backend::File).await
}

#[tokio::test]
async fn test_database_cursor_round_trip() -> Result<()> {
    cursor_round_trip(Backend::Sqlite).await
}

#[tokio::test]
async fn test_file_quota_round_trip() -> Result<()> {
    quota_round_trip(Backend::File).await
}

#[tokio::test]
async fn test_database_quota_round_trip() -> Result<()> {
    quota_round_trip(Backend::Sqlite).await
}

#[tokio::test]
async fn test_file_store_reads_legacy_cursor_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("last_entry_fetched_ID.txt");
    std::fs::write(&path, "1337\n")?;

    let store = FileProgressStore::new(&path);
    assert_eq!(store.load().await?, 1337);
    Ok(())
}

#[tokio::test]
async fn test_database_store_keys_are_independent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let url = format!("sqlite://{}", temp_dir.path().join("progress.db").display());
    let db = Database::connect(&url).await?;

    let comments = DatabaseProgressStore::new(db.clone(), "comments").await?;
    let news = DatabaseProgressStore::new(db.clone(), "news").await?;

    comments.save(10).await?;
    news.save(3).await?;

    assert_eq!(comments.load().await?, 10);
    assert_eq!(news.load().await?, 3);
    db.close().await;
    Ok(())
}
