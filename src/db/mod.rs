//! Database module for SQLite persistence.
//!
//! SQLite holds the per-source snapshot tables and their metadata tables. The
//! delivery queue is deliberately not persisted.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Source;

/// Metadata key holding the last successful incremental sync time.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Initialize the database connection pool and run migrations.
///
/// `lock_timeout` bounds how long a writer waits for the database lock.
pub async fn init_database(db_path: &Path, lock_timeout: Duration) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(lock_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(lock_timeout.max(Duration::from_secs(5)))
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One snapshot table and one metadata table per source
    for source in Source::ALL {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {snapshots} (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                stored_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {meta} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
            snapshots = source.snapshot_table(),
            meta = source.meta_table(),
        );

        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_create_tables_per_source() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("nested/relay.sqlite"), Duration::from_secs(1))
            .await
            .unwrap();

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        for source in Source::ALL {
            assert!(names.contains(&source.snapshot_table().to_string()));
            assert!(names.contains(&source.meta_table().to_string()));
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.sqlite");
        let pool = init_database(&path, Duration::from_secs(1)).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
