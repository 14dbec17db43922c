//! Snapshot repository.
//!
//! Every source owns its own snapshot table and metadata table. The
//! read-modify-write path runs inside a `BEGIN IMMEDIATE` transaction so a
//! record's snapshot is never observed half-written.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{Source, StoredSnapshot};

/// Database repository for snapshot and metadata operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the stored snapshot for a record.
    #[cfg(test)]
    pub async fn get_snapshot(
        &self,
        source: Source,
        id: &str,
    ) -> Result<Option<StoredSnapshot>, AppError> {
        let sql = format!("SELECT data FROM {} WHERE id = ?", source.snapshot_table());
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_snapshot(&r.get::<String, _>("data")))
            .transpose()
    }

    /// Transactionally read a record's snapshot, let `decide` inspect it, and
    /// write back whatever snapshot `decide` returns (`None` leaves the row alone).
    ///
    /// Any failure rolls the transaction back, so a previously stored snapshot
    /// is never partially overwritten.
    pub async fn read_modify_write<T, F>(
        &self,
        source: Source,
        id: &str,
        decide: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce(Option<StoredSnapshot>) -> (T, Option<StoredSnapshot>),
    {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = apply_in_transaction(&mut conn, source, id, decide).await;

        match outcome {
            Ok(value) => match sqlx::query("COMMIT").execute(&mut *conn).await {
                Ok(_) => Ok(value),
                Err(e) => {
                    rollback(&mut conn).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                rollback(&mut conn).await;
                Err(e)
            }
        }
    }

    /// Delete every snapshot and metadata entry of a source. Returns the number of
    /// snapshots removed.
    pub async fn clear_source(&self, source: Source) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&format!("DELETE FROM {}", source.snapshot_table()))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(&format!("DELETE FROM {}", source.meta_table()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deleted)
    }

    /// Count stored snapshots for a source.
    pub async fn count_snapshots(&self, source: Source) -> Result<i64, AppError> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {}",
            source.snapshot_table()
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Get a metadata value.
    pub async fn get_meta(&self, source: Source, key: &str) -> Result<Option<String>, AppError> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", source.meta_table());
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Set a metadata value.
    pub async fn set_meta(&self, source: Source, key: &str, value: &str) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO {} (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            source.meta_table()
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn apply_in_transaction<T, F>(
    conn: &mut SqliteConnection,
    source: Source,
    id: &str,
    decide: F,
) -> Result<T, AppError>
where
    F: FnOnce(Option<StoredSnapshot>) -> (T, Option<StoredSnapshot>),
{
    let select = format!("SELECT data FROM {} WHERE id = ?", source.snapshot_table());
    let existing = sqlx::query(&select)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|r| decode_snapshot(&r.get::<String, _>("data")))
        .transpose()?;

    let (value, replacement) = decide(existing);

    if let Some(snapshot) = replacement {
        let data = serde_json::to_string(&snapshot)?;
        let upsert = format!(
            "INSERT INTO {} (id, data, stored_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
            source.snapshot_table()
        );
        sqlx::query(&upsert)
            .bind(id)
            .bind(&data)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await?;
    }

    Ok(value)
}

async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::error!("Failed to roll back snapshot transaction: {}", e);
    }
}

fn decode_snapshot(data: &str) -> Result<StoredSnapshot, AppError> {
    Ok(serde_json::from_str(data)?)
}
