//! SQLite storage backend.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use super::{Batch, Collection, Storage, Write};
use crate::error::Result;

/// [`Storage`] on a SQLite file, one table per collection.
///
/// Runs in WAL mode with `synchronous = FULL`, so a committed batch survives
/// power loss.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        tracing::debug!(path = %path.as_ref().display(), "Opened SQLite storage");

        Ok(Self { pool })
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn read(&self, keys: &[(Collection, String)]) -> Result<Vec<Option<String>>> {
        let mut tx = self.pool.begin().await?;
        let mut values = Vec::with_capacity(keys.len());

        for (collection, key) in keys {
            let sql = format!("SELECT value FROM {} WHERE key = ?", collection.table());
            let value: Option<String> = sqlx::query_scalar(&sql)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
            values.push(value);
        }

        tx.commit().await?;
        Ok(values)
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        let sql = format!("SELECT key, value FROM {} ORDER BY key", collection.table());
        let rows: Vec<(String, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn commit(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for write in batch.writes() {
            match write {
                Write::Put {
                    collection,
                    key,
                    value,
                } => {
                    let sql = format!(
                        "INSERT INTO {} (key, value) VALUES (?, ?) \
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        collection.table()
                    );
                    sqlx::query(&sql)
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                }
                Write::Delete { collection, key } => {
                    let sql = format!("DELETE FROM {} WHERE key = ?", collection.table());
                    sqlx::query(&sql).bind(key).execute(&mut *tx).await?;
                }
            }
        }

        tx.commit().await?;

        tracing::trace!(writes = batch.len(), "Committed batch");
        Ok(())
    }
}
