//! SQLite key/value backend.
//!
//! All records live in one `kv` table keyed by the raw byte key, so a full
//! scan comes back in key order and each namespace is contiguous.
//!
//! # Usage
//! ```rust,no_run
//! use txindex_storage::sqlite::SqliteKvStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteKvStore::open("./txindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteKvStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use txindex_core::error::IndexerError;
use txindex_core::store::{KvPair, KvStore};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed ordered key/value store.
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./txindex.db"`) or a full
    /// SQLite URL (`"sqlite:./txindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        debug!(path = %path, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory database. Data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        Ok(n as u64)
    }

    /// Close the pool, waiting for open connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_pair(row: SqliteRow) -> Result<KvPair, IndexerError> {
    let key: Vec<u8> = row.try_get("key").map_err(storage_err)?;
    let value: Vec<u8> = row.try_get("value").map_err(storage_err)?;
    Ok((key, value))
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| r.try_get::<Vec<u8>, _>("value").map_err(storage_err))
            .transpose()
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    fn scan(&self) -> BoxStream<'_, Result<KvPair, IndexerError>> {
        sqlx::query("SELECT key, value FROM kv ORDER BY key")
            .fetch(&self.pool)
            .map(|row| row.map_err(storage_err).and_then(decode_pair))
            .boxed()
    }
}
