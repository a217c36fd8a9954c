//! SQLite Persistent Storage
//!
//! Durable key-value storage that survives process restarts.
//! Uses connection pooling via r2d2 for concurrent access.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{KvStore, StorageError, StorageResult};

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Open a pooled SQLite database, creating the parent directory if needed
pub fn open_pool<P: AsRef<Path>>(db_path: P) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = db_path.as_ref().parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;"));
    Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

/// Single-connection in-memory pool (for testing)
pub fn memory_pool() -> Result<SqlitePool, StorageError> {
    Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// SQLite-backed key-value store
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    /// Create a store on the given database path and run migrations
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        Self::from_pool(open_pool(db_path)?)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_pool(memory_pool()?)
    }

    /// Share an existing pool (the job queue lives in the same file)
    pub fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS set_members (
                set_key TEXT NOT NULL,
                member TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (set_key, member)
            );
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn get_sync(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)
    }

    fn set_sync(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn delete_sync(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    fn set_add_sync(&self, key: &str, member: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO set_members (set_key, member, added_at) VALUES (?1, ?2, ?3)",
                params![key, member, chrono::Utc::now().timestamp_millis()],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    fn set_remove_sync(&self, key: &str, member: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "DELETE FROM set_members WHERE set_key = ?1 AND member = ?2",
                params![key, member],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    fn set_members_sync(&self, key: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT member FROM set_members WHERE set_key = ?1 ORDER BY added_at, rowid")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.get_sync(key)
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_sync(key, value)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.delete_sync(key)
    }

    async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.set_add_sync(key, member)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.set_remove_sync(key, member)
    }

    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        self.set_members_sync(key)
    }
}
