//! Storage Trait Definitions
//!
//! A minimal key-value interface with string values and string sets.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key-value storage interface
///
/// Every method is a single atomic operation on one key.
///
/// Implementations:
/// - `SqliteKvStore` - Production storage with SQLite
/// - `MemoryKvStore` - In-memory storage for testing
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Set a string value, overwriting any previous one
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value; returns false if it was absent
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Add a member to a set; returns false if it was already present
    async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// Remove a member from a set; returns false if it was absent
    async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// All members of a set, in insertion order
    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>>;
}
