//! Storage Layer Module
//!
//! Durable state for the settlement engine.
//!
//! This module contains:
//! - The key-value trait the engine persists through
//! - SQLite implementation for production
//! - In-memory implementation for testing
//! - `SwapStore`, the typed idempotency-marker view

pub mod memory;
pub mod sqlite;
pub mod swap_store;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryKvStore;
pub use sqlite::{memory_pool, open_pool, SqliteKvStore, SqlitePool};
pub use swap_store::{PendingFinalize, SwapStore};
pub use traits::{KvStore, StorageError, StorageResult};
