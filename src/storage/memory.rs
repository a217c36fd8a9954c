//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{KvStore, StorageResult};

/// In-memory key-value store
///
/// Uses Arc<RwLock<>> for concurrent access; clones share state.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    values: Arc<RwLock<HashMap<String, String>>>,
    sets: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plain keys held
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.values.write().await.remove(key).is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool> {
        let mut sets = self.sets.write().await;
        let members = sets.entry(key.to_string()).or_default();
        if members.iter().any(|m| m == member) {
            return Ok(false);
        }
        members.push(member.to_string());
        Ok(true)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool> {
        let mut sets = self.sets.write().await;
        let Some(members) = sets.get_mut(key) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m != member);
        Ok(members.len() != before)
    }

    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        Ok(self.sets.read().await.get(key).cloned().unwrap_or_default())
    }
}
