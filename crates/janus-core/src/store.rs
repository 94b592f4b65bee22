//! Memory store abstraction.
//!
//! The isolation core authorizes operations; it does not own the memory
//! backend. Implementations of [`MemoryStore`] must only ever be reached
//! through [`AgentPermissionMiddleware::execute_with_permissions`], which is
//! why nothing here re-checks permissions.
//!
//! [`AgentPermissionMiddleware::execute_with_permissions`]:
//! crate::middleware::AgentPermissionMiddleware::execute_with_permissions

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::domain::KbType;
use crate::error::JanusResult;

/// Backend contract for one KB-partitioned key/value memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, kb: KbType, key: &str, value: Value) -> JanusResult<()>;

    async fn retrieve(&self, kb: KbType, key: &str) -> JanusResult<Option<Value>>;

    /// Case-insensitive substring match over serialized values, newest-key
    /// ordering not guaranteed.
    async fn search(&self, kb: KbType, query: &str, limit: usize)
        -> JanusResult<Vec<(String, Value)>>;

    /// Returns whether a record was actually removed.
    async fn delete(&self, kb: KbType, key: &str) -> JanusResult<bool>;
}

/// Volatile reference backend. Partitions are physically separate maps, so a
/// bug above this layer still cannot read across KBs by key collision.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    partitions: DashMap<KbType, HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, kb: KbType) -> usize {
        self.partitions.get(&kb).map_or(0, |p| p.len())
    }

    pub fn is_empty(&self, kb: KbType) -> bool {
        self.len(kb) == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, kb: KbType, key: &str, value: Value) -> JanusResult<()> {
        self.partitions
            .entry(kb)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, kb: KbType, key: &str) -> JanusResult<Option<Value>> {
        Ok(self
            .partitions
            .get(&kb)
            .and_then(|p| p.get(key).cloned()))
    }

    async fn search(
        &self,
        kb: KbType,
        query: &str,
        limit: usize,
    ) -> JanusResult<Vec<(String, Value)>> {
        let needle = query.to_lowercase();
        let Some(partition) = self.partitions.get(&kb) else {
            return Ok(Vec::new());
        };
        Ok(partition
            .iter()
            .filter(|(_, v)| v.to_string().to_lowercase().contains(&needle))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, kb: KbType, key: &str) -> JanusResult<bool> {
        Ok(self
            .partitions
            .get_mut(&kb)
            .is_some_and(|mut p| p.remove(key).is_some()))
    }
}
