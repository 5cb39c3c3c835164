//! In-memory backend for tests and local development.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Context, ContextFilter, ContextHistory, ContextUpdate, HistoryFilter};
use crate::store::{ContextStore, DedupStore, HistoryStore};

/// Map-backed store implementing every storage capability.
///
/// The context map's write lock plays the role the database's atomic
/// find-and-update plays in production: version check and replacement happen
/// under one exclusive section, so racing updates serialize the same way.
#[derive(Default)]
pub struct MemoryStore {
    contexts: RwLock<HashMap<Uuid, Context>>,
    histories: RwLock<HashMap<Uuid, ContextHistory>>,
    processed: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Context, StoreError> {
        let contexts = self.contexts.read().await;
        contexts.get(&id).cloned().ok_or(StoreError::NotFound {
            entity: "context",
            id,
        })
    }

    async fn create(&self, context: &Context) -> Result<Context, StoreError> {
        let mut contexts = self.contexts.write().await;
        contexts.insert(context.id, context.clone());
        Ok(context.clone())
    }

    async fn update(&self, update: &ContextUpdate) -> Result<Context, StoreError> {
        let mut contexts = self.contexts.write().await;

        let stored = match contexts.get_mut(&update.id) {
            Some(c) if c.version == update.version => c,
            // Absent id and stale version are indistinguishable to callers,
            // matching the single-filter semantics of the database update.
            _ => {
                return Err(StoreError::VersionConflict {
                    id: update.id,
                    expected: update.version,
                });
            }
        };

        stored.name = update.name.clone();
        stored.description = update.description.clone();
        stored.content = update.content.clone();
        stored.organizations = update.organizations.clone();
        stored.tenants = update.tenants.clone();
        stored.groups = update.groups.clone();
        stored.user = update.user.clone();
        stored.tags = update.tags.clone();
        stored.metadata = update.metadata.clone();
        stored.is_active = update.is_active;
        stored.version = update.version + 1;
        stored.modified_time = Utc::now();

        Ok(stored.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut contexts = self.contexts.write().await;
        contexts.remove(&id).map(|_| ()).ok_or(StoreError::NotFound {
            entity: "context",
            id,
        })
    }

    async fn filter(&self, filter: &ContextFilter) -> Result<Vec<Context>, StoreError> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let contexts = self.contexts.read().await;
        let mut matched: Vec<Context> = contexts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        matched.sort_by_key(|c| c.created_time);
        Ok(matched)
    }

    async fn close(&self) {}
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn create(&self, snapshot: ContextHistory) -> Result<ContextHistory, StoreError> {
        let mut histories = self.histories.write().await;
        histories.insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<ContextHistory, StoreError> {
        let histories = self.histories.read().await;
        histories.get(&id).cloned().ok_or(StoreError::NotFound {
            entity: "context_history",
            id,
        })
    }

    async fn filter(&self, filter: &HistoryFilter) -> Result<Vec<ContextHistory>, StoreError> {
        let histories = self.histories.read().await;
        let mut matched: Vec<ContextHistory> = histories
            .values()
            .filter(|h| filter.matches(h))
            .cloned()
            .collect();
        matched.sort_by_key(|h| (h.version, h.created_time));
        Ok(matched)
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn is_processed(&self, key: &str) -> Result<bool, StoreError> {
        let processed = self.processed.read().await;
        Ok(processed.contains(key))
    }

    async fn mark_processed(&self, key: &str) -> Result<(), StoreError> {
        let mut processed = self.processed.write().await;
        processed.insert(key.to_string());
        Ok(())
    }
}
