//! Orchestration services composing the entity and history stores.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::model::{
    Context, ContextFilter, ContextHistory, ContextUpdate, HistoryFilter, NewContext,
};
use crate::store::{ContextStore, HistoryStore};

/// Read/append service over history snapshots.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Capture the given (pre-update) state as a snapshot row.
    pub async fn record_snapshot(&self, context: &Context) -> Result<ContextHistory, ServiceError> {
        let snapshot = ContextHistory::snapshot_of(context);
        Ok(self.store.create(snapshot).await?)
    }

    pub async fn get_snapshot(&self, id: Uuid) -> Result<ContextHistory, ServiceError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// All snapshots for one context, oldest version first.
    pub async fn history_for_context(
        &self,
        context_id: Uuid,
    ) -> Result<Vec<ContextHistory>, ServiceError> {
        Ok(self
            .store
            .filter(&HistoryFilter::for_context(context_id))
            .await?)
    }
}

/// Use-case layer for context documents.
///
/// Every mutation funnels through [`ContextService::update_context`], which
/// pairs the history capture with the store's compare-and-swap. The channel
/// router and the HTTP handlers both sit on top of this type, so neither
/// transport can bypass the concurrency or audit guarantees.
#[derive(Clone)]
pub struct ContextService {
    store: Arc<dyn ContextStore>,
    history: HistoryService,
}

impl ContextService {
    pub fn new(store: Arc<dyn ContextStore>, history: HistoryService) -> Self {
        Self { store, history }
    }

    /// Create a context. Identity, version, activity flag, and timestamps
    /// are assigned here; no history row is produced (history begins at the
    /// first update).
    pub async fn create_context(&self, candidate: NewContext) -> Result<Context, ServiceError> {
        if candidate.name.is_empty() {
            return Err(ServiceError::InvalidInput {
                reason: "name is required".to_string(),
            });
        }
        if candidate.content.is_empty() {
            return Err(ServiceError::InvalidInput {
                reason: "content is required".to_string(),
            });
        }

        let now = Utc::now();
        let context = Context {
            id: Uuid::new_v4(),
            name: candidate.name,
            description: candidate.description,
            content: candidate.content,
            organizations: candidate.organizations,
            tenants: candidate.tenants,
            groups: candidate.groups,
            user: candidate.user,
            tags: candidate.tags,
            metadata: candidate.metadata,
            is_active: true,
            version: 1,
            created_time: now,
            modified_time: now,
        };

        Ok(self.store.create(&context).await?)
    }

    pub async fn get_context(&self, id: Uuid) -> Result<Context, ServiceError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Apply a full-replace update guarded by the caller's observed version.
    ///
    /// The pre-update state is snapshotted first; a failed snapshot is
    /// logged and the update proceeds, since losing an audit row is less
    /// severe than losing availability. A version conflict from the store
    /// surfaces verbatim for the caller to re-read and resubmit.
    pub async fn update_context(&self, update: ContextUpdate) -> Result<Context, ServiceError> {
        let current = self.store.get_by_id(update.id).await?;

        if let Err(e) = self.history.record_snapshot(&current).await {
            tracing::warn!(
                context_id = %current.id,
                version = current.version,
                error = %e,
                "history snapshot failed, continuing with update"
            );
        }

        Ok(self.store.update(&update).await?)
    }

    /// Soft delete: flip `is_active` through the identical update path, so
    /// the delete consumes a version, produces a history snapshot, and can
    /// itself lose an optimistic-lock race against a concurrent editor.
    pub async fn delete_context(&self, id: Uuid) -> Result<Context, ServiceError> {
        let current = self.store.get_by_id(id).await?;
        self.update_context(ContextUpdate::deactivate(&current)).await
    }

    pub async fn filter_contexts(
        &self,
        filter: &ContextFilter,
    ) -> Result<Vec<Context>, ServiceError> {
        Ok(self.store.filter(filter).await?)
    }
}
