//! Storage traits for context documents.
//!
//! Each capability is a narrow trait with one production implementation
//! (PostgreSQL) and one substitutable in-memory implementation used by the
//! test suite and local development. All mutual exclusion for entity
//! mutation is delegated to the atomic compare-and-swap in
//! [`ContextStore::update`]; there is no application-level locking above it.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Context, ContextFilter, ContextHistory, ContextUpdate, HistoryFilter};

/// Atomic versioned read/write/filter over context documents.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch a single context by id.
    async fn get_by_id(&self, id: Uuid) -> Result<Context, StoreError>;

    /// Insert a fully-populated candidate (id, version, timestamps already
    /// assigned by the caller) and return the canonical stored record.
    async fn create(&self, context: &Context) -> Result<Context, StoreError>;

    /// Atomic find-and-update keyed on `(id, expected version)`.
    ///
    /// Replaces all mutable fields, bumps the version by one, and stamps
    /// `modified_time`. When no row matches — the id is absent or a
    /// concurrent writer already advanced the version — the call fails with
    /// [`StoreError::VersionConflict`] and writes nothing. Exactly one of
    /// any set of concurrent callers racing on the same pair succeeds.
    async fn update(&self, update: &ContextUpdate) -> Result<Context, StoreError>;

    /// Physical removal. Not used by the canonical public flow, which soft
    /// deletes through [`ContextStore::update`] instead.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Read-only filtered listing; empty when nothing matches or the filter
    /// is unconstrained.
    async fn filter(&self, filter: &ContextFilter) -> Result<Vec<Context>, StoreError>;

    /// Release underlying storage connections. Safe to call once during
    /// graceful shutdown.
    async fn close(&self);
}

/// Append-only store of immutable context snapshots.
///
/// There are deliberately no update or delete methods: a snapshot, once
/// written, stays written.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create(&self, snapshot: ContextHistory) -> Result<ContextHistory, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<ContextHistory, StoreError>;

    /// Empty when nothing matches, typically queried by owning context id.
    async fn filter(&self, filter: &HistoryFilter) -> Result<Vec<ContextHistory>, StoreError>;
}

/// Recorded idempotency keys for tolerating broker redelivery.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_processed(&self, key: &str) -> Result<bool, StoreError>;

    /// Record a key; inserting an already-recorded key is a no-op.
    async fn mark_processed(&self, key: &str) -> Result<(), StoreError>;
}
