//! Entity types for context documents and their history snapshots.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A versioned context document.
///
/// `version` starts at 1 and increases by exactly one on every successful
/// mutation; `id` and `created_time` are set once at creation and never
/// rewritten. Deletion flips `is_active` instead of removing the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub is_active: bool,
    pub version: i64,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

/// Caller-supplied fields for creating a context.
///
/// Identity, version, activity flag, and timestamps are assigned by the
/// orchestration service; anything the caller passes for those is ignored
/// by construction since the fields are absent here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContext {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Full-replace update payload.
///
/// `version` is the version the caller observed before editing; the store
/// only applies the update if that version is still current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    pub id: Uuid,
    pub version: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ContextUpdate {
    /// Build the soft-delete payload: every business field copied from the
    /// current document, activity flag lowered, expected version = current.
    pub fn deactivate(current: &Context) -> Self {
        Self {
            id: current.id,
            version: current.version,
            name: current.name.clone(),
            description: current.description.clone(),
            content: current.content.clone(),
            organizations: current.organizations.clone(),
            tenants: current.tenants.clone(),
            groups: current.groups.clone(),
            user: current.user.clone(),
            tags: current.tags.clone(),
            metadata: current.metadata.clone(),
            is_active: false,
        }
    }
}

/// An immutable snapshot of a context, taken immediately before a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextHistory {
    pub id: Uuid,
    pub context_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub is_active: bool,
    /// The version being superseded by the paired update.
    pub version: i64,
    pub created_time: DateTime<Utc>,
}

impl ContextHistory {
    /// Capture the given context as a snapshot, stamped now.
    pub fn snapshot_of(context: &Context) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_id: context.id,
            name: context.name.clone(),
            description: context.description.clone(),
            content: context.content.clone(),
            organizations: context.organizations.clone(),
            tenants: context.tenants.clone(),
            groups: context.groups.clone(),
            user: context.user.clone(),
            tags: context.tags.clone(),
            metadata: context.metadata.clone(),
            is_active: context.is_active,
            version: context.version,
            created_time: Utc::now(),
        }
    }
}

/// Conjunction of optional predicates over contexts.
///
/// An unconstrained filter matches nothing: list endpoints return an empty
/// sequence instead of dumping the whole collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ContextFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.user.is_none()
            && self.organization.is_none()
            && self.tenant.is_none()
            && self.group.is_none()
            && self.tag.is_none()
            && self.is_active.is_none()
    }

    /// True when the context satisfies every set predicate.
    pub fn matches(&self, context: &Context) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(ref name) = self.name
            && context.name != *name
        {
            return false;
        }
        if let Some(ref user) = self.user
            && context.user.as_deref() != Some(user.as_str())
        {
            return false;
        }
        if let Some(ref org) = self.organization
            && !context.organizations.contains(org)
        {
            return false;
        }
        if let Some(ref tenant) = self.tenant
            && !context.tenants.contains(tenant)
        {
            return false;
        }
        if let Some(ref group) = self.group
            && !context.groups.contains(group)
        {
            return false;
        }
        if let Some(ref tag) = self.tag
            && !context.tags.iter().any(|t| t == tag)
        {
            return false;
        }
        if let Some(active) = self.is_active
            && context.is_active != active
        {
            return false;
        }
        true
    }
}

/// Predicates over history snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default)]
    pub context_id: Option<Uuid>,
}

impl HistoryFilter {
    pub fn for_context(context_id: Uuid) -> Self {
        Self {
            context_id: Some(context_id),
        }
    }

    pub fn matches(&self, snapshot: &ContextHistory) -> bool {
        match self.context_id {
            Some(cid) => snapshot.context_id == cid,
            None => false,
        }
    }
}
