//! PostgreSQL store for persisting context documents.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::model::{Context, ContextFilter, ContextHistory, ContextUpdate, HistoryFilter};
use crate::store::{ContextStore, DedupStore, HistoryStore};

const CONTEXT_COLUMNS: &str = "id, name, description, content, organizations, tenants, groups, \
     owner, tags, metadata, is_active, version, created_time, modified_time";

const HISTORY_COLUMNS: &str = "id, context_id, name, description, content, organizations, \
     tenants, groups, owner, tags, metadata, is_active, version, created_time";

/// Database store backed by a deadpool connection pool.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a new store and connect to the database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Run database migrations (embedded via refinery).
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        use refinery::embed_migrations;
        embed_migrations!("migrations");

        let mut client = self.pool.get().await?;
        migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl ContextStore for PgStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Context, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE id = $1"),
                &[&id],
            )
            .await?;

        match row {
            Some(row) => row_to_context(&row),
            None => Err(StoreError::NotFound {
                entity: "context",
                id,
            }),
        }
    }

    async fn create(&self, context: &Context) -> Result<Context, StoreError> {
        let conn = self.conn().await?;
        let organizations = set_to_vec(&context.organizations);
        let tenants = set_to_vec(&context.tenants);
        let groups = set_to_vec(&context.groups);
        let metadata = metadata_to_value(&context.metadata)?;

        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO contexts ({CONTEXT_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                     RETURNING {CONTEXT_COLUMNS}"
                ),
                &[
                    &context.id,
                    &context.name,
                    &context.description,
                    &context.content,
                    &organizations,
                    &tenants,
                    &groups,
                    &context.user,
                    &context.tags,
                    &metadata,
                    &context.is_active,
                    &context.version,
                    &context.created_time,
                    &context.modified_time,
                ],
            )
            .await?;

        row_to_context(&row)
    }

    async fn update(&self, update: &ContextUpdate) -> Result<Context, StoreError> {
        let conn = self.conn().await?;
        let organizations = set_to_vec(&update.organizations);
        let tenants = set_to_vec(&update.tenants);
        let groups = set_to_vec(&update.groups);
        let metadata = metadata_to_value(&update.metadata)?;

        // The WHERE clause is the serialization point: of all callers racing
        // on the same (id, expected version) pair, exactly one matches a row.
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE contexts SET \
                         name = $3, description = $4, content = $5, \
                         organizations = $6, tenants = $7, groups = $8, \
                         owner = $9, tags = $10, metadata = $11, is_active = $12, \
                         version = version + 1, modified_time = NOW() \
                     WHERE id = $1 AND version = $2 \
                     RETURNING {CONTEXT_COLUMNS}"
                ),
                &[
                    &update.id,
                    &update.version,
                    &update.name,
                    &update.description,
                    &update.content,
                    &organizations,
                    &tenants,
                    &groups,
                    &update.user,
                    &update.tags,
                    &metadata,
                    &update.is_active,
                ],
            )
            .await?;

        match row {
            Some(row) => row_to_context(&row),
            None => Err(StoreError::VersionConflict {
                id: update.id,
                expected: update.version,
            }),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM contexts WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "context",
                id,
            });
        }
        Ok(())
    }

    async fn filter(&self, filter: &ContextFilter) -> Result<Vec<Context>, StoreError> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(ref name) = filter.name {
            params.push(name);
            clauses.push(format!("name = ${}", params.len()));
        }
        if let Some(ref user) = filter.user {
            params.push(user);
            clauses.push(format!("owner = ${}", params.len()));
        }
        if let Some(ref organization) = filter.organization {
            params.push(organization);
            clauses.push(format!("${} = ANY(organizations)", params.len()));
        }
        if let Some(ref tenant) = filter.tenant {
            params.push(tenant);
            clauses.push(format!("${} = ANY(tenants)", params.len()));
        }
        if let Some(ref group) = filter.group {
            params.push(group);
            clauses.push(format!("${} = ANY(groups)", params.len()));
        }
        if let Some(ref tag) = filter.tag {
            params.push(tag);
            clauses.push(format!("${} = ANY(tags)", params.len()));
        }
        if let Some(ref is_active) = filter.is_active {
            params.push(is_active);
            clauses.push(format!("is_active = ${}", params.len()));
        }

        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM contexts WHERE {} ORDER BY created_time",
                    clauses.join(" AND ")
                ),
                &params,
            )
            .await?;

        rows.iter().map(row_to_context).collect()
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn create(&self, snapshot: ContextHistory) -> Result<ContextHistory, StoreError> {
        let conn = self.conn().await?;
        let organizations = set_to_vec(&snapshot.organizations);
        let tenants = set_to_vec(&snapshot.tenants);
        let groups = set_to_vec(&snapshot.groups);
        let metadata = metadata_to_value(&snapshot.metadata)?;

        let row = conn
            .query_one(
                &format!(
                    "INSERT INTO context_histories ({HISTORY_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                     RETURNING {HISTORY_COLUMNS}"
                ),
                &[
                    &snapshot.id,
                    &snapshot.context_id,
                    &snapshot.name,
                    &snapshot.description,
                    &snapshot.content,
                    &organizations,
                    &tenants,
                    &groups,
                    &snapshot.user,
                    &snapshot.tags,
                    &metadata,
                    &snapshot.is_active,
                    &snapshot.version,
                    &snapshot.created_time,
                ],
            )
            .await?;

        row_to_history(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<ContextHistory, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {HISTORY_COLUMNS} FROM context_histories WHERE id = $1"),
                &[&id],
            )
            .await?;

        match row {
            Some(row) => row_to_history(&row),
            None => Err(StoreError::NotFound {
                entity: "context_history",
                id,
            }),
        }
    }

    async fn filter(&self, filter: &HistoryFilter) -> Result<Vec<ContextHistory>, StoreError> {
        let Some(context_id) = filter.context_id else {
            return Ok(Vec::new());
        };

        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM context_histories \
                     WHERE context_id = $1 ORDER BY version, created_time"
                ),
                &[&context_id],
            )
            .await?;

        rows.iter().map(row_to_history).collect()
    }
}

#[async_trait]
impl DedupStore for PgStore {
    async fn is_processed(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM processed_messages WHERE idempotency_key = $1",
                &[&key],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO processed_messages (idempotency_key) VALUES ($1) \
             ON CONFLICT (idempotency_key) DO NOTHING",
            &[&key],
        )
        .await?;
        Ok(())
    }
}

fn set_to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

fn metadata_to_value(
    metadata: &BTreeMap<String, serde_json::Value>,
) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(metadata).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn value_to_metadata(
    value: serde_json::Value,
) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn row_to_context(row: &Row) -> Result<Context, StoreError> {
    Ok(Context {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        content: row.try_get("content")?,
        organizations: row
            .try_get::<_, Vec<String>>("organizations")?
            .into_iter()
            .collect(),
        tenants: row.try_get::<_, Vec<String>>("tenants")?.into_iter().collect(),
        groups: row.try_get::<_, Vec<String>>("groups")?.into_iter().collect(),
        user: row.try_get("owner")?,
        tags: row.try_get("tags")?,
        metadata: value_to_metadata(row.try_get("metadata")?)?,
        is_active: row.try_get("is_active")?,
        version: row.try_get("version")?,
        created_time: row.try_get("created_time")?,
        modified_time: row.try_get("modified_time")?,
    })
}

fn row_to_history(row: &Row) -> Result<ContextHistory, StoreError> {
    Ok(ContextHistory {
        id: row.try_get("id")?,
        context_id: row.try_get("context_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        content: row.try_get("content")?,
        organizations: row
            .try_get::<_, Vec<String>>("organizations")?
            .into_iter()
            .collect(),
        tenants: row.try_get::<_, Vec<String>>("tenants")?.into_iter().collect(),
        groups: row.try_get::<_, Vec<String>>("groups")?.into_iter().collect(),
        user: row.try_get("owner")?,
        tags: row.try_get("tags")?,
        metadata: value_to_metadata(row.try_get("metadata")?)?,
        is_active: row.try_get("is_active")?,
        version: row.try_get("version")?,
        created_time: row.try_get("created_time")?,
    })
}
