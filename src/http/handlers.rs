//! HTTP handlers for the context resource.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::http::AppState;
use crate::model::{Context, ContextFilter, ContextHistory, ContextUpdate, NewContext};

/// Errors surfaced to HTTP clients. Mapped 1:1 onto the service taxonomy,
/// plus request-shape defects caught before the service is invoked.
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Service(err) => {
                if let ServiceError::Store(ref store_err) = err {
                    tracing::error!(error = %store_err, "storage failure");
                }
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /contexts` — filtered listing. The filter rides in an optional JSON
/// body; no body means an unconstrained filter, which matches nothing.
pub async fn filter_contexts(
    State(state): State<Arc<AppState>>,
    filter: Option<Json<ContextFilter>>,
) -> Result<Json<Vec<Context>>, ApiError> {
    let filter = filter.map(|Json(f)| f).unwrap_or_default();
    Ok(Json(state.contexts.filter_contexts(&filter).await?))
}

pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Context>, ApiError> {
    Ok(Json(state.contexts.get_context(id).await?))
}

pub async fn create_context(
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<NewContext>,
) -> Result<(StatusCode, Json<Context>), ApiError> {
    let created = state.contexts.create_context(candidate).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Update payload as received over HTTP. `version` is checked explicitly so
/// a missing optimistic-lock version reads as a request defect, not a
/// decode failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContextBody {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    version: Option<i64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    organizations: BTreeSet<String>,
    #[serde(default)]
    tenants: BTreeSet<String>,
    #[serde(default)]
    groups: BTreeSet<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn update_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateContextBody>,
) -> Result<Json<Context>, ApiError> {
    if let Some(body_id) = body.id
        && body_id != id
    {
        return Err(ApiError::BadRequest(format!(
            "body id {body_id} does not match path id {id}"
        )));
    }

    let Some(version) = body.version else {
        return Err(ApiError::BadRequest(
            "version is required for optimistic locking".to_string(),
        ));
    };

    let update = ContextUpdate {
        id,
        version,
        name: body.name,
        description: body.description,
        content: body.content,
        organizations: body.organizations,
        tenants: body.tenants,
        groups: body.groups,
        user: body.user,
        tags: body.tags,
        metadata: body.metadata,
        is_active: body.is_active,
    };

    Ok(Json(state.contexts.update_context(update).await?))
}

pub async fn delete_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Context>, ApiError> {
    Ok(Json(state.contexts.delete_context(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListParams {
    #[serde(default)]
    context_id: Option<Uuid>,
}

/// `GET /context-histories?contextId=…` — snapshots for one context.
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryListParams>,
) -> Result<Json<Vec<ContextHistory>>, ApiError> {
    let Some(context_id) = params.context_id else {
        return Err(ApiError::BadRequest(
            "contextId query parameter is required".to_string(),
        ));
    };
    Ok(Json(state.history.history_for_context(context_id).await?))
}

/// `GET /contexts/{cid}/history/{hid}` — a single snapshot, addressed by
/// its owning context.
pub async fn get_history_item(
    State(state): State<Arc<AppState>>,
    Path((cid, hid)): Path<(Uuid, Uuid)>,
) -> Result<Json<ContextHistory>, ApiError> {
    let snapshot = state.history.get_snapshot(hid).await?;
    if snapshot.context_id != cid {
        return Err(ApiError::Service(ServiceError::NotFound { id: hid }));
    }
    Ok(Json(snapshot))
}
