//! Synchronous HTTP transport (axum).

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::service::{ContextService, HistoryService};

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub contexts: ContextService,
    pub history: HistoryService,
}

/// Build the HTTP router for the context resource and its history.
pub fn router(contexts: ContextService, history: HistoryService) -> Router {
    let state = Arc::new(AppState { contexts, history });

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/contexts",
            get(handlers::filter_contexts).post(handlers::create_context),
        )
        .route(
            "/contexts/{id}",
            get(handlers::get_context)
                .patch(handlers::update_context)
                .delete(handlers::delete_context),
        )
        .route("/context-histories", get(handlers::list_history))
        .route(
            "/contexts/{cid}/history/{hid}",
            get(handlers::get_history_item),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
