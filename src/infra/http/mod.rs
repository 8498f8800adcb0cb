//! Admin HTTP surface over the cache and its durable tier.

mod error;
mod handlers;
mod middleware;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::RequestContext;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::application::maintenance::MaintenanceService;
use crate::cache::CacheStore;

#[derive(Clone)]
pub struct AdminState {
    pub maintenance: Arc<MaintenanceService>,
    pub cache: Arc<CacheStore>,
}

/// `import_body_limit` caps `POST /import` bodies; other routes keep the
/// axum default.
pub fn build_router(state: AdminState, import_body_limit: usize) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/stats/sources", get(handlers::stats_by_source))
        .route("/stats/types", get(handlers::stats_by_type))
        .route("/popular", get(handlers::popular))
        .route("/search", get(handlers::search))
        .route("/item/{source}/{id}", get(handlers::item))
        .route("/refresh", get(handlers::refresh_queue))
        .route("/recent", get(handlers::recent))
        .route("/export", get(handlers::export))
        .route(
            "/import",
            post(handlers::import).layer(DefaultBodyLimit::max(import_body_limit)),
        )
        .route("/purge", delete(handlers::purge))
        .route("/warmup", post(handlers::warmup))
        .route("/l1/clear", post(handlers::clear_l1))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
