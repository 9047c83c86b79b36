//! HTTP binding: router assembly and shared middleware.
//!
//! HTTP is one of two planned bindings over the same service layer; the
//! handlers translate requests into service calls and never hold logic
//! of their own.

pub mod error;
pub mod routes;

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Header conveying the caller's connection for tagging and scoping.
pub const CONNECTION_HEADER: &str = "x-connection-id";

/// Extract and normalize the connection header.
pub(crate) fn connection_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONNECTION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

/// In-flight tracking plus the readiness gate: once shutdown flips the
/// flag, everything except the probes answers 503.
async fn lifecycle_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let always_served = matches!(path, "/healthz" | "/readyz" | "/metrics");
    if !state.is_ready() && !always_served {
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "server is shutting down",
                "code": "SERVICE_UNAVAILABLE",
            })),
        )
            .into_response();
    }

    let _guard = state.track_request();
    next.run(request).await
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let http_timeout = Duration::from_secs(state.config.server.http_timeout_secs);
    Router::new()
        .route("/v1/search", post(routes::search::quick_search))
        .route(
            "/v1/stores",
            get(routes::stores::list).post(routes::stores::create),
        )
        .route(
            "/v1/stores/{store}",
            get(routes::stores::get_store).delete(routes::stores::delete_store),
        )
        .route("/v1/stores/{store}/search", post(routes::search::store_search))
        .route(
            "/v1/stores/{store}/index",
            post(routes::index::index_documents).delete(routes::index::delete_index),
        )
        .route("/v1/stores/{store}/index/sync", post(routes::index::sync_index))
        .route("/v1/stores/{store}/index/stats", get(routes::index::index_stats))
        .route("/v1/stores/{store}/index/files", get(routes::index::list_files))
        .route("/v1/ml/embed", post(routes::ml::embed))
        .route("/v1/ml/sparse", post(routes::ml::sparse))
        .route("/v1/ml/rerank", post(routes::ml::rerank))
        .route("/v1/settings", get(routes::settings::snapshot))
        .route("/v1/settings/restore", post(routes::settings::restore))
        .route("/v1/settings/{key}", put(routes::settings::set_value))
        .route(
            "/v1/connections",
            get(routes::connections::list).post(routes::connections::register),
        )
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/metrics", get(routes::health::metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            lifecycle_middleware,
        ))
        .layer(TimeoutLayer::new(http_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
