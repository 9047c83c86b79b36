//! Liveness, readiness and metrics endpoints.

use crate::api::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

/// Always 200 while the process is alive.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// 200 when the vector store and every ML head are usable; 503 otherwise
/// (including during shutdown drain).
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    if state.readiness().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "ml": state.ml.health(),
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready" })),
        )
            .into_response()
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let body = crate::metrics::render(&state);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
