//! Connection endpoints.

use crate::api::error::{ApiJson, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use rice_core::{Connection, PcInfo};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub mac: String,
    pub hostname: String,
    pub user: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `GET /v1/connections`
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Connection>>> {
    Ok(Json(state.connections.list()))
}

/// `POST /v1/connections`: register a client and return its stable id.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<Json<Connection>> {
    let info = PcInfo {
        mac: request.mac,
        hostname: request.hostname,
        user: request.user,
    };
    let connection = state
        .connections
        .register(&info, request.display_name)
        .await?;
    Ok(Json(connection))
}
