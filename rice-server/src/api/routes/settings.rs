//! Settings endpoints: snapshot export, single-key updates, bulk restore.

use crate::api::error::{ApiJson, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `GET /v1/settings`
pub async fn snapshot(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "version": state.settings.version(),
        "values": state.settings.snapshot(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetSettingRequest {
    pub value: serde_json::Value,
}

/// `PUT /v1/settings/{key}`
pub async fn set_value(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    ApiJson(request): ApiJson<SetSettingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let version = state.settings.set(&key, request.value).await?;
    Ok(Json(json!({ "key": key, "version": version })))
}

/// `POST /v1/settings/restore`
pub async fn restore(
    State(state): State<Arc<AppState>>,
    ApiJson(values): ApiJson<BTreeMap<String, serde_json::Value>>,
) -> ApiResult<Json<serde_json::Value>> {
    let version = state.settings.restore(values).await?;
    Ok(Json(json!({ "version": version })))
}
