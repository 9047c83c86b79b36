//! Store CRUD endpoints.

use crate::api::error::{ApiJson, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rice_core::{Store, StoreConfig};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStoreRequest {
    pub name: String,
    #[serde(default)]
    pub config: Option<StoreConfig>,
}

/// `GET /v1/stores`
pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Store>>> {
    Ok(Json(state.stores.list()))
}

/// `POST /v1/stores`
pub async fn create(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CreateStoreRequest>,
) -> ApiResult<(StatusCode, Json<Store>)> {
    let store = state.stores.create(&request.name, request.config).await?;
    Ok((StatusCode::CREATED, Json(store)))
}

/// `GET /v1/stores/{store}`
pub async fn get_store(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.stores.get(&store)?;
    let stats = state.stores.stats(&store.name).await.ok();
    Ok(Json(json!({
        "name": store.name,
        "config": store.config,
        "created_at": store.created_at,
        "stats": stats,
    })))
}

/// `DELETE /v1/stores/{store}`
pub async fn delete_store(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stores.delete(&store).await?;
    Ok(Json(json!({ "deleted": store })))
}
