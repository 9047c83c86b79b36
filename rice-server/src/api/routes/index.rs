//! Indexing endpoints: ingest, delete, sync, stats, file listing.

use crate::api::connection_from_headers;
use crate::api::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use rice_core::protocol::{DeleteIndexRequest, IndexRequest, IndexResult, SyncIndexRequest};
use rice_core::Error;
use rice_vector::{FileInfo, PointFilter, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `POST /v1/stores/{store}/index`
pub async fn index_documents(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<IndexRequest>,
) -> ApiResult<Json<IndexResult>> {
    if request.documents.is_empty() {
        return Err(ApiError(Error::validation("documents must not be empty")));
    }

    let store = state.stores.resolve(&store).await?;
    let connection_id = connection_from_headers(&headers);
    let cancel = CancellationToken::new();

    let request_timeout =
        Duration::from_secs(state.pipeline.config_snapshot().request_timeout_secs);
    let result = tokio::time::timeout(
        request_timeout,
        state
            .pipeline
            .index(&store, request, connection_id.clone(), &cancel),
    )
    .await
    .map_err(|_| Error::timeout("index request exceeded its deadline"))??;

    if let Some(connection_id) = &connection_id {
        state
            .connections
            .record_index(connection_id, result.indexed as u64)
            .await;
    }
    Ok(Json(result))
}

/// `DELETE /v1/stores/{store}/index`
pub async fn delete_index(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<DeleteIndexRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.stores.resolve(&store).await?;
    let connection_id = connection_from_headers(&headers);
    let deleted = state.pipeline.remove(&store, request, connection_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// `POST /v1/stores/{store}/index/sync`
pub async fn sync_index(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<SyncIndexRequest>,
) -> ApiResult<Json<rice_core::protocol::SyncIndexResult>> {
    let store = state.stores.resolve(&store).await?;
    let connection_id = connection_from_headers(&headers);
    let result = state.pipeline.sync(&store, request, connection_id).await?;
    Ok(Json(result))
}

/// `GET /v1/stores/{store}/index/stats`
pub async fn index_stats(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.stores.resolve(&store).await?;
    let stats = state.stores.stats(&store.name).await?;
    Ok(Json(json!({
        "store": store.name,
        "config": store.config,
        "stats": stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Path prefix filter
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    50
}
fn default_sort_by() -> String {
    "path".to_string()
}
fn default_sort_order() -> String {
    "asc".to_string()
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileInfo>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// `GET /v1/stores/{store}/index/files`
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
    Query(query): Query<FilesQuery>,
) -> ApiResult<Json<FilesResponse>> {
    if query.page == 0 {
        return Err(ApiError(Error::validation("page is 1-based")));
    }
    let page_size = query.page_size.clamp(1, 500);

    let store = state.stores.resolve(&store).await?;
    let filter = PointFilter {
        path_prefix: query.path.clone(),
        languages: query.language.clone().into_iter().collect(),
        ..PointFilter::default()
    };
    let mut files = state.vector_store.list_files(&store.name, &filter).await?;

    match query.sort_by.as_str() {
        "path" => files.sort_by(|a, b| a.path.cmp(&b.path)),
        "chunks" => files.sort_by(|a, b| a.chunk_count.cmp(&b.chunk_count)),
        "indexed_at" => files.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at)),
        other => {
            return Err(ApiError(Error::validation(format!(
                "unknown sort_by '{}'",
                other
            ))))
        }
    }
    match query.sort_order.as_str() {
        "asc" => {}
        "desc" => files.reverse(),
        other => {
            return Err(ApiError(Error::validation(format!(
                "unknown sort_order '{}'",
                other
            ))))
        }
    }

    let total = files.len();
    let files = files
        .into_iter()
        .skip((query.page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(Json(FilesResponse {
        files,
        total,
        page: query.page,
        page_size,
    }))
}
