//! Search endpoints.

use crate::api::error::{ApiJson, ApiResult};
use crate::api::connection_from_headers;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rice_core::protocol::{SearchRequest, SearchResponse};
use rice_core::DEFAULT_STORE;
use rice_search::RequestContext;
use serde::Deserialize;
use std::sync::Arc;

/// Reduced body for `POST /v1/search`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuickSearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

async fn run_search(
    state: &Arc<AppState>,
    store_name: &str,
    request: SearchRequest,
    headers: &HeaderMap,
) -> ApiResult<Json<SearchResponse>> {
    let store = state.stores.resolve(store_name).await?;

    let mut ctx = RequestContext::new();
    ctx.connection_id = connection_from_headers(headers);

    let response = state.search.search(&store, request, &ctx).await?;

    if let Some(connection_id) = &ctx.connection_id {
        state.connections.record_search(connection_id).await;
    }
    Ok(Json(response))
}

/// `POST /v1/search`: minimal body against the default store.
pub async fn quick_search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<QuickSearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let mut request = SearchRequest::query(body.query);
    if let Some(top_k) = body.top_k {
        request.top_k = top_k;
    }
    run_search(&state, DEFAULT_STORE, request, &headers).await
}

/// `POST /v1/stores/{store}/search`: full request surface.
pub async fn store_search(
    State(state): State<Arc<AppState>>,
    Path(store): Path<String>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    run_search(&state, &store, request, &headers).await
}
