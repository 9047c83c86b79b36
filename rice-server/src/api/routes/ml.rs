//! Direct ML endpoints, mirroring the bus request payloads.

use crate::api::error::{ApiJson, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use rice_core::protocol::{
    EmbedRequest, EmbedResponse, RerankRequest, RerankResponse, SparseEncodeRequest,
    SparseEncodeResponse,
};
use std::sync::Arc;
use std::time::Instant;

/// `POST /v1/ml/embed`
pub async fn embed(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<EmbedRequest>,
) -> ApiResult<Json<EmbedResponse>> {
    let started = Instant::now();
    let vectors = state.ml.embed_texts(&request.texts).await?;
    Ok(Json(EmbedResponse {
        vectors,
        model: state.ml.health().embed.model,
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}

/// `POST /v1/ml/sparse`
pub async fn sparse(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<SparseEncodeRequest>,
) -> ApiResult<Json<SparseEncodeResponse>> {
    let started = Instant::now();
    let vectors = state.ml.sparse_texts(&request.texts).await?;
    Ok(Json(SparseEncodeResponse {
        vectors,
        model: state.ml.health().sparse.model,
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}

/// `POST /v1/ml/rerank`
pub async fn rerank(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RerankRequest>,
) -> ApiResult<Json<RerankResponse>> {
    let started = Instant::now();
    let scores = state
        .ml
        .rerank_pairs(&request.query, &request.documents)
        .await?;
    Ok(Json(RerankResponse {
        scores,
        model: state.ml.health().rerank.model,
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}
