//! Wire payloads: search/index requests and responses, ML bus messages,
//! and the events published on the bus.
//!
//! Client-facing input types reject unknown fields so typos surface as
//! 400s instead of silently ignored options.

use crate::types::SparseVector;
use serde::{Deserialize, Serialize};

fn default_top_k() -> usize {
    20
}

fn default_weight() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_rerank_top_k() -> usize {
    50
}

fn default_max_per_file() -> usize {
    3
}

/// Search request as accepted by the HTTP layer and the search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub filter: SearchFilter,

    #[serde(default)]
    pub options: SearchOptions,
}

impl SearchRequest {
    /// Minimal request with defaults for everything but the query.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            filter: SearchFilter::default(),
            options: SearchOptions::default(),
        }
    }
}

/// Optional retrieval filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,

    /// Connection scope; `"*"` or `"all"` disables scoping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Per-request tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchOptions {
    #[serde(default = "default_weight")]
    pub sparse_weight: f32,

    #[serde(default = "default_weight")]
    pub dense_weight: f32,

    #[serde(default = "default_true")]
    pub enable_reranking: bool,

    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,

    #[serde(default = "default_true")]
    pub include_content: bool,

    #[serde(default)]
    pub group_by_file: bool,

    #[serde(default = "default_max_per_file")]
    pub max_per_file: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            sparse_weight: default_weight(),
            dense_weight: default_weight(),
            enable_reranking: true,
            rerank_top_k: default_rerank_top_k(),
            include_content: true,
            group_by_file: false,
            max_per_file: default_max_per_file(),
        }
    }
}

/// Parsed form of a search query as produced by query understanding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub original: String,
    pub intent: QueryIntent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
    pub keywords: Vec<String>,
    pub code_terms: Vec<String>,
    pub expanded: Vec<String>,
    pub search_query: String,
    pub confidence: f32,
    pub used_model: bool,
}

/// Query intent classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    #[default]
    Find,
    Explain,
    List,
    Fix,
    Compare,
    Other,
}

/// What kind of entity the query is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Function,
    Class,
    Variable,
    File,
    Error,
    Other,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub path: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub symbols: Vec<String>,
    /// Omitted when `include_content` is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Final score after fusion/rerank/post-rank
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub understand_ms: u64,
    pub encode_ms: u64,
    pub retrieve_ms: u64,
    pub rerank_ms: u64,
    pub post_rank_ms: u64,
    pub total_ms: u64,
}

/// Search response with pipeline metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub store: String,
    pub results: Vec<SearchHit>,
    pub total_candidates: usize,
    pub reranking_applied: bool,
    /// Number of rerank passes that actually ran (0 when disabled/failed)
    pub rerank_passes: u32,
    pub parsed_query: ParsedQuery,
    pub timings: StageTimings,
}

/// One document submitted for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDocument {
    pub path: String,
    pub content: String,
    /// Override for extension-based detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Index request as accepted by the HTTP layer and the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexRequest {
    pub documents: Vec<IndexDocument>,

    /// Re-embed even when the content hash is unchanged
    #[serde(default)]
    pub force: bool,
}

/// A failure scoped to a single file; the rest of the batch proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Outcome of an index request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexResult {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_created: usize,
    pub errors: Vec<FileError>,
    pub elapsed_ms: u64,
}

/// Request to delete indexed files by explicit paths and/or prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteIndexRequest {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

/// Request to reconcile the index against the set of paths that still exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncIndexRequest {
    pub current_paths: Vec<String>,
}

/// Result of a sync: which stale paths were removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncIndexResult {
    pub removed: usize,
    pub removed_paths: Vec<String>,
}

// --- ML bus payloads ------------------------------------------------------

/// Request dense embeddings for a batch of texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub latency_ms: u64,
}

/// Request sparse encodings for a batch of texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseEncodeRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseEncodeResponse {
    pub vectors: Vec<SparseVector>,
    pub model: String,
    pub latency_ms: u64,
}

/// Error payload published in place of a response when a handler fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusErrorResponse {
    pub error: String,
}

/// Request relevance scores for `(query, document)` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
    pub query: String,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
    pub scores: Vec<f32>,
    pub model: String,
    pub latency_ms: u64,
}

// --- Events ---------------------------------------------------------------

/// Emitted for every chunk produced by the indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCreatedEvent {
    pub store: String,
    pub path: String,
    pub chunk_id: String,
    pub language: String,
}

/// Emitted on store lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEvent {
    pub name: String,
}

/// One key transition within a settings change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingChange {
    pub key: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Emitted whenever settings change; bulk restores produce a single event
/// describing the whole diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsChangedEvent {
    pub version: u64,
    pub changes: Vec<SettingChange>,
}

/// Emitted when a connection registers or reports activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub connection_id: String,
    pub files_indexed: u64,
    pub searches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"hello"}"#).unwrap();
        assert_eq!(req.top_k, 20);
        assert_eq!(req.options.sparse_weight, 0.5);
        assert!(req.options.enable_reranking);
        assert!(req.filter.connection_id.is_none());
    }

    #[test]
    fn test_search_request_rejects_unknown_fields() {
        let result: Result<SearchRequest, _> =
            serde_json::from_str(r#"{"query":"hello","topk":5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_rejects_unknown_fields() {
        let result: Result<SearchFilter, _> =
            serde_json::from_str(r#"{"path_prefiks":"src/"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_index_request_roundtrip() {
        let req = IndexRequest {
            documents: vec![IndexDocument {
                path: "a.go".into(),
                content: "package a".into(),
                language: None,
            }],
            force: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: IndexRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.documents.len(), 1);
        assert!(!parsed.force);
    }

    #[test]
    fn test_intent_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&QueryIntent::Explain).unwrap(),
            r#""explain""#
        );
    }
}
