//! Vector-store adapter: a thin typed wrapper over the vector database.
//!
//! Two implementations share one trait: [`QdrantStore`] talks to a Qdrant
//! server (named dense + sparse vectors, payload indexes, server-side RRF
//! fusion), and [`InMemoryStore`] provides the same semantics in process
//! for tests and model-less deployments.

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rice_core::{EmbeddedChunk, Result, SparseVector, StoreStats};
use serde::{Deserialize, Serialize};

/// Name of the dense vector field in every collection.
pub const DENSE_VECTOR_NAME: &str = "dense";

/// Name of the sparse vector field in every collection.
pub const SPARSE_VECTOR_NAME: &str = "sparse";

/// Filter over chunk payload fields.
///
/// All present members must match (conjunction); `languages` matches any of
/// the listed values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointFilter {
    /// Exact path match
    pub path: Option<String>,
    /// Path prefix match
    pub path_prefix: Option<String>,
    pub languages: Vec<String>,
    pub connection_id: Option<String>,
    pub document_hash: Option<String>,
}

impl PointFilter {
    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.path_prefix.is_none()
            && self.languages.is_empty()
            && self.connection_id.is_none()
            && self.document_hash.is_none()
    }

    /// Filter for all chunks of one file.
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// One retrieval hit: the stored chunk plus the backend's score.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub chunk: rice_core::Chunk,
    pub score: f32,
}

/// Per-file aggregate used by the file listing and sync endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub language: String,
    pub chunk_count: u64,
    pub document_hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// Reachability and version probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreHealth {
    pub ok: bool,
    pub backend: String,
    pub version: Option<String>,
}

/// Typed operations the core consumes from the vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the store's collection if missing; idempotent.
    async fn ensure_collection(&self, store: &str, dense_dimension: usize) -> Result<()>;

    /// Drop the store's collection and everything in it.
    async fn drop_collection(&self, store: &str) -> Result<()>;

    /// Batched upsert; same chunk id replaces the prior point.
    async fn upsert_chunks(&self, store: &str, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Delete every point matching the filter.
    async fn delete_by_filter(&self, store: &str, filter: &PointFilter) -> Result<()>;

    /// Dense-only retrieval, ranked by cosine similarity.
    async fn query_dense(
        &self,
        store: &str,
        vector: &[f32],
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>>;

    /// Sparse-only retrieval, ranked by dot product.
    async fn query_sparse(
        &self,
        store: &str,
        vector: &SparseVector,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>>;

    /// Both retrievals executed backend-side and fused with RRF.
    async fn query_hybrid_rrf(
        &self,
        store: &str,
        sparse: &SparseVector,
        dense: &[f32],
        prefetch_limit: usize,
        final_limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>>;

    /// Count points matching the filter.
    async fn count(&self, store: &str, filter: &PointFilter) -> Result<u64>;

    /// Per-file aggregates for every indexed file matching the filter.
    async fn list_files(&self, store: &str, filter: &PointFilter) -> Result<Vec<FileInfo>>;

    /// Live statistics for the store's collection.
    async fn stats(&self, store: &str) -> Result<StoreStats>;

    /// Reachability + version probe.
    async fn health(&self) -> Result<VectorStoreHealth>;
}

/// Reciprocal-rank-fusion score contribution for one list position.
///
/// `rank` is 1-based; `k` is the RRF constant (60 by convention).
pub(crate) fn rrf_contribution(weight: f32, k: f32, rank: usize) -> f32 {
    weight / (k + rank as f32)
}
