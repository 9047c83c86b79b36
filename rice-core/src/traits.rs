//! Trait seams between components.

use crate::error::Result;
use crate::types::{DenseVector, SparseVector};
use async_trait::async_trait;

/// Typed interface to the ML heads.
///
/// The search and indexing pipelines normally reach the ML service through
/// the bus; this trait is the direct in-process fallback they use when the
/// bus is unreachable or times out. Neither side imports the other's
/// concrete type: the ML service implements this trait and registers bus
/// handlers, the pipelines hold it as `Arc<dyn MlBackend>`.
#[async_trait]
pub trait MlBackend: Send + Sync {
    /// Dense embeddings for a batch of texts, L2-normalized, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<DenseVector>>;

    /// Sparse encodings for a batch of texts, in input order.
    async fn encode_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>>;

    /// Relevance scores for `(query, document)` pairs, in document order.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}
