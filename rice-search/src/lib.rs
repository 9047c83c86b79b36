//! The search pipeline: query understanding, hybrid retrieval with RRF
//! fusion, multi-pass cross-encoder reranking, and post-rank cleanup
//! (near-duplicate removal, MMR diversification, file aggregation).

pub mod fusion;
pub mod postrank;
pub mod rerank;
pub mod service;
pub mod understanding;

pub use service::{RequestContext, SearchService, SearchTuning};
pub use understanding::QueryUnderstanding;

use rice_core::Chunk;

/// A retrieval candidate flowing through fusion, rerank and post-rank.
///
/// `score` is the current ordering key; each stage that re-scores keeps
/// the per-stage components so the response can echo them.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub score: f32,
    pub sparse_score: Option<f32>,
    pub dense_score: Option<f32>,
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn from_chunk(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score,
            sparse_score: None,
            dense_score: None,
            rerank_score: None,
        }
    }
}

/// Sort candidates by score descending with the chunk id as a stable
/// tie-break, so identical inputs always produce identical orderings.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
