//! Reciprocal-rank fusion of sparse and dense retrieval lists.

use crate::Candidate;
use rice_vector::QueryHit;
use std::collections::HashMap;

/// Fuse two ranked lists with weighted RRF:
///
/// `score(d) = sparse_weight / (k + rank_sparse(d)) + dense_weight / (k + rank_dense(d))`
///
/// Rank 1 is the top result; a document absent from a list contributes
/// nothing for that list. Ties break by better individual rank, then by
/// chunk id, so fusion output is stable.
pub fn fuse_rrf(
    sparse_hits: Vec<QueryHit>,
    dense_hits: Vec<QueryHit>,
    sparse_weight: f32,
    dense_weight: f32,
    k: f32,
) -> Vec<Candidate> {
    struct Entry {
        candidate: Candidate,
        best_rank: usize,
    }

    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (index, hit) in sparse_hits.into_iter().enumerate() {
        let rank = index + 1;
        let contribution = sparse_weight / (k + rank as f32);
        entries
            .entry(hit.chunk.id.clone())
            .and_modify(|entry| {
                entry.candidate.score += contribution;
                entry.candidate.sparse_score = Some(hit.score);
                entry.best_rank = entry.best_rank.min(rank);
            })
            .or_insert_with(|| Entry {
                candidate: Candidate {
                    score: contribution,
                    sparse_score: Some(hit.score),
                    dense_score: None,
                    rerank_score: None,
                    chunk: hit.chunk,
                },
                best_rank: rank,
            });
    }

    for (index, hit) in dense_hits.into_iter().enumerate() {
        let rank = index + 1;
        let contribution = dense_weight / (k + rank as f32);
        entries
            .entry(hit.chunk.id.clone())
            .and_modify(|entry| {
                entry.candidate.score += contribution;
                entry.candidate.dense_score = Some(hit.score);
                entry.best_rank = entry.best_rank.min(rank);
            })
            .or_insert_with(|| Entry {
                candidate: Candidate {
                    score: contribution,
                    sparse_score: None,
                    dense_score: Some(hit.score),
                    rerank_score: None,
                    chunk: hit.chunk,
                },
                best_rank: rank,
            });
    }

    let mut entries: Vec<Entry> = entries.into_values().collect();
    entries.sort_by(|a, b| {
        b.candidate
            .score
            .partial_cmp(&a.candidate.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.candidate.chunk.id.cmp(&b.candidate.chunk.id))
    });
    entries.into_iter().map(|entry| entry.candidate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rice_core::Chunk;

    fn hit(id: &str, score: f32) -> QueryHit {
        QueryHit {
            chunk: Chunk {
                id: id.to_string(),
                document_id: String::new(),
                store: "default".into(),
                path: format!("{}.rs", id),
                language: "rust".into(),
                content: String::new(),
                symbols: vec![],
                start_line: 1,
                end_line: 1,
                start_offset: 0,
                end_offset: 0,
                token_count: 0,
                document_hash: String::new(),
                indexed_at: Utc::now(),
                connection_id: None,
            },
            score,
        }
    }

    #[test]
    fn test_documents_in_both_lists_win() {
        let sparse = vec![hit("a", 3.0), hit("b", 2.0)];
        let dense = vec![hit("b", 0.9), hit("c", 0.8)];

        let fused = fuse_rrf(sparse, dense, 0.5, 0.5, 60.0);
        assert_eq!(fused[0].chunk.id, "b");
        assert!(fused[0].sparse_score.is_some());
        assert!(fused[0].dense_score.is_some());
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_weights_shift_ordering() {
        let sparse = vec![hit("lexical", 5.0)];
        let dense = vec![hit("semantic", 0.99)];

        let sparse_only = fuse_rrf(sparse.clone(), dense.clone(), 1.0, 0.0, 60.0);
        assert_eq!(sparse_only[0].chunk.id, "lexical");
        assert_eq!(sparse_only[1].score, 0.0);

        let dense_only = fuse_rrf(sparse, dense, 0.0, 1.0, 60.0);
        assert_eq!(dense_only[0].chunk.id, "semantic");
    }

    #[test]
    fn test_rank_formula() {
        let sparse = vec![hit("a", 1.0), hit("b", 0.5)];
        let fused = fuse_rrf(sparse, vec![], 1.0, 0.0, 60.0);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-6);
        assert!((fused[1].score - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_breaks_are_stable() {
        // identical contributions: same rank in each list
        let fused_a = fuse_rrf(vec![hit("x", 1.0)], vec![hit("y", 1.0)], 0.5, 0.5, 60.0);
        let fused_b = fuse_rrf(vec![hit("x", 1.0)], vec![hit("y", 1.0)], 0.5, 0.5, 60.0);
        let ids_a: Vec<&str> = fused_a.iter().map(|c| c.chunk.id.as_str()).collect();
        let ids_b: Vec<&str> = fused_b.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        // equal score and rank resolves lexicographically
        assert_eq!(ids_a, vec!["x", "y"]);
    }

    #[test]
    fn test_empty_lists() {
        assert!(fuse_rrf(vec![], vec![], 0.5, 0.5, 60.0).is_empty());
        let fused = fuse_rrf(vec![hit("a", 1.0)], vec![], 0.5, 0.5, 60.0);
        assert_eq!(fused.len(), 1);
    }
}
