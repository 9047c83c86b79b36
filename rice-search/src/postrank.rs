//! Post-rank pipeline: near-duplicate removal, MMR diversification, and
//! file-level aggregation, applied in that fixed order. Every step is
//! independently skippable; disabling all three yields pure rerank order.

use crate::Candidate;
use std::collections::{HashMap, HashSet};

/// Post-rank configuration for one search.
#[derive(Debug, Clone)]
pub struct PostRankConfig {
    pub dedup_enabled: bool,
    /// Jaccard similarity at or above which the lower-scored of two
    /// candidates is dropped
    pub dedup_threshold: f32,
    pub diversity_enabled: bool,
    /// MMR relevance/diversity trade-off
    pub mmr_lambda: f32,
    pub group_by_file: bool,
    pub max_per_file: usize,
}

impl Default for PostRankConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: true,
            dedup_threshold: 0.85,
            diversity_enabled: true,
            mmr_lambda: 0.7,
            group_by_file: false,
            max_per_file: 3,
        }
    }
}

/// Word shingle size for the similarity proxy.
const SHINGLE_SIZE: usize = 5;

/// Shingled Jaccard similarity over chunk contents; cheap and good
/// enough as a near-duplicate proxy.
fn shingles(content: &str) -> HashSet<u64> {
    use std::hash::{Hash, Hasher};

    let words: Vec<&str> = content.split_whitespace().collect();
    let mut set = HashSet::new();
    if words.is_empty() {
        return set;
    }
    if words.len() < SHINGLE_SIZE {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        words.hash(&mut hasher);
        set.insert(hasher.finish());
        return set;
    }
    for window in words.windows(SHINGLE_SIZE) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        window.hash(&mut hasher);
        set.insert(hasher.finish());
    }
    set
}

fn jaccard(a: &HashSet<u64>, b: &HashSet<u64>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Apply the post-rank pipeline to candidates already ordered by score.
pub fn post_rank(candidates: Vec<Candidate>, config: &PostRankConfig) -> Vec<Candidate> {
    let mut candidates = candidates;
    if config.dedup_enabled {
        candidates = dedup(candidates, config.dedup_threshold);
    }
    if config.diversity_enabled {
        candidates = mmr(candidates, config.mmr_lambda);
    }
    if config.group_by_file {
        candidates = group_by_file(candidates, config.max_per_file);
    }
    candidates
}

/// Drop each candidate that is a near-duplicate of an already-kept,
/// higher-scored one. Chunks owned by different connections are distinct
/// results per tenant and are never collapsed into each other.
fn dedup(candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    let mut kept: Vec<(Candidate, HashSet<u64>)> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let signature = shingles(&candidate.chunk.content);
        let duplicate = kept.iter().any(|(existing, existing_signature)| {
            existing.chunk.connection_id == candidate.chunk.connection_id
                && jaccard(&signature, existing_signature) >= threshold
        });
        if !duplicate {
            kept.push((candidate, signature));
        }
    }
    kept.into_iter().map(|(candidate, _)| candidate).collect()
}

/// Maximal Marginal Relevance: iteratively pick the candidate maximizing
/// `λ·relevance − (1−λ)·max_similarity_to_selected`.
fn mmr(candidates: Vec<Candidate>, lambda: f32) -> Vec<Candidate> {
    if candidates.len() <= 2 {
        return candidates;
    }

    // normalize relevance into [0, 1] so it is comparable to similarity
    let max_score = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let min_score = candidates.iter().map(|c| c.score).fold(f32::INFINITY, f32::min);
    let range = (max_score - min_score).max(1e-9);

    let mut remaining: Vec<(Candidate, HashSet<u64>, f32)> = candidates
        .into_iter()
        .map(|candidate| {
            let signature = shingles(&candidate.chunk.content);
            let relevance = (candidate.score - min_score) / range;
            (candidate, signature, relevance)
        })
        .collect();

    let mut selected: Vec<(Candidate, HashSet<u64>)> = Vec::with_capacity(remaining.len());
    // highest relevance seeds the selection
    selected.push({
        let (candidate, signature, _) = remaining.remove(0);
        (candidate, signature)
    });

    while !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (index, (_, signature, relevance)) in remaining.iter().enumerate() {
            let max_similarity = selected
                .iter()
                .map(|(_, sig)| jaccard(signature, sig))
                .fold(0.0f32, f32::max);
            let value = lambda * relevance - (1.0 - lambda) * max_similarity;
            if value > best_value {
                best_value = value;
                best_index = index;
            }
        }
        let (candidate, signature, _) = remaining.remove(best_index);
        selected.push((candidate, signature));
    }

    selected.into_iter().map(|(candidate, _)| candidate).collect()
}

/// Keep at most `max_per_file` chunks per path, files ordered by their
/// best score, chunks within a file by score.
fn group_by_file(candidates: Vec<Candidate>, max_per_file: usize) -> Vec<Candidate> {
    let mut file_order: Vec<String> = Vec::new();
    let mut by_file: HashMap<String, Vec<Candidate>> = HashMap::new();

    // input is score-ordered, so first sight of a path is its best score
    for candidate in candidates {
        let path = candidate.chunk.path.clone();
        let entry = by_file.entry(path.clone()).or_default();
        if entry.is_empty() {
            file_order.push(path);
        }
        if entry.len() < max_per_file.max(1) {
            entry.push(candidate);
        }
    }

    let mut result = Vec::new();
    for path in file_order {
        if let Some(chunks) = by_file.remove(&path) {
            result.extend(chunks);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rice_core::Chunk;

    fn candidate(id: &str, path: &str, content: &str, score: f32) -> Candidate {
        Candidate {
            chunk: Chunk {
                id: id.to_string(),
                document_id: String::new(),
                store: "default".into(),
                path: path.to_string(),
                language: "rust".into(),
                content: content.to_string(),
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
            sparse_score: None,
            dense_score: None,
            rerank_score: None,
        }
    }

    const LONG_A: &str = "fn read_config(path: &Path) -> Result<Config> { let raw = fs::read_to_string(path)?; toml::from_str(&raw) }";
    const LONG_B: &str = "fn send_request(client: &Client, url: &str) -> Result<Response> { client.get(url).timeout(LIMIT).send() }";

    #[test]
    fn test_dedup_drops_near_duplicates() {
        let candidates = vec![
            candidate("a", "a.rs", LONG_A, 0.9),
            candidate("b", "b.rs", LONG_A, 0.8), // identical content
            candidate("c", "c.rs", LONG_B, 0.7),
        ];
        let result = dedup(candidates, 0.85);
        let ids: Vec<&str> = result.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_dedup_keeps_distinct_content() {
        let candidates = vec![
            candidate("a", "a.rs", LONG_A, 0.9),
            candidate("b", "b.rs", LONG_B, 0.8),
        ];
        assert_eq!(dedup(candidates, 0.85).len(), 2);
    }

    #[test]
    fn test_mmr_prefers_diverse_runner_up() {
        // two near-identical top candidates and one distinct lower one:
        // MMR should promote the distinct candidate over the duplicate
        let candidates = vec![
            candidate("top", "a.rs", LONG_A, 1.0),
            candidate("dup", "b.rs", LONG_A, 0.95),
            candidate("other", "c.rs", LONG_B, 0.9),
        ];
        let result = mmr(candidates, 0.5);
        let ids: Vec<&str> = result.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids[0], "top");
        assert_eq!(ids[1], "other");
    }

    #[test]
    fn test_group_by_file_caps_and_orders() {
        let candidates = vec![
            candidate("a1", "a.rs", "content a one", 0.9),
            candidate("b1", "b.rs", "content b one", 0.85),
            candidate("a2", "a.rs", "content a two", 0.8),
            candidate("a3", "a.rs", "content a three", 0.7),
            candidate("a4", "a.rs", "content a four", 0.6),
        ];
        let result = group_by_file(candidates, 2);
        let ids: Vec<&str> = result.iter().map(|c| c.chunk.id.as_str()).collect();
        // a.rs first (best score), capped at 2, then b.rs
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_all_disabled_is_identity() {
        let candidates = vec![
            candidate("a", "a.rs", LONG_A, 0.9),
            candidate("b", "b.rs", LONG_A, 0.8),
        ];
        let config = PostRankConfig {
            dedup_enabled: false,
            diversity_enabled: false,
            group_by_file: false,
            ..PostRankConfig::default()
        };
        let result = post_rank(candidates.clone(), &config);
        let ids: Vec<&str> = result.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = shingles(LONG_A);
        let b = shingles(LONG_B);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert!(jaccard(&a, &b) < 0.2);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
