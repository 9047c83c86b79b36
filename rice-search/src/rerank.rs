//! Multi-pass cross-encoder reranking over the bus, with an early-exit
//! confidence check between passes.

use crate::{sort_candidates, Candidate};
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::protocol::{BusErrorResponse, RerankRequest, RerankResponse};
use rice_core::{Error, MlBackend, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Snippet budget (chars) for the first pass; the second pass widens the
/// window by [`PASS_TWO_WIDENING`].
const PASS_ONE_SNIPPET_CHARS: usize = 1024;

/// Context widening factor for the second pass.
const PASS_TWO_WIDENING: usize = 2;

/// Outcome metadata attached to the search response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RerankOutcome {
    pub applied: bool,
    pub passes: u32,
}

/// Reranker settings resolved from tuning + request options.
#[derive(Debug, Clone, Copy)]
pub struct RerankSettings {
    /// Score gap between rank 1 and the first candidate outside the
    /// requested top-k that makes a second pass pointless
    pub confidence_margin: f32,
    pub enable_second_pass: bool,
    pub timeout: Duration,
}

/// Scores candidates via the ML service (bus first, direct fallback).
pub struct Reranker {
    bus: Arc<dyn EventBus>,
    ml: Option<Arc<dyn MlBackend>>,
}

impl Reranker {
    pub fn new(bus: Arc<dyn EventBus>, ml: Option<Arc<dyn MlBackend>>) -> Self {
        Self { bus, ml }
    }

    /// Rerank in place. On ML failure the fusion ordering is preserved
    /// and `applied` stays false; the search degrades instead of failing.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &mut Vec<Candidate>,
        top_k: usize,
        settings: RerankSettings,
    ) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome::default();
        }

        // Pass 1: score every candidate on a bounded snippet.
        let documents: Vec<String> = candidates
            .iter()
            .map(|c| snippet(&c.chunk.content, PASS_ONE_SNIPPET_CHARS))
            .collect();
        let scores = match self.score(query, &documents, settings.timeout).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!("rerank pass 1 failed, keeping fusion order: {}", e);
                return RerankOutcome::default();
            }
        };
        apply_scores(candidates, &scores);
        let mut outcome = RerankOutcome {
            applied: true,
            passes: 1,
        };

        // Early exit: a clear winner margin over the first candidate
        // outside the top-k makes the expensive pass redundant.
        if !settings.enable_second_pass || candidates.len() <= top_k {
            return outcome;
        }
        let gap = candidates[0].score - candidates[top_k.min(candidates.len() - 1)].score;
        if gap > settings.confidence_margin {
            debug!(gap, "rerank early exit after pass 1");
            return outcome;
        }

        // Pass 2: re-score the top 2·top_k with a widened context window.
        let second_count = (2 * top_k).min(candidates.len());
        let documents: Vec<String> = candidates[..second_count]
            .iter()
            .map(|c| snippet(&c.chunk.content, PASS_ONE_SNIPPET_CHARS * PASS_TWO_WIDENING))
            .collect();
        match self.score(query, &documents, settings.timeout).await {
            Ok(scores) => {
                apply_scores(&mut candidates[..second_count], &scores);
                sort_candidates(candidates);
                outcome.passes = 2;
            }
            Err(e) => {
                // pass 1 ordering stands
                warn!("rerank pass 2 failed, keeping pass 1 order: {}", e);
            }
        }
        outcome
    }

    async fn score(
        &self,
        query: &str,
        documents: &[String],
        timeout: Duration,
    ) -> Result<Vec<f32>> {
        let request = BusMessage::request(
            topics::ML_RERANK_REQUEST,
            &RerankRequest {
                query: query.to_string(),
                documents: documents.to_vec(),
            },
        )?;

        let via_bus: Result<Vec<f32>> = match self.bus.request(request, timeout).await {
            Ok(response) => match response.decode::<RerankResponse>() {
                Ok(decoded) => Ok(decoded.scores),
                Err(_) => match response.decode::<BusErrorResponse>() {
                    Ok(error) => Err(Error::unavailable(error.error)),
                    Err(e) => Err(Error::internal(format!("malformed rerank response: {}", e))),
                },
            },
            Err(e) => Err(e),
        };

        match via_bus {
            Ok(scores) if scores.len() == documents.len() => Ok(scores),
            Ok(scores) => Err(Error::internal(format!(
                "expected {} rerank scores, got {}",
                documents.len(),
                scores.len()
            ))),
            Err(bus_error) => match &self.ml {
                Some(ml) => {
                    warn!("bus rerank failed, using direct ML: {}", bus_error);
                    ml.rerank(query, documents).await
                }
                None => Err(bus_error),
            },
        }
    }
}

fn apply_scores(candidates: &mut [Candidate], scores: &[f32]) {
    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(*score);
        candidate.score = *score;
    }
    sort_candidates(candidates);
}

/// Truncate on a char boundary without splitting a code point.
fn snippet(content: &str, budget: usize) -> String {
    content.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rice_bus::InProcessBus;
    use rice_core::config::BusConfig;
    use rice_core::{Chunk, DenseVector, SparseVector};

    fn candidate(id: &str, content: &str, score: f32) -> Candidate {
        Candidate {
            chunk: Chunk {
                id: id.to_string(),
                document_id: String::new(),
                store: "default".into(),
                path: format!("{}.rs", id),
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

    /// Scripted ML backend: pops one score vector per rerank call.
    struct ScriptedMl {
        responses: Mutex<Vec<Vec<f32>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedMl {
        fn new(responses: Vec<Vec<f32>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl rice_core::MlBackend for ScriptedMl {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<DenseVector>> {
            Err(Error::unavailable("not scripted"))
        }
        async fn encode_sparse(&self, _texts: &[String]) -> Result<Vec<SparseVector>> {
            Err(Error::unavailable("not scripted"))
        }
        async fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
            *self.calls.lock() += 1;
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(Error::unavailable("script exhausted"));
            }
            let scores = responses.remove(0);
            assert_eq!(scores.len(), documents.len());
            Ok(scores)
        }
    }

    fn quiet_bus() -> Arc<dyn EventBus> {
        // No handlers registered: requests time out fast, forcing the
        // direct fallback path.
        Arc::new(InProcessBus::new(BusConfig {
            channel_capacity: 16,
            publish_timeout_secs: 1,
            request_timeout_secs: 1,
        }))
    }

    fn settings() -> RerankSettings {
        RerankSettings {
            confidence_margin: 0.3,
            enable_second_pass: true,
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_early_exit_on_clear_winner() {
        let ml = Arc::new(ScriptedMl::new(vec![vec![0.95, 0.40, 0.35]]));
        let reranker = Reranker::new(quiet_bus(), Some(ml.clone()));

        let mut candidates = vec![
            candidate("a", "aa", 0.1),
            candidate("b", "bb", 0.2),
            candidate("c", "cc", 0.3),
        ];
        let outcome = reranker
            .rerank("query", &mut candidates, 1, settings())
            .await;

        assert!(outcome.applied);
        assert_eq!(outcome.passes, 1);
        assert_eq!(*ml.calls.lock(), 1);
        assert_eq!(candidates[0].chunk.id, "a");
    }

    #[tokio::test]
    async fn test_second_pass_on_close_scores() {
        let ml = Arc::new(ScriptedMl::new(vec![
            vec![0.55, 0.54, 0.53],
            vec![0.60, 0.70], // pass 2 over top 2, flips the order
        ]));
        let reranker = Reranker::new(quiet_bus(), Some(ml.clone()));

        let mut candidates = vec![
            candidate("a", "aa", 0.1),
            candidate("b", "bb", 0.2),
            candidate("c", "cc", 0.3),
        ];
        let outcome = reranker
            .rerank("query", &mut candidates, 1, settings())
            .await;

        assert_eq!(outcome.passes, 2);
        assert_eq!(*ml.calls.lock(), 2);
        assert_eq!(candidates[0].chunk.id, "b");
    }

    #[tokio::test]
    async fn test_failure_keeps_fusion_order() {
        let ml = Arc::new(ScriptedMl::new(vec![]));
        let reranker = Reranker::new(quiet_bus(), Some(ml));

        let mut candidates = vec![candidate("a", "aa", 0.9), candidate("b", "bb", 0.8)];
        let outcome = reranker
            .rerank("query", &mut candidates, 1, settings())
            .await;

        assert!(!outcome.applied);
        assert_eq!(outcome.passes, 0);
        assert_eq!(candidates[0].chunk.id, "a");
        assert!(candidates[0].rerank_score.is_none());
    }

    #[tokio::test]
    async fn test_second_pass_disabled() {
        let ml = Arc::new(ScriptedMl::new(vec![vec![0.55, 0.54, 0.53]]));
        let reranker = Reranker::new(quiet_bus(), Some(ml.clone()));

        let mut candidates = vec![
            candidate("a", "aa", 0.1),
            candidate("b", "bb", 0.2),
            candidate("c", "cc", 0.3),
        ];
        let outcome = reranker
            .rerank(
                "query",
                &mut candidates,
                1,
                RerankSettings {
                    enable_second_pass: false,
                    ..settings()
                },
            )
            .await;

        assert_eq!(outcome.passes, 1);
        assert_eq!(*ml.calls.lock(), 1);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(snippet(text, 3), "hél");
        assert_eq!(snippet(text, 100), text);
    }
}
