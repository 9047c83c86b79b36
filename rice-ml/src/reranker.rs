//! Cross-encoder reranking head.

use crate::fallback_tokens;
use crate::session::{Device, OnnxSession};
use ndarray::Axis;
use rice_core::config::ModelHeadConfig;
use rice_core::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Cross-encoder reranker: `(query, document)` pairs in, scalar relevance
/// scores out.
///
/// With a model loaded, each pair is encoded jointly and the output logit
/// passed through a sigmoid. The fallback scores token overlap between
/// query and document, which keeps ordering deterministic for tests.
pub struct RerankHead {
    model_name: String,
    session: Option<OnnxSession>,
    requested: Device,
}

impl RerankHead {
    pub fn load(config: &ModelHeadConfig) -> Self {
        let requested = if config.use_gpu { Device::Cuda } else { Device::Cpu };
        let session = match &config.model_file {
            Some(path) => match OnnxSession::load("rerank", config, path) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("rerank model unavailable, using fallback scorer: {}", e);
                    None
                }
            },
            None => {
                debug!("no rerank model configured, using fallback scorer");
                None
            }
        };
        Self {
            model_name: config.model_name.clone(),
            session,
            requested,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_fallback(&self) -> bool {
        self.session.is_none()
    }

    pub fn requested_device(&self) -> Device {
        self.requested
    }

    pub fn effective_device(&self) -> Device {
        self.session
            .as_ref()
            .map(|s| s.effective_device())
            .unwrap_or(Device::Cpu)
    }

    /// Score every document against the query, batched at `batch_size`
    /// pairs with halving retry.
    pub fn score_pairs(
        &self,
        query: &str,
        documents: &[String],
        batch_size: usize,
    ) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut scores = Vec::with_capacity(documents.len());
        for slice in documents.chunks(batch_size.max(1)) {
            scores.extend(self.score_slice(query, slice)?);
        }
        Ok(scores)
    }

    fn score_slice(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        match self.infer(query, documents) {
            Ok(scores) => Ok(scores),
            Err(e) if documents.len() > 1 => {
                warn!(
                    batch = documents.len(),
                    "rerank batch failed, retrying halved: {}", e
                );
                let mid = documents.len() / 2;
                let mut scores = self.score_slice(query, &documents[..mid])?;
                scores.extend(self.score_slice(query, &documents[mid..])?);
                Ok(scores)
            }
            Err(e) => Err(e),
        }
    }

    fn infer(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let Some(session) = &self.session else {
            return Ok(documents
                .iter()
                .map(|doc| Self::fallback_score(query, doc))
                .collect());
        };

        let pairs: Vec<(String, String)> = documents
            .iter()
            .map(|doc| (query.to_string(), doc.clone()))
            .collect();
        let encodings = session
            .tokenizer()
            .encode_batch(pairs, true)
            .map_err(|e| Error::internal(format!("pair tokenization failed: {}", e)))?;

        // Output shape [batch, 1] (or [batch]): one logit per pair.
        let output = session.run_encodings(&encodings)?;
        let scores: Vec<f32> = match output.ndim() {
            2 => (0..documents.len())
                .map(|i| sigmoid(output.index_axis(Axis(0), i)[0]))
                .collect(),
            1 => output.iter().map(|logit| sigmoid(*logit)).collect(),
            _ => {
                return Err(Error::internal(format!(
                    "unexpected reranker output shape: {:?}",
                    output.shape()
                )))
            }
        };

        if scores.len() != documents.len() {
            return Err(Error::internal(format!(
                "expected {} scores, got {}",
                documents.len(),
                scores.len()
            )));
        }
        Ok(scores)
    }

    /// Token-overlap score in [0, 1]: |query ∩ doc| / |query|.
    fn fallback_score(query: &str, document: &str) -> f32 {
        let query_tokens: HashSet<String> = fallback_tokens(query).into_iter().collect();
        if query_tokens.is_empty() {
            return 0.0;
        }
        let doc_tokens: HashSet<String> = fallback_tokens(document).into_iter().collect();
        let overlap = query_tokens.intersection(&doc_tokens).count();
        overlap as f32 / query_tokens.len() as f32
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_head() -> RerankHead {
        RerankHead::load(&ModelHeadConfig {
            model_name: "test-rerank".into(),
            model_file: None,
            use_gpu: false,
            max_seq_length: 1024,
        })
    }

    #[test]
    fn test_fallback_prefers_overlapping_documents() {
        let head = fallback_head();
        let scores = head
            .score_pairs(
                "parse config file",
                &[
                    "fn parse_config(path: &Path) -> Config".into(),
                    "unrelated networking code".into(),
                ],
                32,
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let head = fallback_head();
        let scores = head
            .score_pairs(
                "query terms",
                &["query terms exactly".into(), "none of those words".into()],
                32,
            )
            .unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_empty_documents() {
        let head = fallback_head();
        assert!(head.score_pairs("q", &[], 32).unwrap().is_empty());
    }

    #[test]
    fn test_sigmoid_bounds() {
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }
}
