//! SPLADE-style sparse encoding head.

use crate::fallback_tokens;
use crate::session::{Device, OnnxSession};
use ndarray::Axis;
use rice_core::config::ModelHeadConfig;
use rice_core::{Error, Result, SparseVector};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Vocabulary space for the fallback token hasher.
const FALLBACK_VOCAB_SIZE: u32 = 1 << 20;

/// Sparse encoder: texts in, top-k pruned sparse vectors out.
///
/// With a model loaded, term weights are the SPLADE activation
/// `max_t log(1 + relu(logit_t))` over the sequence. Without one, tokens
/// are hashed into a fixed vocabulary with `1 + ln(tf)` weights, which
/// preserves exact-term matching behavior.
pub struct SparseHead {
    model_name: String,
    top_k: usize,
    session: Option<OnnxSession>,
    requested: Device,
}

impl SparseHead {
    pub fn load(config: &ModelHeadConfig, top_k: usize) -> Self {
        let requested = if config.use_gpu { Device::Cuda } else { Device::Cpu };
        let session = match &config.model_file {
            Some(path) => match OnnxSession::load("sparse", config, path) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("sparse model unavailable, using fallback encoder: {}", e);
                    None
                }
            },
            None => {
                debug!("no sparse model configured, using fallback encoder");
                None
            }
        };
        Self {
            model_name: config.model_name.clone(),
            top_k,
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

    /// Encode a batch, splitting into `batch_size` slices with the same
    /// halving retry as the dense head.
    pub fn encode_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<SparseVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for slice in texts.chunks(batch_size.max(1)) {
            vectors.extend(self.encode_slice(slice)?);
        }
        Ok(vectors)
    }

    fn encode_slice(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        match self.infer(texts) {
            Ok(vectors) => Ok(vectors),
            Err(e) if texts.len() > 1 => {
                warn!(
                    batch = texts.len(),
                    "sparse batch failed, retrying halved: {}", e
                );
                let mid = texts.len() / 2;
                let mut vectors = self.encode_slice(&texts[..mid])?;
                vectors.extend(self.encode_slice(&texts[mid..])?);
                Ok(vectors)
            }
            Err(e) => Err(e),
        }
    }

    fn infer(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        let Some(session) = &self.session else {
            return texts.iter().map(|t| self.fallback_encode(t)).collect();
        };

        let encodings = session
            .tokenizer()
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::internal(format!("tokenization failed: {}", e)))?;

        // Output shape [batch, seq, vocab]: MLM logits per position.
        let output = session.run_encodings(&encodings)?;
        if output.ndim() != 3 {
            return Err(Error::internal(format!(
                "unexpected sparse output shape: {:?}",
                output.shape()
            )));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (i, encoding) in encodings.iter().enumerate() {
            let logits = output.index_axis(Axis(0), i);
            let seq_len = encoding
                .get_attention_mask()
                .iter()
                .filter(|&&m| m == 1)
                .count()
                .min(logits.shape()[0]);
            let vocab = logits.shape()[1];

            // max-pool log(1 + relu(logit)) over attended positions
            let mut pooled = vec![0.0f32; vocab];
            for t in 0..seq_len {
                for (v, weight) in pooled.iter_mut().enumerate() {
                    let logit = logits[[t, v]];
                    if logit > 0.0 {
                        let activation = (1.0 + logit).ln();
                        if activation > *weight {
                            *weight = activation;
                        }
                    }
                }
            }
            vectors.push(self.prune(pooled)?);
        }
        Ok(vectors)
    }

    /// Keep the `top_k` strongest terms, re-sorted by index.
    fn prune(&self, weights: Vec<f32>) -> Result<SparseVector> {
        let mut terms: Vec<(u32, f32)> = weights
            .into_iter()
            .enumerate()
            .filter(|(_, w)| *w > 0.0)
            .map(|(i, w)| (i as u32, w))
            .collect();
        if terms.len() > self.top_k {
            terms.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            terms.truncate(self.top_k);
        }
        terms.sort_by_key(|(index, _)| *index);

        let (indices, values): (Vec<u32>, Vec<f32>) = terms.into_iter().unzip();
        if indices.is_empty() {
            return Ok(SparseVector::empty());
        }
        SparseVector::new(indices, values)
    }

    /// Hash tokens into a fixed vocabulary with `1 + ln(tf)` weighting.
    fn fallback_encode(&self, text: &str) -> Result<SparseVector> {
        let mut frequencies: BTreeMap<u32, f32> = BTreeMap::new();
        for token in fallback_tokens(text) {
            let index = Self::hash_token(&token);
            *frequencies.entry(index).or_insert(0.0) += 1.0;
        }
        if frequencies.is_empty() {
            return Ok(SparseVector::empty());
        }

        let mut terms: Vec<(u32, f32)> = frequencies
            .into_iter()
            .map(|(index, tf)| (index, 1.0 + tf.ln()))
            .collect();
        if terms.len() > self.top_k {
            terms.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            terms.truncate(self.top_k);
            terms.sort_by_key(|(index, _)| *index);
        }

        let (indices, values): (Vec<u32>, Vec<f32>) = terms.into_iter().unzip();
        SparseVector::new(indices, values)
    }

    fn hash_token(token: &str) -> u32 {
        let digest = Sha256::digest(token.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % FALLBACK_VOCAB_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_head() -> SparseHead {
        SparseHead::load(
            &ModelHeadConfig {
                model_name: "test-sparse".into(),
                model_file: None,
                use_gpu: false,
                max_seq_length: 512,
            },
            256,
        )
    }

    #[test]
    fn test_fallback_matches_shared_tokens() {
        let head = fallback_head();
        let vectors = head
            .encode_batch(
                &[
                    "func Hello() string".into(),
                    "hello".into(),
                    "completely unrelated".into(),
                ],
                32,
            )
            .unwrap();

        // "hello" appears in both the code text (camel split) and the query
        assert!(vectors[0].dot(&vectors[1]) > 0.0);
        assert_eq!(vectors[1].dot(&vectors[2]), 0.0);
    }

    #[test]
    fn test_indices_strictly_increasing() {
        let head = fallback_head();
        let vector = head
            .encode_batch(&["parse the config file and reload".into()], 32)
            .unwrap()
            .remove(0);
        assert!(vector.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(vector.values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_empty_text_gives_empty_vector() {
        let head = fallback_head();
        let vector = head.encode_batch(&["   ".into()], 32).unwrap().remove(0);
        assert!(vector.is_empty());
    }

    #[test]
    fn test_repeated_terms_weigh_more() {
        let head = fallback_head();
        let vectors = head
            .encode_batch(&["retry retry retry".into(), "retry once".into()], 32)
            .unwrap();
        let single_weight = vectors[1]
            .values
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        let repeated_weight = vectors[0]
            .values
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        assert!(repeated_weight > single_weight);
    }

    #[test]
    fn test_top_k_pruning() {
        let head = SparseHead::load(
            &ModelHeadConfig {
                model_name: "test".into(),
                model_file: None,
                use_gpu: false,
                max_seq_length: 512,
            },
            2,
        );
        let vector = head
            .encode_batch(&["alpha beta gamma delta".into()], 32)
            .unwrap()
            .remove(0);
        assert!(vector.nnz() <= 2);
    }
}
