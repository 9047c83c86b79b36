//! Dense embedding head.

use crate::session::{Device, OnnxSession};
use ndarray::Axis;
use rice_core::config::ModelHeadConfig;
use rice_core::{normalize_l2, DenseVector, Error, Result};
use tracing::{debug, warn};

/// Dense embedder: texts in, L2-normalized fixed-dimension vectors out.
pub struct EmbedHead {
    model_name: String,
    dimension: usize,
    session: Option<OnnxSession>,
    requested: Device,
}

impl EmbedHead {
    /// Load the head. A missing or unloadable model falls back to the
    /// deterministic hash embedder rather than failing startup.
    pub fn load(config: &ModelHeadConfig, dimension: usize) -> Self {
        let requested = if config.use_gpu { Device::Cuda } else { Device::Cpu };
        let session = match &config.model_file {
            Some(path) => match OnnxSession::load("embed", config, path) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("embed model unavailable, using fallback embeddings: {}", e);
                    None
                }
            },
            None => {
                debug!("no embed model configured, using fallback embeddings");
                None
            }
        };
        Self {
            model_name: config.model_name.clone(),
            dimension,
            session,
            requested,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
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

    /// Embed a batch, splitting into `batch_size` slices. A failed slice is
    /// retried at half size down to single texts before giving up.
    pub fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<DenseVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for slice in texts.chunks(batch_size.max(1)) {
            vectors.extend(self.embed_slice(slice)?);
        }
        Ok(vectors)
    }

    fn embed_slice(&self, texts: &[String]) -> Result<Vec<DenseVector>> {
        match self.infer(texts) {
            Ok(vectors) => Ok(vectors),
            Err(e) if texts.len() > 1 => {
                // Likely an out-of-memory batch; halve and retry.
                warn!(
                    batch = texts.len(),
                    "embed batch failed, retrying halved: {}", e
                );
                let mid = texts.len() / 2;
                let mut vectors = self.embed_slice(&texts[..mid])?;
                vectors.extend(self.embed_slice(&texts[mid..])?);
                Ok(vectors)
            }
            Err(e) => Err(e),
        }
    }

    fn infer(&self, texts: &[String]) -> Result<Vec<DenseVector>> {
        let Some(session) = &self.session else {
            return Ok(texts.iter().map(|t| self.fallback_embedding(t)).collect());
        };

        let encodings = session
            .tokenizer()
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::internal(format!("tokenization failed: {}", e)))?;

        let output = session.run_encodings(&encodings)?;
        let shape = output.shape().to_vec();

        let mut vectors = Vec::with_capacity(texts.len());
        match shape.len() {
            // [batch, seq, hidden]: mean-pool over the sequence
            3 => {
                for i in 0..texts.len() {
                    let item = output.index_axis(Axis(0), i);
                    let pooled = item
                        .mean_axis(Axis(0))
                        .ok_or_else(|| Error::internal("pooling produced no output"))?;
                    let mut vector: Vec<f32> = pooled.iter().copied().collect();
                    normalize_l2(&mut vector);
                    vectors.push(vector);
                }
            }
            // [batch, hidden]: already pooled
            2 => {
                for i in 0..texts.len() {
                    let mut vector: Vec<f32> =
                        output.index_axis(Axis(0), i).iter().copied().collect();
                    normalize_l2(&mut vector);
                    vectors.push(vector);
                }
            }
            _ => {
                return Err(Error::internal(format!(
                    "unexpected embedding output shape: {:?}",
                    shape
                )))
            }
        }

        if let Some(vector) = vectors.first() {
            if vector.len() != self.dimension {
                return Err(Error::internal(format!(
                    "model produced dimension {}, expected {}",
                    vector.len(),
                    self.dimension
                )));
            }
        }
        Ok(vectors)
    }

    /// Deterministic hash embedding: reproducible, normalized, and unique
    /// per text, but without semantic structure.
    fn fallback_embedding(&self, text: &str) -> DenseVector {
        let hash = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        let mut vector = vec![0.0f32; self.dimension];
        for (i, value) in vector.iter_mut().enumerate() {
            let seed = hash.wrapping_add(i as u64).wrapping_mul(6364136223846793005);
            *value = ((seed >> 33) % 2000) as f32 / 1000.0 - 1.0;
        }
        normalize_l2(&mut vector);
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_head(dimension: usize) -> EmbedHead {
        EmbedHead::load(
            &ModelHeadConfig {
                model_name: "test-embed".into(),
                model_file: None,
                use_gpu: false,
                max_seq_length: 512,
            },
            dimension,
        )
    }

    #[test]
    fn test_fallback_is_deterministic_and_normalized() {
        let head = fallback_head(64);
        assert!(head.is_fallback());

        let a = head.embed_batch(&["hello world".into()], 32).unwrap();
        let b = head.embed_batch(&["hello world".into()], 32).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_different_texts_differ() {
        let head = fallback_head(64);
        let vectors = head
            .embed_batch(&["first".into(), "second".into()], 32)
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn test_batch_splitting_preserves_order() {
        let head = fallback_head(16);
        let texts: Vec<String> = (0..10).map(|i| format!("text {}", i)).collect();
        let batched = head.embed_batch(&texts, 3).unwrap();
        let single = head.embed_batch(&texts, 100).unwrap();
        assert_eq!(batched, single);
    }

    #[test]
    fn test_empty_batch() {
        let head = fallback_head(16);
        assert!(head.embed_batch(&[], 32).unwrap().is_empty());
    }

    #[test]
    fn test_missing_model_file_falls_back() {
        let head = EmbedHead::load(
            &ModelHeadConfig {
                model_name: "test".into(),
                model_file: Some("/nonexistent/model.onnx".into()),
                use_gpu: false,
                max_seq_length: 512,
            },
            32,
        );
        assert!(head.is_fallback());
        assert_eq!(head.effective_device(), Device::Cpu);
    }
}
