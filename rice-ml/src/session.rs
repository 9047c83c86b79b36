//! ONNX Runtime session management with per-head device selection.

use ndarray::{Array, ArrayD, CowArray, IxDyn};
use parking_lot::RwLock;
use rice_core::config::ModelHeadConfig;
use rice_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Execution device for a model head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

/// A loaded ONNX session plus its tokenizer.
///
/// Each head owns its own session; the three models are distinct sessions,
/// so cross-head parallelism is safe while per-head batches serialize
/// through the session lock.
pub struct OnnxSession {
    session: RwLock<ort::Session>,
    tokenizer: Tokenizer,
    #[allow(dead_code)] // Keep the environment alive for the session
    environment: Arc<ort::Environment>,
    requested: Device,
    effective: Device,
    max_seq_length: usize,
}

impl OnnxSession {
    /// Load the model at `path`, requesting the configured device and
    /// falling back to CPU when the provider is unavailable.
    pub fn load(head: &str, config: &ModelHeadConfig, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::model_not_available(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let environment = ort::Environment::builder()
            .with_name(format!("rice_{}", head))
            .with_log_level(ort::LoggingLevel::Warning)
            .build()
            .map_err(|e| Error::model_not_available(format!("onnx environment: {}", e)))?
            .into_arc();

        let requested = if config.use_gpu { Device::Cuda } else { Device::Cpu };
        let mut effective = Device::Cpu;

        let mut builder = ort::SessionBuilder::new(&environment)
            .map_err(|e| Error::model_not_available(format!("session builder: {}", e)))?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)
            .map_err(|e| Error::model_not_available(format!("optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| Error::model_not_available(format!("thread config: {}", e)))?;

        if requested == Device::Cuda {
            let cuda = ort::ExecutionProvider::CUDA(Default::default());
            if cuda.is_available() {
                match builder.with_execution_providers([cuda]) {
                    Ok(with_cuda) => {
                        builder = with_cuda;
                        effective = Device::Cuda;
                    }
                    Err(e) => {
                        warn!(head, "CUDA provider registration failed, using CPU: {}", e);
                        builder = ort::SessionBuilder::new(&environment)
                            .map_err(|e| {
                                Error::model_not_available(format!("session builder: {}", e))
                            })?
                            .with_optimization_level(ort::GraphOptimizationLevel::Level3)
                            .map_err(|e| {
                                Error::model_not_available(format!("optimization level: {}", e))
                            })?
                            .with_intra_threads(4)
                            .map_err(|e| {
                                Error::model_not_available(format!("thread config: {}", e))
                            })?;
                    }
                }
            } else {
                warn!(head, "CUDA requested but not available, using CPU");
            }
        }

        let session = builder
            .with_model_from_file(path)
            .map_err(|e| Error::model_not_available(format!("model load: {}", e)))?;

        // tokenizer.json is expected next to the model file
        let tokenizer_path = path
            .parent()
            .map(|dir| dir.join("tokenizer.json"))
            .filter(|p| p.exists())
            .ok_or_else(|| {
                Error::model_not_available(format!(
                    "tokenizer.json not found next to {}",
                    path.display()
                ))
            })?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::model_not_available(format!("tokenizer load: {}", e)))?;

        info!(
            head,
            model = %path.display(),
            requested = requested.as_str(),
            effective = effective.as_str(),
            "onnx session ready"
        );

        Ok(Self {
            session: RwLock::new(session),
            tokenizer,
            environment,
            requested,
            effective,
            max_seq_length: config.max_seq_length,
        })
    }

    pub fn requested_device(&self) -> Device {
        self.requested
    }

    pub fn effective_device(&self) -> Device {
        self.effective
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Run the model over pre-tokenized encodings and return the first
    /// output tensor as an f32 array.
    ///
    /// Inputs are padded to the longest sequence in the batch, clamped to
    /// the head's maximum sequence length.
    pub fn run_encodings(&self, encodings: &[tokenizers::Encoding]) -> Result<ArrayD<f32>> {
        let batch_size = encodings.len();
        if batch_size == 0 {
            return Err(Error::validation("empty inference batch"));
        }

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_seq_length)
            .max(1);

        let mut input_ids = Vec::with_capacity(batch_size * max_len);
        let mut attention_mask = Vec::with_capacity(batch_size * max_len);
        for encoding in encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let seq_len = ids.len().min(max_len);
            for i in 0..seq_len {
                input_ids.push(ids[i] as i64);
                attention_mask.push(mask[i] as i64);
            }
            for _ in seq_len..max_len {
                input_ids.push(0);
                attention_mask.push(0);
            }
        }

        let input_ids = Array::from_shape_vec(IxDyn(&[batch_size, max_len]), input_ids)
            .map_err(|e| Error::internal(format!("input tensor shape: {}", e)))?;
        let attention_mask = Array::from_shape_vec(IxDyn(&[batch_size, max_len]), attention_mask)
            .map_err(|e| Error::internal(format!("mask tensor shape: {}", e)))?;

        let input_ids: CowArray<i64, IxDyn> = CowArray::from(input_ids);
        let attention_mask: CowArray<i64, IxDyn> = CowArray::from(attention_mask);

        let session = self.session.read();
        let allocator = session.allocator();

        let input_ids_value = ort::Value::from_array(allocator, &input_ids)
            .map_err(|e| Error::internal(format!("input tensor: {}", e)))?;
        let attention_mask_value = ort::Value::from_array(allocator, &attention_mask)
            .map_err(|e| Error::internal(format!("mask tensor: {}", e)))?;

        let outputs = session
            .run(vec![input_ids_value, attention_mask_value])
            .map_err(|e| Error::internal(format!("inference failed: {}", e)))?;

        let tensor = outputs[0]
            .try_extract::<f32>()
            .map_err(|e| Error::internal(format!("output extraction: {}", e)))?;
        let array = tensor.view().to_owned();
        debug!(batch_size, shape = ?array.shape(), "inference complete");
        Ok(array)
    }
}
