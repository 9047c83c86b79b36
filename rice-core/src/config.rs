//! Process configuration for the Rice server.
//!
//! Precedence (lowest to highest): built-in defaults, `RICE_*` environment
//! variables, an optional TOML config file, and finally the persisted admin
//! values held by the settings service at runtime.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiceConfig {
    pub server: ServerConfig,
    pub qdrant: QdrantConfig,
    pub ml: MlConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub bus: BusConfig,
}

impl RiceConfig {
    /// Load configuration: defaults, then environment, then the optional
    /// TOML file on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            config = toml::from_str(&raw)
                .map_err(|e| Error::validation(format!("invalid config file: {}", e)))?;
        }
        Ok(config)
    }
}

/// HTTP server binding and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Directory for settings, audit log and connection files
    pub data_dir: PathBuf,

    /// HTTP read/write timeout in seconds
    pub http_timeout_secs: u64,

    /// Grace period for draining in-flight requests on shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env_string("RICE_HOST", "127.0.0.1"),
            port: env_parse("RICE_PORT", 7700),
            data_dir: PathBuf::from(env_string("RICE_DATA_DIR", "./data")),
            http_timeout_secs: env_parse("RICE_HTTP_TIMEOUT_SECS", 30),
            shutdown_grace_secs: env_parse("RICE_SHUTDOWN_GRACE_SECS", 30),
        }
    }
}

/// Vector database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// gRPC URL of the Qdrant server
    pub url: String,

    /// Optional API key; masked in logs
    pub api_key: Option<String>,

    /// Prefix for collection names (`<prefix>_<store>`)
    pub collection_prefix: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// Retry attempts for transient errors
    pub max_retries: usize,

    /// Use the embedded in-memory backend instead of Qdrant
    pub in_memory: bool,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: env_string("RICE_QDRANT_URL", "http://localhost:6334"),
            api_key: env_opt("RICE_QDRANT_API_KEY"),
            collection_prefix: env_string("RICE_COLLECTION_PREFIX", "rice"),
            timeout_secs: env_parse("RICE_QDRANT_TIMEOUT_SECS", 10),
            max_retries: env_parse("RICE_QDRANT_MAX_RETRIES", 3),
            in_memory: env_parse("RICE_VECTOR_IN_MEMORY", false),
        }
    }
}

/// Configuration for one model head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelHeadConfig {
    /// Model display name
    pub model_name: String,

    /// ONNX model file; absent means the deterministic fallback head
    pub model_file: Option<PathBuf>,

    /// Request GPU execution for this head
    pub use_gpu: bool,

    /// Maximum input sequence length in tokens
    pub max_seq_length: usize,
}

impl Default for ModelHeadConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            model_file: None,
            use_gpu: false,
            max_seq_length: 8192,
        }
    }
}

/// ML service configuration: the three heads plus batching and caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub models_dir: PathBuf,
    pub embed: ModelHeadConfig,
    pub sparse: ModelHeadConfig,
    pub rerank: ModelHeadConfig,

    /// Dense vector dimension produced by the embed head
    pub dense_dimension: usize,

    /// Texts per embedding batch
    pub embed_batch_size: usize,

    /// Pairs per rerank batch
    pub rerank_batch_size: usize,

    /// Per-head cache capacity in entries
    pub cache_capacity: u64,

    /// Non-zero terms kept per sparse vector
    pub sparse_top_k: usize,

    /// Serve deterministic hash-based heads when a model file is absent
    /// instead of failing with model-not-available
    pub allow_fallback: bool,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(env_string("RICE_MODELS_DIR", "./models")),
            embed: ModelHeadConfig {
                model_name: env_string("RICE_EMBED_MODEL", "bge-m3"),
                model_file: env_opt("RICE_EMBED_MODEL_FILE").map(PathBuf::from),
                use_gpu: env_parse("RICE_EMBED_GPU", false),
                max_seq_length: env_parse("RICE_EMBED_MAX_SEQ", 8192),
            },
            sparse: ModelHeadConfig {
                model_name: env_string("RICE_SPARSE_MODEL", "splade-v3"),
                model_file: env_opt("RICE_SPARSE_MODEL_FILE").map(PathBuf::from),
                use_gpu: env_parse("RICE_SPARSE_GPU", false),
                max_seq_length: env_parse("RICE_SPARSE_MAX_SEQ", 512),
            },
            rerank: ModelHeadConfig {
                model_name: env_string("RICE_RERANK_MODEL", "bge-reranker-v2-m3"),
                model_file: env_opt("RICE_RERANK_MODEL_FILE").map(PathBuf::from),
                use_gpu: env_parse("RICE_RERANK_GPU", false),
                max_seq_length: env_parse("RICE_RERANK_MAX_SEQ", 1024),
            },
            dense_dimension: env_parse("RICE_DENSE_DIMENSION", 1024),
            embed_batch_size: env_parse("RICE_EMBED_BATCH_SIZE", 32),
            rerank_batch_size: env_parse("RICE_RERANK_BATCH_SIZE", 32),
            cache_capacity: env_parse("RICE_ML_CACHE_CAPACITY", 100_000),
            sparse_top_k: env_parse("RICE_SPARSE_TOP_K", 256),
            allow_fallback: env_parse("RICE_ML_ALLOW_FALLBACK", true),
        }
    }
}

/// Indexing pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Target chunk size in tokens
    pub chunk_size: usize,

    /// Chunk overlap in tokens
    pub chunk_overlap: usize,

    /// Chunks below this are merged or folded
    pub min_chunk_tokens: usize,

    /// Hard per-chunk ceiling
    pub max_chunk_tokens: usize,

    /// Maximum accepted file size in bytes
    pub max_file_size: usize,

    /// Concurrent files per index request
    pub workers: usize,

    /// Points per upsert call
    pub upsert_batch_size: usize,

    /// Per-file timeout in seconds
    pub file_timeout_secs: u64,

    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_size: env_parse("RICE_CHUNK_SIZE", 512),
            chunk_overlap: env_parse("RICE_CHUNK_OVERLAP", 64),
            min_chunk_tokens: env_parse("RICE_MIN_CHUNK_TOKENS", 32),
            max_chunk_tokens: env_parse("RICE_MAX_CHUNK_TOKENS", 2048),
            max_file_size: env_parse("RICE_MAX_FILE_SIZE", crate::types::MAX_FILE_SIZE),
            workers: env_parse("RICE_INDEX_WORKERS", 4),
            upsert_batch_size: env_parse("RICE_UPSERT_BATCH_SIZE", 500),
            file_timeout_secs: env_parse("RICE_INDEX_FILE_TIMEOUT_SECS", 30),
            request_timeout_secs: env_parse("RICE_INDEX_REQUEST_TIMEOUT_SECS", 1800),
        }
    }
}

/// Search pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,

    pub sparse_weight: f32,
    pub dense_weight: f32,

    /// RRF rank constant
    pub rrf_k: f32,

    pub enable_reranking: bool,
    pub rerank_top_k: usize,

    /// Score gap between rank 1 and rank `top_k` that skips pass 2
    pub rerank_confidence_margin: f32,

    /// Run the second, wider rerank pass when the margin is not met
    pub enable_second_pass: bool,

    pub enable_dedup: bool,
    pub dedup_threshold: f32,
    pub enable_diversity: bool,
    pub mmr_lambda: f32,

    /// Full-pipeline timeout in seconds
    pub timeout_secs: u64,

    /// Per ML round-trip timeout in seconds
    pub ml_timeout_secs: u64,

    /// Per retrieval call timeout in seconds
    pub retrieval_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: env_parse("RICE_DEFAULT_TOP_K", 20),
            max_top_k: env_parse("RICE_MAX_TOP_K", 100),
            sparse_weight: env_parse("RICE_SPARSE_WEIGHT", 0.5),
            dense_weight: env_parse("RICE_DENSE_WEIGHT", 0.5),
            rrf_k: env_parse("RICE_RRF_K", 60.0),
            enable_reranking: env_parse("RICE_ENABLE_RERANKING", true),
            rerank_top_k: env_parse("RICE_RERANK_TOP_K", 50),
            rerank_confidence_margin: env_parse("RICE_RERANK_CONFIDENCE_MARGIN", 0.3),
            enable_second_pass: env_parse("RICE_RERANK_SECOND_PASS", true),
            enable_dedup: env_parse("RICE_ENABLE_DEDUP", true),
            dedup_threshold: env_parse("RICE_DEDUP_THRESHOLD", 0.85),
            enable_diversity: env_parse("RICE_ENABLE_DIVERSITY", true),
            mmr_lambda: env_parse("RICE_MMR_LAMBDA", 0.7),
            timeout_secs: env_parse("RICE_SEARCH_TIMEOUT_SECS", 10),
            ml_timeout_secs: env_parse("RICE_ML_TIMEOUT_SECS", 30),
            retrieval_timeout_secs: env_parse("RICE_RETRIEVAL_TIMEOUT_SECS", 10),
        }
    }
}

/// In-process event bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Buffered events per (topic, subscriber)
    pub channel_capacity: usize,

    /// Publish block budget before failing with backpressure, seconds
    pub publish_timeout_secs: u64,

    /// Default request/reply timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: env_parse("RICE_BUS_CHANNEL_CAPACITY", 1000),
            publish_timeout_secs: env_parse("RICE_BUS_PUBLISH_TIMEOUT_SECS", 5),
            request_timeout_secs: env_parse("RICE_BUS_REQUEST_TIMEOUT_SECS", 30),
        }
    }
}

/// Mask credentials for logging: API keys entirely, URL userinfo if present.
pub fn mask_sensitive(value: &str) -> String {
    if let Some(scheme_end) = value.find("://") {
        if let Some(at) = value[scheme_end + 3..].find('@') {
            let mut masked = String::with_capacity(value.len());
            masked.push_str(&value[..scheme_end + 3]);
            masked.push_str("***");
            masked.push_str(&value[scheme_end + 3 + at..]);
            return masked;
        }
        return value.to_string();
    }
    if value.len() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", &value[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RiceConfig::default();
        assert_eq!(config.index.chunk_size, 512);
        assert_eq!(config.index.chunk_overlap, 64);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.search.max_top_k, 100);
        assert_eq!(config.bus.channel_capacity, 1000);
        assert_eq!(config.ml.cache_capacity, 100_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rice.toml");
        std::fs::write(
            &path,
            "[search]\ndefault_top_k = 7\n\n[index]\nworkers = 2\n",
        )
        .unwrap();

        let config = RiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.search.default_top_k, 7);
        assert_eq!(config.index.workers, 2);
        // untouched sections keep defaults
        assert_eq!(config.index.chunk_size, 512);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rice.toml");
        std::fs::write(&path, "not [valid").unwrap();
        assert!(RiceConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(
            mask_sensitive("http://user:pw@qdrant:6334"),
            "http://***@qdrant:6334"
        );
        assert_eq!(mask_sensitive("http://qdrant:6334"), "http://qdrant:6334");
        assert_eq!(mask_sensitive("sk-abcdef"), "sk-a***");
        assert_eq!(mask_sensitive("key"), "***");
    }
}
