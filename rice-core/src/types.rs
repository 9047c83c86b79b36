//! Domain types shared across the Rice workspace.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the store that always exists and cannot be deleted.
pub const DEFAULT_STORE: &str = "default";

/// Maximum length of a store name.
pub const MAX_STORE_NAME_LEN: usize = 64;

/// Maximum accepted document size in bytes (10 MB).
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum number of symbols recorded per chunk.
pub const MAX_SYMBOLS_PER_CHUNK: usize = 100;

/// Validate a store name: lowercase alphanumerics plus hyphen, starting
/// with a letter, at most [`MAX_STORE_NAME_LEN`] characters.
pub fn validate_store_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_STORE_NAME_LEN {
        return Err(Error::validation(format!(
            "store name must be 1..={} characters",
            MAX_STORE_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('-');
    if !first.is_ascii_lowercase() {
        return Err(Error::validation(
            "store name must start with a lowercase letter",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::validation(
            "store name may contain only lowercase letters, digits and hyphens",
        ));
    }
    Ok(())
}

/// Configuration snapshot taken when a store is created.
///
/// Dimension-affecting fields are immutable after creation; changing the
/// embedding model requires recreating the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Dense embedding model name
    pub embed_model: String,

    /// Sparse encoder model name
    pub sparse_model: String,

    /// Dense vector dimension
    pub dense_dimension: usize,

    /// Target chunk size in tokens
    pub chunk_size: usize,

    /// Chunk overlap in tokens
    pub chunk_overlap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            embed_model: "bge-m3".to_string(),
            sparse_model: "splade-v3".to_string(),
            dense_dimension: 1024,
            chunk_size: 512,
            chunk_overlap: 64,
        }
    }
}

/// A named corpus backed by one vector-DB collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub name: String,
    pub config: StoreConfig,
    pub created_at: DateTime<Utc>,
}

/// Live statistics for a store, fetched from the vector store on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total chunks (points) in the collection
    pub chunk_count: u64,

    /// Distinct files currently indexed
    pub file_count: u64,

    /// Chunk counts per language
    pub languages: HashMap<String, u64>,

    /// Collection status as reported by the backend
    pub status: String,
}

/// A source file handed to the indexing pipeline.
///
/// Documents are transient: the pipeline chunks them and drops the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub store: String,
    pub path: String,
    pub content: String,
    pub language: String,
    /// Full SHA-256 of the content
    pub hash: String,
    /// Owning connection when the transport conveyed one
    pub connection_id: Option<String>,
}

/// A searchable unit: a contiguous region of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: truncated SHA-256 of `store|path|start_line|end_line`
    pub id: String,
    /// Truncated SHA-256 of the path
    pub document_id: String,
    pub store: String,
    pub path: String,
    pub language: String,
    pub content: String,
    /// Deduplicated symbol names present in the chunk
    pub symbols: Vec<String>,
    /// 1-indexed inclusive line range
    pub start_line: u32,
    pub end_line: u32,
    /// Character offsets into the original document
    pub start_offset: usize,
    pub end_offset: usize,
    /// Estimated token count
    pub token_count: usize,
    /// Full SHA-256 of the parent document content
    pub document_hash: String,
    pub indexed_at: DateTime<Utc>,
    pub connection_id: Option<String>,
}

impl Chunk {
    /// Number of lines covered by this chunk.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// Dense embedding vector (fixed model dimension, L2-normalized).
pub type DenseVector = Vec<f32>;

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Sparse vector: parallel arrays of strictly increasing vocabulary
/// indices and positive weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Construct a validated sparse vector.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(Error::validation(format!(
                "sparse vector length mismatch: {} indices, {} values",
                indices.len(),
                values.len()
            )));
        }
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::validation(
                "sparse vector indices must be strictly increasing",
            ));
        }
        if values.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
            return Err(Error::validation(
                "sparse vector weights must be positive and finite",
            ));
        }
        Ok(Self { indices, values })
    }

    /// An empty sparse vector (no non-zero terms).
    pub fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Number of non-zero terms.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product with another sparse vector (merge join over indices).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut score = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    score += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        score
    }
}

/// A chunk paired with both of its embeddings, ready for upsert.
///
/// Construction enforces the invariant that every stored chunk carries a
/// dense and a sparse vector; partial vectors never reach the adapter.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub dense: DenseVector,
    pub sparse: SparseVector,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, dense: DenseVector, sparse: SparseVector) -> Result<Self> {
        if dense.is_empty() {
            return Err(Error::validation(format!(
                "chunk {} is missing its dense vector",
                chunk.id
            )));
        }
        if sparse.is_empty() {
            return Err(Error::validation(format!(
                "chunk {} is missing its sparse vector",
                chunk.id
            )));
        }
        Ok(Self {
            chunk,
            dense,
            sparse,
        })
    }
}

/// Client PC info used to derive a stable connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcInfo {
    pub mac: String,
    pub hostname: String,
    pub user: String,
}

/// A stable client identity used for multi-tenant scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub display_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub files_indexed: u64,
    pub searches: u64,
    pub enabled: bool,
}

impl Connection {
    /// Register a connection first seen now.
    pub fn new(id: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name,
            first_seen: now,
            last_seen: now,
            files_indexed: 0,
            searches: 0,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_name_validation() {
        assert!(validate_store_name("default").is_ok());
        assert!(validate_store_name("my-repo-2").is_ok());
        assert!(validate_store_name("").is_err());
        assert!(validate_store_name("2fast").is_err());
        assert!(validate_store_name("Upper").is_err());
        assert!(validate_store_name("has_underscore").is_err());
        assert!(validate_store_name(&"a".repeat(65)).is_err());
        assert!(validate_store_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_sparse_vector_validation() {
        assert!(SparseVector::new(vec![1, 5, 9], vec![0.5, 0.2, 1.0]).is_ok());
        // mismatched lengths
        assert!(SparseVector::new(vec![1, 5], vec![0.5]).is_err());
        // non-increasing indices
        assert!(SparseVector::new(vec![5, 5], vec![0.5, 0.2]).is_err());
        assert!(SparseVector::new(vec![5, 1], vec![0.5, 0.2]).is_err());
        // non-positive weight
        assert!(SparseVector::new(vec![1, 2], vec![0.5, 0.0]).is_err());
    }

    #[test]
    fn test_sparse_dot_product() {
        let a = SparseVector::new(vec![1, 3, 7], vec![1.0, 2.0, 3.0]).unwrap();
        let b = SparseVector::new(vec![3, 7, 9], vec![0.5, 1.0, 4.0]).unwrap();
        // overlap at 3 and 7: 2.0*0.5 + 3.0*1.0
        assert!((a.dot(&b) - 4.0).abs() < f32::EPSILON);
        assert_eq!(a.dot(&SparseVector::empty()), 0.0);
    }

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_l2(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_embedded_chunk_requires_both_vectors() {
        let chunk = Chunk {
            id: "abc".into(),
            document_id: "doc".into(),
            store: "default".into(),
            path: "a.rs".into(),
            language: "rust".into(),
            content: "fn main() {}".into(),
            symbols: vec!["main".into()],
            start_line: 1,
            end_line: 1,
            start_offset: 0,
            end_offset: 12,
            token_count: 3,
            document_hash: "h".into(),
            indexed_at: Utc::now(),
            connection_id: None,
        };
        let sparse = SparseVector::new(vec![1], vec![1.0]).unwrap();

        assert!(EmbeddedChunk::new(chunk.clone(), vec![0.1, 0.2], sparse.clone()).is_ok());
        assert!(EmbeddedChunk::new(chunk.clone(), vec![], sparse).is_err());
        assert!(EmbeddedChunk::new(chunk, vec![0.1], SparseVector::empty()).is_err());
    }

    #[test]
    fn test_chunk_line_count() {
        let chunk = Chunk {
            id: String::new(),
            document_id: String::new(),
            store: String::new(),
            path: String::new(),
            language: String::new(),
            content: String::new(),
            symbols: vec![],
            start_line: 3,
            end_line: 7,
            start_offset: 0,
            end_offset: 0,
            token_count: 0,
            document_hash: String::new(),
            indexed_at: Utc::now(),
            connection_id: None,
        };
        assert_eq!(chunk.line_count(), 5);
    }
}
