//! Embedded in-memory vector store.
//!
//! Mirrors the Qdrant collection semantics (cosine scoring on the dense
//! field, dot product on the sparse field, unweighted RRF for the hybrid
//! query) so tests and model-less deployments exercise the same pipeline
//! behavior as a real server.

use crate::{FileInfo, PointFilter, QueryHit, VectorStore, VectorStoreHealth};
use async_trait::async_trait;
use dashmap::DashMap;
use rice_core::{Chunk, DenseVector, EmbeddedChunk, Error, Result, SparseVector, StoreStats};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const RRF_K: f32 = 60.0;

#[derive(Clone)]
struct StoredPoint {
    chunk: Chunk,
    dense: DenseVector,
    sparse: SparseVector,
}

struct Collection {
    dense_dimension: usize,
    points: DashMap<String, StoredPoint>,
}

/// In-process [`VectorStore`] implementation.
#[derive(Default)]
pub struct InMemoryStore {
    collections: DashMap<String, Arc<Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, store: &str) -> Result<Arc<Collection>> {
        self.collections
            .get(store)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("collection", store))
    }

    fn matches(chunk: &Chunk, filter: &PointFilter) -> bool {
        if let Some(path) = &filter.path {
            if &chunk.path != path {
                return false;
            }
        }
        if let Some(prefix) = &filter.path_prefix {
            if !chunk.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !filter.languages.is_empty() && !filter.languages.contains(&chunk.language) {
            return false;
        }
        if let Some(connection_id) = &filter.connection_id {
            if chunk.connection_id.as_deref() != Some(connection_id.as_str()) {
                return false;
            }
        }
        if let Some(hash) = &filter.document_hash {
            if &chunk.document_hash != hash {
                return false;
            }
        }
        true
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a <= 1e-12 || norm_b <= 1e-12 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    /// Rank all matching points with `score`, sorted descending with chunk
    /// id as the deterministic tie-break.
    fn ranked<F>(collection: &Collection, filter: &PointFilter, limit: usize, score: F) -> Vec<QueryHit>
    where
        F: Fn(&StoredPoint) -> f32,
    {
        let mut hits: Vec<QueryHit> = collection
            .points
            .iter()
            .filter(|entry| Self::matches(&entry.value().chunk, filter))
            .map(|entry| QueryHit {
                score: score(entry.value()),
                chunk: entry.value().chunk.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(&self, store: &str, dense_dimension: usize) -> Result<()> {
        self.collections
            .entry(store.to_string())
            .or_insert_with(|| {
                debug!(store, dense_dimension, "creating in-memory collection");
                Arc::new(Collection {
                    dense_dimension,
                    points: DashMap::new(),
                })
            });
        Ok(())
    }

    async fn drop_collection(&self, store: &str) -> Result<()> {
        self.collections.remove(store);
        Ok(())
    }

    async fn upsert_chunks(&self, store: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        let collection = self.collection(store)?;
        for embedded in chunks {
            if embedded.dense.len() != collection.dense_dimension {
                return Err(Error::validation(format!(
                    "dense dimension mismatch: expected {}, got {}",
                    collection.dense_dimension,
                    embedded.dense.len()
                )));
            }
            collection.points.insert(
                embedded.chunk.id.clone(),
                StoredPoint {
                    chunk: embedded.chunk.clone(),
                    dense: embedded.dense.clone(),
                    sparse: embedded.sparse.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_by_filter(&self, store: &str, filter: &PointFilter) -> Result<()> {
        let collection = self.collection(store)?;
        collection
            .points
            .retain(|_, point| !Self::matches(&point.chunk, filter));
        Ok(())
    }

    async fn query_dense(
        &self,
        store: &str,
        vector: &[f32],
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>> {
        let collection = self.collection(store)?;
        if vector.len() != collection.dense_dimension {
            return Err(Error::validation(format!(
                "dense dimension mismatch: expected {}, got {}",
                collection.dense_dimension,
                vector.len()
            )));
        }
        Ok(Self::ranked(&collection, filter, limit, |point| {
            Self::cosine(vector, &point.dense)
        }))
    }

    async fn query_sparse(
        &self,
        store: &str,
        vector: &SparseVector,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>> {
        let collection = self.collection(store)?;
        let mut hits = Self::ranked(&collection, filter, usize::MAX, |point| {
            vector.dot(&point.sparse)
        });
        // Points sharing no terms with the query are not matches at all.
        hits.retain(|hit| hit.score > 0.0);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn query_hybrid_rrf(
        &self,
        store: &str,
        sparse: &SparseVector,
        dense: &[f32],
        prefetch_limit: usize,
        final_limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>> {
        let sparse_hits = self.query_sparse(store, sparse, prefetch_limit, filter).await?;
        let dense_hits = self.query_dense(store, dense, prefetch_limit, filter).await?;

        let mut fused: HashMap<String, (f32, Chunk)> = HashMap::new();
        for (rank, hit) in sparse_hits.into_iter().enumerate() {
            let contribution = crate::rrf_contribution(1.0, RRF_K, rank + 1);
            fused
                .entry(hit.chunk.id.clone())
                .and_modify(|(score, _)| *score += contribution)
                .or_insert((contribution, hit.chunk));
        }
        for (rank, hit) in dense_hits.into_iter().enumerate() {
            let contribution = crate::rrf_contribution(1.0, RRF_K, rank + 1);
            fused
                .entry(hit.chunk.id.clone())
                .and_modify(|(score, _)| *score += contribution)
                .or_insert((contribution, hit.chunk));
        }

        let mut hits: Vec<QueryHit> = fused
            .into_values()
            .map(|(score, chunk)| QueryHit { chunk, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(final_limit);
        Ok(hits)
    }

    async fn count(&self, store: &str, filter: &PointFilter) -> Result<u64> {
        let collection = self.collection(store)?;
        Ok(collection
            .points
            .iter()
            .filter(|entry| Self::matches(&entry.value().chunk, filter))
            .count() as u64)
    }

    async fn list_files(&self, store: &str, filter: &PointFilter) -> Result<Vec<FileInfo>> {
        let collection = self.collection(store)?;
        let mut files: HashMap<String, FileInfo> = HashMap::new();
        for entry in collection.points.iter() {
            let chunk = &entry.value().chunk;
            if !Self::matches(chunk, filter) {
                continue;
            }
            files
                .entry(chunk.path.clone())
                .and_modify(|info| {
                    info.chunk_count += 1;
                    if chunk.indexed_at > info.indexed_at {
                        info.indexed_at = chunk.indexed_at;
                    }
                })
                .or_insert_with(|| FileInfo {
                    path: chunk.path.clone(),
                    language: chunk.language.clone(),
                    chunk_count: 1,
                    document_hash: chunk.document_hash.clone(),
                    indexed_at: chunk.indexed_at,
                });
        }
        let mut files: Vec<FileInfo> = files.into_values().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn stats(&self, store: &str) -> Result<StoreStats> {
        let collection = self.collection(store)?;
        let mut languages: HashMap<String, u64> = HashMap::new();
        let mut paths: std::collections::HashSet<String> = std::collections::HashSet::new();
        for entry in collection.points.iter() {
            let chunk = &entry.value().chunk;
            *languages.entry(chunk.language.clone()).or_insert(0) += 1;
            paths.insert(chunk.path.clone());
        }
        Ok(StoreStats {
            chunk_count: collection.points.len() as u64,
            file_count: paths.len() as u64,
            languages,
            status: "green".to_string(),
        })
    }

    async fn health(&self) -> Result<VectorStoreHealth> {
        Ok(VectorStoreHealth {
            ok: true,
            backend: "memory".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rice_core::id;

    fn chunk(store: &str, path: &str, line: u32, content: &str) -> Chunk {
        Chunk {
            id: id::chunk_id(store, path, line, line),
            document_id: id::document_id(path),
            store: store.to_string(),
            path: path.to_string(),
            language: "rust".to_string(),
            content: content.to_string(),
            symbols: vec![],
            start_line: line,
            end_line: line,
            start_offset: 0,
            end_offset: content.len(),
            token_count: content.split_whitespace().count(),
            document_hash: id::content_hash(content.as_bytes()),
            indexed_at: Utc::now(),
            connection_id: None,
        }
    }

    fn embedded(store: &str, path: &str, line: u32, dense: Vec<f32>, sparse: SparseVector) -> EmbeddedChunk {
        EmbeddedChunk::new(chunk(store, path, line, "content"), dense, sparse).unwrap()
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.ensure_collection("default", 3).await.unwrap();
        store
            .upsert_chunks(
                "default",
                &[
                    embedded(
                        "default",
                        "a.rs",
                        1,
                        vec![1.0, 0.0, 0.0],
                        SparseVector::new(vec![1, 2], vec![1.0, 0.5]).unwrap(),
                    ),
                    embedded(
                        "default",
                        "b.rs",
                        1,
                        vec![0.0, 1.0, 0.0],
                        SparseVector::new(vec![3], vec![1.0]).unwrap(),
                    ),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_dense_ranking() {
        let store = seeded_store().await;
        let hits = store
            .query_dense("default", &[1.0, 0.1, 0.0], 10, &PointFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.path, "a.rs");
    }

    #[tokio::test]
    async fn test_sparse_requires_term_overlap() {
        let store = seeded_store().await;
        let query = SparseVector::new(vec![3], vec![1.0]).unwrap();
        let hits = store
            .query_sparse("default", &query, 10, &PointFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.path, "b.rs");
    }

    #[tokio::test]
    async fn test_hybrid_rrf_includes_both_sides() {
        let store = seeded_store().await;
        let sparse = SparseVector::new(vec![1], vec![1.0]).unwrap();
        let hits = store
            .query_hybrid_rrf("default", &sparse, &[0.0, 1.0, 0.0], 10, 10, &PointFilter::default())
            .await
            .unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.chunk.path.as_str()).collect();
        assert!(paths.contains(&"a.rs"));
        assert!(paths.contains(&"b.rs"));
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces() {
        let store = seeded_store().await;
        assert_eq!(store.count("default", &PointFilter::default()).await.unwrap(), 2);

        store
            .upsert_chunks(
                "default",
                &[embedded(
                    "default",
                    "a.rs",
                    1,
                    vec![0.5, 0.5, 0.0],
                    SparseVector::new(vec![9], vec![2.0]).unwrap(),
                )],
            )
            .await
            .unwrap();
        assert_eq!(store.count("default", &PointFilter::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_path_filter() {
        let store = seeded_store().await;
        store
            .delete_by_filter("default", &PointFilter::for_path("a.rs"))
            .await
            .unwrap();
        assert_eq!(
            store
                .count("default", &PointFilter::for_path("a.rs"))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.count("default", &PointFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = seeded_store().await;
        let result = store
            .query_dense("default", &[1.0, 0.0], 10, &PointFilter::default())
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let store = InMemoryStore::new();
        let result = store.count("missing", &PointFilter::default()).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stats_and_file_listing() {
        let store = seeded_store().await;
        let stats = store.stats("default").await.unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.languages.get("rust"), Some(&2));

        let files = store
            .list_files("default", &PointFilter::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.rs");
        assert_eq!(files[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn test_path_prefix_filter() {
        let store = InMemoryStore::new();
        store.ensure_collection("default", 3).await.unwrap();
        store
            .upsert_chunks(
                "default",
                &[
                    embedded(
                        "default",
                        "src/lib.rs",
                        1,
                        vec![1.0, 0.0, 0.0],
                        SparseVector::new(vec![1], vec![1.0]).unwrap(),
                    ),
                    embedded(
                        "default",
                        "tests/it.rs",
                        1,
                        vec![1.0, 0.0, 0.0],
                        SparseVector::new(vec![1], vec![1.0]).unwrap(),
                    ),
                ],
            )
            .await
            .unwrap();

        let filter = PointFilter {
            path_prefix: Some("src/".to_string()),
            ..PointFilter::default()
        };
        let hits = store
            .query_dense("default", &[1.0, 0.0, 0.0], 10, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.path, "src/lib.rs");
    }
}
