//! Qdrant vector store implementation.
//!
//! Each store maps to one collection named `<prefix>_<store>` with two
//! vector fields: a named dense vector (cosine) and a named sparse vector
//! (dot product). Payload fields are indexed for filtering; hybrid queries
//! run both prefetches server-side and fuse with Qdrant's native RRF.

use crate::{
    FileInfo, PointFilter, QueryHit, VectorStore, VectorStoreHealth, DENSE_VECTOR_NAME,
    SPARSE_VECTOR_NAME,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    value::Kind, Condition, CountPointsBuilder, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance, FieldType, Filter, Fusion,
    NamedVectors, PointStruct, PrefetchQueryBuilder, Query, QueryPointsBuilder, ScoredPoint,
    ScrollPointsBuilder, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
    UpsertPointsBuilder, Value as QdrantValue, Vector as QdrantVector, VectorInput,
    VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant};
use rice_core::config::QdrantConfig;
use rice_core::{id, Chunk, EmbeddedChunk, Error, Result, SparseVector, StoreStats};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const SCROLL_PAGE_SIZE: u32 = 256;

/// Counters for adapter monitoring.
#[derive(Debug, Default)]
pub struct QdrantMetrics {
    pub upserts: AtomicU64,
    pub deletes: AtomicU64,
    pub queries: AtomicU64,
    pub retries: AtomicU64,
    pub failures: AtomicU64,
}

/// Qdrant-backed [`VectorStore`].
pub struct QdrantStore {
    client: Qdrant,
    config: QdrantConfig,
    upsert_batch_size: usize,
    metrics: QdrantMetrics,
}

impl QdrantStore {
    /// Connect to Qdrant. Construction is lazy; an initial health probe is
    /// logged but does not fail startup, the readiness endpoint reports
    /// live reachability.
    pub async fn new(config: QdrantConfig, upsert_batch_size: usize) -> Result<Self> {
        info!(
            url = %rice_core::config::mask_sensitive(&config.url),
            prefix = %config.collection_prefix,
            "initializing qdrant vector store"
        );

        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::unavailable(format!("failed to create qdrant client: {}", e)))?;

        let store = Self {
            client,
            config,
            upsert_batch_size,
            metrics: QdrantMetrics::default(),
        };

        match store.client.health_check().await {
            Ok(reply) => info!(version = %reply.version, "connected to qdrant"),
            Err(e) => warn!("qdrant not reachable at startup: {}", e),
        }

        Ok(store)
    }

    pub fn metrics(&self) -> &QdrantMetrics {
        &self.metrics
    }

    fn collection_name(&self, store: &str) -> String {
        format!("{}_{}", self.config.collection_prefix, store)
    }

    /// Run an operation with bounded exponential backoff (100 ms doubling,
    /// capped at 800 ms). Validation failures are checked before calls so
    /// everything that reaches the wire is worth retrying.
    async fn with_retry<T, F, Fut>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = Duration::from_millis((100u64 << (attempt - 1)).min(800));
                    warn!(
                        "qdrant {} failed (attempt {}/{}): {}",
                        what, attempt, self.config.max_retries, e
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::unavailable(format!("qdrant {} failed: {}", what, e)));
                }
            }
        }
    }

    /// Server-side filter for everything except `path_prefix`, which has
    /// no exact keyword-condition equivalent; prefix semantics are applied
    /// client-side on query results and resolved to exact paths for
    /// deletes (see `resolve_prefix_paths`).
    fn build_filter(filter: &PointFilter) -> Option<Filter> {
        let mut must: Vec<Condition> = Vec::new();
        if let Some(path) = &filter.path {
            must.push(Condition::matches("path", path.clone()));
        }
        match filter.languages.len() {
            0 => {}
            1 => must.push(Condition::matches("language", filter.languages[0].clone())),
            _ => must.push(Condition::matches("language", filter.languages.clone())),
        }
        if let Some(connection_id) = &filter.connection_id {
            must.push(Condition::matches("connection_id", connection_id.clone()));
        }
        if let Some(hash) = &filter.document_hash {
            must.push(Condition::matches("document_hash", hash.clone()));
        }
        if must.is_empty() {
            None
        } else {
            Some(Filter::must(must))
        }
    }

    fn point_from(embedded: &EmbeddedChunk) -> Result<PointStruct> {
        let chunk = &embedded.chunk;
        let point_id = id::chunk_point_id(&chunk.id)
            .ok_or_else(|| Error::internal(format!("malformed chunk id '{}'", chunk.id)))?;

        let vectors = NamedVectors::default()
            .add_vector(DENSE_VECTOR_NAME, embedded.dense.clone())
            .add_vector(
                SPARSE_VECTOR_NAME,
                QdrantVector::new_sparse(
                    embedded.sparse.indices.clone(),
                    embedded.sparse.values.clone(),
                ),
            );

        let mut payload = json!({
            "chunk_id": chunk.id,
            "document_id": chunk.document_id,
            "store": chunk.store,
            "path": chunk.path,
            "language": chunk.language,
            "content": chunk.content,
            "symbols": chunk.symbols,
            "start_line": chunk.start_line,
            "end_line": chunk.end_line,
            "start_offset": chunk.start_offset,
            "end_offset": chunk.end_offset,
            "token_count": chunk.token_count,
            "document_hash": chunk.document_hash,
            "indexed_at": chunk.indexed_at.to_rfc3339(),
        });
        if let Some(connection_id) = &chunk.connection_id {
            payload["connection_id"] = json!(connection_id);
        }
        let payload = Payload::try_from(payload)
            .map_err(|e| Error::internal(format!("payload encoding failed: {}", e)))?;

        Ok(PointStruct::new(point_id, vectors, payload))
    }

    fn scored_points_to_hits(points: Vec<ScoredPoint>, prefix: Option<&str>) -> Vec<QueryHit> {
        points
            .into_iter()
            .filter_map(|point| {
                let chunk = payload_to_chunk(&point.payload)?;
                if let Some(prefix) = prefix {
                    if !chunk.path.starts_with(prefix) {
                        return None;
                    }
                }
                Some(QueryHit {
                    chunk,
                    score: point.score,
                })
            })
            .collect()
    }

    /// Resolve a path-prefix filter into the exact set of matching paths.
    async fn resolve_prefix_paths(&self, store: &str, prefix: &str) -> Result<Vec<String>> {
        let files = self
            .list_files(
                store,
                &PointFilter {
                    path_prefix: Some(prefix.to_string()),
                    ..PointFilter::default()
                },
            )
            .await?;
        Ok(files.into_iter().map(|f| f.path).collect())
    }

    /// Prefix filters over-fetch so the client-side prefix check still has
    /// enough candidates left.
    fn fetch_limit(filter: &PointFilter, limit: usize) -> usize {
        if filter.path_prefix.is_some() {
            limit.saturating_mul(3)
        } else {
            limit
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, store: &str, dense_dimension: usize) -> Result<()> {
        let collection = self.collection_name(store);

        let exists = self
            .with_retry("collection_exists", || {
                self.client.collection_exists(&collection)
            })
            .await?;
        if exists {
            debug!(collection, "collection already exists");
            return Ok(());
        }

        info!(collection, dense_dimension, "creating collection");

        let mut vectors = VectorsConfigBuilder::default();
        vectors.add_named_vector_params(
            DENSE_VECTOR_NAME,
            VectorParamsBuilder::new(dense_dimension as u64, Distance::Cosine),
        );
        let mut sparse_vectors = SparseVectorsConfigBuilder::default();
        sparse_vectors
            .add_named_vector_params(SPARSE_VECTOR_NAME, SparseVectorParamsBuilder::default());

        self.with_retry("create_collection", || {
            self.client.create_collection(
                CreateCollectionBuilder::new(&collection)
                    .vectors_config(vectors.clone())
                    .sparse_vectors_config(sparse_vectors.clone()),
            )
        })
        .await?;

        let indexes = [
            ("store", FieldType::Keyword),
            ("path", FieldType::Keyword),
            ("language", FieldType::Keyword),
            ("symbols", FieldType::Keyword),
            ("document_hash", FieldType::Keyword),
            ("connection_id", FieldType::Keyword),
            ("indexed_at", FieldType::Datetime),
        ];
        for (field, field_type) in indexes {
            self.with_retry("create_field_index", || {
                self.client.create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &collection,
                    field,
                    field_type,
                ))
            })
            .await?;
        }

        info!(collection, "collection ready");
        Ok(())
    }

    async fn drop_collection(&self, store: &str) -> Result<()> {
        let collection = self.collection_name(store);
        info!(collection, "dropping collection");
        self.with_retry("delete_collection", || {
            self.client.delete_collection(&collection)
        })
        .await?;
        Ok(())
    }

    async fn upsert_chunks(&self, store: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let collection = self.collection_name(store);

        for batch in chunks.chunks(self.upsert_batch_size) {
            let points: Vec<PointStruct> =
                batch.iter().map(Self::point_from).collect::<Result<_>>()?;

            self.with_retry("upsert_points", || {
                self.client
                    .upsert_points(UpsertPointsBuilder::new(&collection, points.clone()).wait(true))
            })
            .await?;

            self.metrics
                .upserts
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            debug!(collection, count = batch.len(), "upserted batch");
        }
        Ok(())
    }

    async fn delete_by_filter(&self, store: &str, filter: &PointFilter) -> Result<()> {
        let collection = self.collection_name(store);

        let mut qdrant_filter = Self::build_filter(filter).unwrap_or_default();
        if let Some(prefix) = &filter.path_prefix {
            let paths = self.resolve_prefix_paths(store, prefix).await?;
            if paths.is_empty() {
                return Ok(());
            }
            qdrant_filter.should = paths
                .into_iter()
                .map(|path| Condition::matches("path", path))
                .collect();
        }

        self.with_retry("delete_points", || {
            self.client.delete_points(
                DeletePointsBuilder::new(&collection)
                    .points(qdrant_filter.clone())
                    .wait(true),
            )
        })
        .await?;

        self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query_dense(
        &self,
        store: &str,
        vector: &[f32],
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>> {
        let collection = self.collection_name(store);
        self.metrics.queries.fetch_add(1, Ordering::Relaxed);

        let mut builder = QueryPointsBuilder::new(&collection)
            .query(Query::new_nearest(vector.to_vec()))
            .using(DENSE_VECTOR_NAME)
            .limit(Self::fetch_limit(filter, limit) as u64)
            .with_payload(true);
        if let Some(qdrant_filter) = Self::build_filter(filter) {
            builder = builder.filter(qdrant_filter);
        }

        let response = self
            .with_retry("query_dense", || self.client.query(builder.clone()))
            .await?;

        let mut hits =
            Self::scored_points_to_hits(response.result, filter.path_prefix.as_deref());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn query_sparse(
        &self,
        store: &str,
        vector: &SparseVector,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<QueryHit>> {
        let collection = self.collection_name(store);
        self.metrics.queries.fetch_add(1, Ordering::Relaxed);

        let mut builder = QueryPointsBuilder::new(&collection)
            .query(Query::new_nearest(VectorInput::new_sparse(
                vector.indices.clone(),
                vector.values.clone(),
            )))
            .using(SPARSE_VECTOR_NAME)
            .limit(Self::fetch_limit(filter, limit) as u64)
            .with_payload(true);
        if let Some(qdrant_filter) = Self::build_filter(filter) {
            builder = builder.filter(qdrant_filter);
        }

        let response = self
            .with_retry("query_sparse", || self.client.query(builder.clone()))
            .await?;

        let mut hits =
            Self::scored_points_to_hits(response.result, filter.path_prefix.as_deref());
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
        let collection = self.collection_name(store);
        self.metrics.queries.fetch_add(1, Ordering::Relaxed);

        let qdrant_filter = Self::build_filter(filter);

        let mut sparse_prefetch = PrefetchQueryBuilder::default()
            .query(Query::new_nearest(VectorInput::new_sparse(
                sparse.indices.clone(),
                sparse.values.clone(),
            )))
            .using(SPARSE_VECTOR_NAME)
            .limit(prefetch_limit as u64);
        let mut dense_prefetch = PrefetchQueryBuilder::default()
            .query(Query::new_nearest(dense.to_vec()))
            .using(DENSE_VECTOR_NAME)
            .limit(prefetch_limit as u64);
        if let Some(qdrant_filter) = &qdrant_filter {
            sparse_prefetch = sparse_prefetch.filter(qdrant_filter.clone());
            dense_prefetch = dense_prefetch.filter(qdrant_filter.clone());
        }

        let builder = QueryPointsBuilder::new(&collection)
            .add_prefetch(sparse_prefetch)
            .add_prefetch(dense_prefetch)
            .query(Query::new_fusion(Fusion::Rrf))
            .limit(Self::fetch_limit(filter, final_limit) as u64)
            .with_payload(true);

        let response = self
            .with_retry("query_hybrid", || self.client.query(builder.clone()))
            .await?;

        let mut hits =
            Self::scored_points_to_hits(response.result, filter.path_prefix.as_deref());
        hits.truncate(final_limit);
        Ok(hits)
    }

    async fn count(&self, store: &str, filter: &PointFilter) -> Result<u64> {
        // Prefix counting needs exact client-side semantics.
        if filter.path_prefix.is_some() {
            let files = self.list_files(store, filter).await?;
            return Ok(files.iter().map(|f| f.chunk_count).sum());
        }

        let collection = self.collection_name(store);
        let mut builder = CountPointsBuilder::new(&collection).exact(true);
        if let Some(qdrant_filter) = Self::build_filter(filter) {
            builder = builder.filter(qdrant_filter);
        }
        let response = self
            .with_retry("count", || self.client.count(builder.clone()))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn list_files(&self, store: &str, filter: &PointFilter) -> Result<Vec<FileInfo>> {
        let collection = self.collection_name(store);
        let qdrant_filter = Self::build_filter(filter);

        let mut files: HashMap<String, FileInfo> = HashMap::new();
        let mut offset = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&collection)
                .limit(SCROLL_PAGE_SIZE)
                .with_payload(true);
            if let Some(qdrant_filter) = &qdrant_filter {
                builder = builder.filter(qdrant_filter.clone());
            }
            if let Some(offset) = &offset {
                builder = builder.offset(offset.clone());
            }

            let response = self
                .with_retry("scroll", || self.client.scroll(builder.clone()))
                .await?;

            for point in response.result {
                let Some(chunk) = payload_to_chunk(&point.payload) else {
                    continue;
                };
                if let Some(prefix) = &filter.path_prefix {
                    if !chunk.path.starts_with(prefix.as_str()) {
                        continue;
                    }
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

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        let mut files: Vec<FileInfo> = files.into_values().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn stats(&self, store: &str) -> Result<StoreStats> {
        let collection = self.collection_name(store);

        let info = self
            .with_retry("collection_info", || {
                self.client.collection_info(&collection)
            })
            .await?
            .result
            .ok_or_else(|| Error::unavailable("collection info missing in response"))?;

        let status = match info.status {
            1 => "green",
            2 => "yellow",
            3 => "red",
            4 => "grey",
            _ => "unknown",
        }
        .to_string();

        let files = self.list_files(store, &PointFilter::default()).await?;
        let mut languages: HashMap<String, u64> = HashMap::new();
        for file in &files {
            *languages.entry(file.language.clone()).or_insert(0) += file.chunk_count;
        }

        Ok(StoreStats {
            chunk_count: info.points_count.unwrap_or(0),
            file_count: files.len() as u64,
            languages,
            status,
        })
    }

    async fn health(&self) -> Result<VectorStoreHealth> {
        match self.client.health_check().await {
            Ok(reply) => Ok(VectorStoreHealth {
                ok: true,
                backend: "qdrant".to_string(),
                version: Some(reply.version),
            }),
            Err(e) => {
                warn!("qdrant health check failed: {}", e);
                Ok(VectorStoreHealth {
                    ok: false,
                    backend: "qdrant".to_string(),
                    version: None,
                })
            }
        }
    }
}

/// Rebuild a [`Chunk`] from a point payload; `None` for malformed points.
fn payload_to_chunk(payload: &HashMap<String, QdrantValue>) -> Option<Chunk> {
    Some(Chunk {
        id: payload_str(payload, "chunk_id")?,
        document_id: payload_str(payload, "document_id")?,
        store: payload_str(payload, "store")?,
        path: payload_str(payload, "path")?,
        language: payload_str(payload, "language")?,
        content: payload_str(payload, "content").unwrap_or_default(),
        symbols: payload_str_list(payload, "symbols"),
        start_line: payload_u64(payload, "start_line")? as u32,
        end_line: payload_u64(payload, "end_line")? as u32,
        start_offset: payload_u64(payload, "start_offset").unwrap_or(0) as usize,
        end_offset: payload_u64(payload, "end_offset").unwrap_or(0) as usize,
        token_count: payload_u64(payload, "token_count").unwrap_or(0) as usize,
        document_hash: payload_str(payload, "document_hash").unwrap_or_default(),
        indexed_at: payload_str(payload, "indexed_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        connection_id: payload_str(payload, "connection_id"),
    })
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(value) => Some(value.clone()),
        _ => None,
    }
}

fn payload_u64(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<u64> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::IntegerValue(value) if *value >= 0 => Some(*value as u64),
        _ => None,
    }
}

fn payload_str_list(payload: &HashMap<String, QdrantValue>, key: &str) -> Vec<String> {
    let Some(value) = payload.get(key) else {
        return Vec::new();
    };
    match value.kind.as_ref() {
        Some(Kind::ListValue(list)) => list
            .values
            .iter()
            .filter_map(|item| match item.kind.as_ref() {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_chunk() -> Chunk {
        Chunk {
            id: id::chunk_id("default", "src/lib.rs", 1, 10),
            document_id: id::document_id("src/lib.rs"),
            store: "default".into(),
            path: "src/lib.rs".into(),
            language: "rust".into(),
            content: "pub fn hello() {}".into(),
            symbols: vec!["hello".into()],
            start_line: 1,
            end_line: 10,
            start_offset: 0,
            end_offset: 17,
            token_count: 4,
            document_hash: id::content_hash(b"pub fn hello() {}"),
            indexed_at: Utc::now(),
            connection_id: Some("abc123".into()),
        }
    }

    #[test]
    fn test_filter_building() {
        assert!(QdrantStore::build_filter(&PointFilter::default()).is_none());

        let filter = PointFilter {
            path: Some("src/lib.rs".into()),
            languages: vec!["rust".into(), "go".into()],
            connection_id: Some("abc".into()),
            ..PointFilter::default()
        };
        let built = QdrantStore::build_filter(&filter).unwrap();
        assert_eq!(built.must.len(), 3);

        // prefix alone builds no server-side filter
        let filter = PointFilter {
            path_prefix: Some("src/".into()),
            ..PointFilter::default()
        };
        assert!(QdrantStore::build_filter(&filter).is_none());
    }

    #[test]
    fn test_point_payload_roundtrip() {
        let chunk = sample_chunk();
        let embedded = EmbeddedChunk::new(
            chunk.clone(),
            vec![0.1; 4],
            SparseVector::new(vec![1, 9], vec![0.4, 0.6]).unwrap(),
        )
        .unwrap();

        let point = QdrantStore::point_from(&embedded).unwrap();
        let restored = payload_to_chunk(&point.payload).unwrap();

        assert_eq!(restored.id, chunk.id);
        assert_eq!(restored.path, chunk.path);
        assert_eq!(restored.symbols, chunk.symbols);
        assert_eq!(restored.start_line, chunk.start_line);
        assert_eq!(restored.end_line, chunk.end_line);
        assert_eq!(restored.connection_id, chunk.connection_id);
        assert_eq!(
            restored.indexed_at.timestamp(),
            chunk.indexed_at.timestamp()
        );
    }

    #[test]
    fn test_point_id_is_chunk_id_prefix() {
        let chunk = sample_chunk();
        let expected = id::chunk_point_id(&chunk.id).unwrap();
        let embedded = EmbeddedChunk::new(
            chunk,
            vec![0.1; 4],
            SparseVector::new(vec![1], vec![1.0]).unwrap(),
        )
        .unwrap();
        let point = QdrantStore::point_from(&embedded).unwrap();
        match point.id.and_then(|id| id.point_id_options) {
            Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)) => {
                assert_eq!(num, expected)
            }
            other => panic!("unexpected point id: {:?}", other),
        }
    }

    // Integration tests require a running Qdrant server.
    #[tokio::test]
    #[ignore] // Requires Qdrant server running
    async fn test_qdrant_roundtrip() {
        let config = QdrantConfig {
            collection_prefix: format!("ricetest{}", std::process::id()),
            ..QdrantConfig::default()
        };
        let store = QdrantStore::new(config, 100).await.unwrap();
        store.ensure_collection("it", 4).await.unwrap();

        let embedded = EmbeddedChunk::new(
            sample_chunk(),
            vec![0.1, 0.2, 0.3, 0.4],
            SparseVector::new(vec![1, 9], vec![0.4, 0.6]).unwrap(),
        )
        .unwrap();
        store.upsert_chunks("it", &[embedded]).await.unwrap();

        let hits = store
            .query_dense("it", &[0.1, 0.2, 0.3, 0.4], 5, &PointFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.path, "src/lib.rs");

        store.drop_collection("it").await.unwrap();
    }
}
