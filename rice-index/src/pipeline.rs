//! The indexing pipeline: documents in, embedded chunks in the vector
//! store out.
//!
//! Per (store, document): size gate, language detection, chunking, symbol
//! extraction, batched dense+sparse embedding through the bus (direct ML
//! fallback when the bus fails), then a replace-on-write delete+upsert
//! under a per-path lock so concurrent searches see either all old chunks
//! or all new ones.

use crate::chunker::{chunk_content, ChunkerConfig};
use crate::language::Language;
use crate::symbols::extract_symbols;
use chrono::Utc;
use dashmap::DashMap;
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::config::IndexConfig;
use rice_core::protocol::{
    BusErrorResponse, ChunkCreatedEvent, DeleteIndexRequest, EmbedRequest, EmbedResponse,
    FileError, IndexDocument, IndexRequest, IndexResult, SparseEncodeRequest,
    SparseEncodeResponse, SyncIndexRequest, SyncIndexResult,
};
use rice_core::{
    id, Chunk, DenseVector, EmbeddedChunk, Error, MlBackend, Result, SparseVector, Store,
};
use parking_lot::RwLock;
use rice_vector::{PointFilter, VectorStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters for indexing monitoring.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    pub files_indexed: AtomicU64,
    pub files_skipped: AtomicU64,
    pub files_failed: AtomicU64,
    pub chunks_created: AtomicU64,
    pub ml_fallbacks: AtomicU64,
}

enum FileOutcome {
    Indexed(usize),
    Skipped,
    Failed(FileError),
}

/// Orchestrates document ingestion for all stores.
pub struct IndexingPipeline {
    /// Swapped wholesale on `settings.changed`; each request takes a
    /// snapshot at entry
    config: RwLock<IndexConfig>,
    vector_store: Arc<dyn VectorStore>,
    bus: Arc<dyn EventBus>,
    /// Direct in-process fallback when the bus is unreachable
    ml: Option<Arc<dyn MlBackend>>,
    ml_timeout: Duration,
    /// Serializes replace-on-write per (store, path)
    path_locks: DashMap<(String, String), Arc<Mutex<()>>>,
    metrics: Arc<IndexMetrics>,
}

impl IndexingPipeline {
    pub fn new(
        config: IndexConfig,
        vector_store: Arc<dyn VectorStore>,
        bus: Arc<dyn EventBus>,
        ml: Option<Arc<dyn MlBackend>>,
        ml_timeout: Duration,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            vector_store,
            bus,
            ml,
            ml_timeout,
            path_locks: DashMap::new(),
            metrics: Arc::new(IndexMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// Current config snapshot.
    pub fn config_snapshot(&self) -> IndexConfig {
        self.config.read().clone()
    }

    /// Apply refreshed settings; in-flight requests keep their snapshot.
    pub fn apply_config(&self, config: IndexConfig) {
        *self.config.write() = config;
    }

    fn path_lock(&self, store: &str, path: &str) -> Arc<Mutex<()>> {
        self.path_locks
            .entry((store.to_string(), path.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Index a batch of documents into `store`. Files are processed
    /// concurrently up to the worker limit; per-file failures are
    /// collected, not fatal.
    pub async fn index(
        self: &Arc<Self>,
        store: &Store,
        request: IndexRequest,
        connection_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<IndexResult> {
        let started = Instant::now();
        let config = self.config_snapshot();
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for document in request.documents {
            if cancel.is_cancelled() {
                return Err(Error::canceled("index request canceled"));
            }
            let pipeline = self.clone();
            let store = store.clone();
            let semaphore = semaphore.clone();
            let connection_id = connection_id.clone();
            let cancel = cancel.clone();
            let force = request.force;
            let file_timeout_secs = config.file_timeout_secs;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let path = document.path.clone();
                let file_timeout = Duration::from_secs(file_timeout_secs);

                let outcome = tokio::select! {
                    result = tokio::time::timeout(
                        file_timeout,
                        pipeline.process_document(&store, document, connection_id, force),
                    ) => match result {
                        Ok(outcome) => outcome,
                        Err(_) => FileOutcome::Failed(FileError {
                            path: path.clone(),
                            error: format!("file timed out after {:?}", file_timeout),
                        }),
                    },
                    _ = cancel.cancelled() => FileOutcome::Failed(FileError {
                        path: path.clone(),
                        error: "canceled".to_string(),
                    }),
                };
                outcome
            });
        }

        let mut result = IndexResult::default();
        while let Some(joined) = tasks.join_next().await {
            if cancel.is_cancelled() {
                return Err(Error::canceled("index request canceled"));
            }
            match joined {
                Ok(FileOutcome::Indexed(chunks)) => {
                    result.indexed += 1;
                    result.chunks_created += chunks;
                }
                Ok(FileOutcome::Skipped) => result.skipped += 1,
                Ok(FileOutcome::Failed(error)) => {
                    result.failed += 1;
                    result.errors.push(error);
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(FileError {
                        path: "<unknown>".to_string(),
                        error: format!("worker panicked: {}", e),
                    });
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            store = %store.name,
            indexed = result.indexed,
            skipped = result.skipped,
            failed = result.failed,
            chunks = result.chunks_created,
            elapsed_ms = result.elapsed_ms,
            "index request complete"
        );
        Ok(result)
    }

    async fn process_document(
        &self,
        store: &Store,
        document: IndexDocument,
        connection_id: Option<String>,
        force: bool,
    ) -> FileOutcome {
        match self
            .process_document_inner(store, document, connection_id, force)
            .await
        {
            Ok(Some(chunks)) => {
                self.metrics.files_indexed.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .chunks_created
                    .fetch_add(chunks as u64, Ordering::Relaxed);
                FileOutcome::Indexed(chunks)
            }
            Ok(None) => {
                self.metrics.files_skipped.fetch_add(1, Ordering::Relaxed);
                FileOutcome::Skipped
            }
            Err((path, e)) => {
                self.metrics.files_failed.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path, "file failed: {}", e);
                FileOutcome::Failed(FileError {
                    path,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn process_document_inner(
        &self,
        store: &Store,
        document: IndexDocument,
        connection_id: Option<String>,
        force: bool,
    ) -> std::result::Result<Option<usize>, (String, Error)> {
        let path = document.path.clone();
        let fail = |e: Error| (path.clone(), e);

        let config = self.config_snapshot();
        if document.content.len() > config.max_file_size {
            return Err(fail(Error::validation(format!(
                "file exceeds {} bytes",
                config.max_file_size
            ))));
        }

        let language = document
            .language
            .as_deref()
            .map(Language::from_name)
            .unwrap_or_else(|| Language::from_path(&document.path));
        let document_hash = id::content_hash(document.content.as_bytes());

        // Unchanged content is skipped unless forced.
        if !force {
            let existing = self
                .vector_store
                .count(
                    &store.name,
                    &PointFilter {
                        path: Some(document.path.clone()),
                        document_hash: Some(document_hash.clone()),
                        connection_id: connection_id.clone(),
                        ..PointFilter::default()
                    },
                )
                .await
                .unwrap_or(0);
            if existing > 0 {
                debug!(path = %document.path, "unchanged, skipping");
                return Ok(None);
            }
        }

        let chunker_config = ChunkerConfig {
            chunk_size: store.config.chunk_size,
            chunk_overlap: store.config.chunk_overlap,
            min_tokens: config.min_chunk_tokens,
            max_tokens: config.max_chunk_tokens,
        };
        let raw_chunks = chunk_content(&document.content, language.family(), &chunker_config);

        let chunks: Vec<Chunk> = raw_chunks
            .into_iter()
            .map(|raw| Chunk {
                id: id::scoped_chunk_id(
                    &store.name,
                    &document.path,
                    raw.start_line,
                    raw.end_line,
                    connection_id.as_deref(),
                ),
                document_id: id::document_id(&document.path),
                store: store.name.clone(),
                path: document.path.clone(),
                language: language.as_str().to_string(),
                symbols: extract_symbols(&raw.content, language),
                start_line: raw.start_line,
                end_line: raw.end_line,
                start_offset: raw.start_offset,
                end_offset: raw.end_offset,
                token_count: raw.token_count,
                content: raw.content,
                document_hash: document_hash.clone(),
                indexed_at: Utc::now(),
                connection_id: connection_id.clone(),
            })
            .collect();

        // Embed before touching the index so a model failure never
        // destroys the previous version of the file.
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let (dense, sparse) = self.encode_texts(&texts).await.map_err(&fail)?;
        if dense.len() != chunks.len() || sparse.len() != chunks.len() {
            return Err(fail(Error::internal(format!(
                "embedding count mismatch: {} chunks, {} dense, {} sparse",
                chunks.len(),
                dense.len(),
                sparse.len()
            ))));
        }

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(dense.into_iter().zip(sparse))
            .map(|(chunk, (dense, sparse))| EmbeddedChunk::new(chunk, dense, sparse))
            .collect::<Result<_>>()
            .map_err(&fail)?;

        // Replace-on-write: delete + upsert under the per-path lock.
        let lock = self.path_lock(&store.name, &document.path);
        let _guard = lock.lock().await;

        self.vector_store
            .delete_by_filter(
                &store.name,
                &PointFilter {
                    path: Some(document.path.clone()),
                    connection_id: connection_id.clone(),
                    ..PointFilter::default()
                },
            )
            .await
            .map_err(&fail)?;

        self.vector_store
            .upsert_chunks(&store.name, &embedded)
            .await
            .map_err(&fail)?;

        let chunk_count = embedded.len();
        for embedded in &embedded {
            let event = ChunkCreatedEvent {
                store: store.name.clone(),
                path: embedded.chunk.path.clone(),
                chunk_id: embedded.chunk.id.clone(),
                language: embedded.chunk.language.clone(),
            };
            // Best-effort; metrics subscribers must not fail the index.
            if let Ok(message) = BusMessage::event(topics::INDEX_CHUNK_CREATED, &event) {
                if let Err(e) = self.bus.publish(message).await {
                    debug!("chunk event dropped: {}", e);
                }
            }
        }

        debug!(path = %document.path, chunks = chunk_count, "file indexed");
        Ok(Some(chunk_count))
    }

    /// Dense and sparse vectors for a batch, requested in parallel over
    /// the bus; falls back to the in-process ML backend on bus failure.
    async fn encode_texts(
        &self,
        texts: &[String],
    ) -> Result<(Vec<DenseVector>, Vec<SparseVector>)> {
        if texts.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let embed_request = BusMessage::request(
            topics::ML_EMBED_REQUEST,
            &EmbedRequest {
                texts: texts.to_vec(),
            },
        )?;
        let sparse_request = BusMessage::request(
            topics::ML_SPARSE_REQUEST,
            &SparseEncodeRequest {
                texts: texts.to_vec(),
            },
        )?;

        let (embed_reply, sparse_reply) = tokio::join!(
            self.bus.request(embed_request, self.ml_timeout),
            self.bus.request(sparse_request, self.ml_timeout),
        );

        let via_bus = (|| {
            let dense: EmbedResponse = decode_ml_reply(embed_reply?)?;
            let sparse: SparseEncodeResponse = decode_ml_reply(sparse_reply?)?;
            Ok::<_, Error>((dense.vectors, sparse.vectors))
        })();

        match via_bus {
            Ok(vectors) => Ok(vectors),
            Err(bus_error) => match &self.ml {
                Some(ml) => {
                    self.metrics.ml_fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!("bus embedding failed, using direct ML: {}", bus_error);
                    let (dense, sparse) =
                        tokio::try_join!(ml.embed(texts), ml.encode_sparse(texts))?;
                    Ok((dense, sparse))
                }
                None => Err(bus_error),
            },
        }
    }

    /// Delete indexed files by explicit paths and/or prefix; returns the
    /// number of chunks removed.
    pub async fn remove(
        &self,
        store: &Store,
        request: DeleteIndexRequest,
        connection_id: Option<String>,
    ) -> Result<u64> {
        let mut deleted = 0;

        for path in &request.paths {
            let filter = PointFilter {
                path: Some(path.clone()),
                connection_id: connection_id.clone(),
                ..PointFilter::default()
            };
            deleted += self.vector_store.count(&store.name, &filter).await?;
            let lock = self.path_lock(&store.name, path);
            let _guard = lock.lock().await;
            self.vector_store
                .delete_by_filter(&store.name, &filter)
                .await?;
        }

        if let Some(prefix) = &request.path_prefix {
            let filter = PointFilter {
                path_prefix: Some(prefix.clone()),
                connection_id: connection_id.clone(),
                ..PointFilter::default()
            };
            deleted += self.vector_store.count(&store.name, &filter).await?;
            self.vector_store
                .delete_by_filter(&store.name, &filter)
                .await?;
        }

        info!(store = %store.name, deleted, "index delete complete");
        Ok(deleted)
    }

    /// Reconcile against the set of paths that still exist client-side:
    /// indexed files absent from `current_paths` are removed.
    pub async fn sync(
        &self,
        store: &Store,
        request: SyncIndexRequest,
        connection_id: Option<String>,
    ) -> Result<SyncIndexResult> {
        let current: HashSet<&str> = request.current_paths.iter().map(String::as_str).collect();
        let filter = PointFilter {
            connection_id: connection_id.clone(),
            ..PointFilter::default()
        };
        let indexed = self.vector_store.list_files(&store.name, &filter).await?;

        let mut removed_paths = Vec::new();
        for file in indexed {
            if !current.contains(file.path.as_str()) {
                let lock = self.path_lock(&store.name, &file.path);
                let _guard = lock.lock().await;
                self.vector_store
                    .delete_by_filter(
                        &store.name,
                        &PointFilter {
                            path: Some(file.path.clone()),
                            connection_id: connection_id.clone(),
                            ..PointFilter::default()
                        },
                    )
                    .await?;
                removed_paths.push(file.path);
            }
        }

        removed_paths.sort();
        info!(store = %store.name, removed = removed_paths.len(), "index sync complete");
        Ok(SyncIndexResult {
            removed: removed_paths.len(),
            removed_paths,
        })
    }
}

fn decode_ml_reply<T: serde::de::DeserializeOwned>(message: BusMessage) -> Result<T> {
    match message.decode::<T>() {
        Ok(value) => Ok(value),
        Err(_) => match message.decode::<BusErrorResponse>() {
            Ok(error) => Err(Error::unavailable(error.error)),
            Err(e) => Err(Error::internal(format!("malformed ML response: {}", e))),
        },
    }
}
