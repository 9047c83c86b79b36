//! The search service: orchestrates understanding, encoding, retrieval,
//! fusion, reranking and post-rank into one pipeline.

use crate::fusion::fuse_rrf;
use crate::postrank::{post_rank, PostRankConfig};
use crate::rerank::{Reranker, RerankSettings};
use crate::understanding::QueryUnderstanding;
use crate::{sort_candidates, Candidate};
use parking_lot::RwLock;
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::config::SearchConfig;
use rice_core::protocol::{
    BusErrorResponse, EmbedRequest, EmbedResponse, SearchHit, SearchRequest, SearchResponse,
    SparseEncodeRequest, SparseEncodeResponse, StageTimings,
};
use rice_core::{DenseVector, Error, MlBackend, Result, SparseVector, Store};
use rice_vector::{PointFilter, QueryHit, VectorStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How far a weight may sit from 0.5 while still using the backend's
/// native balanced RRF.
const BALANCED_TOLERANCE: f32 = 0.05;

/// Per-request transport context.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Connection conveyed by the transport (`X-Connection-ID`)
    pub connection_id: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Runtime-tunable search parameters; consumers hold an `Arc` snapshot
/// swapped on `settings.changed`.
#[derive(Debug, Clone)]
pub struct SearchTuning {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub rrf_k: f32,
    pub rerank_confidence_margin: f32,
    pub enable_second_pass: bool,
    pub enable_dedup: bool,
    pub dedup_threshold: f32,
    pub enable_diversity: bool,
    pub mmr_lambda: f32,
    pub search_timeout: Duration,
    pub ml_timeout: Duration,
    pub retrieval_timeout: Duration,
}

impl From<&SearchConfig> for SearchTuning {
    fn from(config: &SearchConfig) -> Self {
        Self {
            default_top_k: config.default_top_k,
            max_top_k: config.max_top_k,
            rrf_k: config.rrf_k,
            rerank_confidence_margin: config.rerank_confidence_margin,
            enable_second_pass: config.enable_second_pass,
            enable_dedup: config.enable_dedup,
            dedup_threshold: config.dedup_threshold,
            enable_diversity: config.enable_diversity,
            mmr_lambda: config.mmr_lambda,
            search_timeout: Duration::from_secs(config.timeout_secs),
            ml_timeout: Duration::from_secs(config.ml_timeout_secs),
            retrieval_timeout: Duration::from_secs(config.retrieval_timeout_secs),
        }
    }
}

/// Counters for search monitoring.
#[derive(Debug, Default)]
pub struct SearchMetrics {
    pub searches: AtomicU64,
    pub failures: AtomicU64,
    pub reranks_applied: AtomicU64,
    pub ml_fallbacks: AtomicU64,
}

/// Orchestrates the full search pipeline for all stores.
pub struct SearchService {
    bus: Arc<dyn EventBus>,
    /// Direct in-process fallback when the bus is unreachable
    ml: Option<Arc<dyn MlBackend>>,
    vector_store: Arc<dyn VectorStore>,
    understanding: QueryUnderstanding,
    reranker: Reranker,
    tuning: RwLock<Arc<SearchTuning>>,
    metrics: SearchMetrics,
}

impl SearchService {
    pub fn new(
        bus: Arc<dyn EventBus>,
        vector_store: Arc<dyn VectorStore>,
        ml: Option<Arc<dyn MlBackend>>,
        tuning: SearchTuning,
    ) -> Self {
        Self {
            reranker: Reranker::new(bus.clone(), ml.clone()),
            bus,
            ml,
            vector_store,
            understanding: QueryUnderstanding::new(),
            tuning: RwLock::new(Arc::new(tuning)),
            metrics: SearchMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &SearchMetrics {
        &self.metrics
    }

    /// Swap in a new tuning snapshot; running searches keep the one they
    /// started with.
    pub fn apply_tuning(&self, tuning: SearchTuning) {
        *self.tuning.write() = Arc::new(tuning);
    }

    pub fn current_tuning(&self) -> Arc<SearchTuning> {
        self.tuning.read().clone()
    }

    /// Execute a search against `store`. Bounded by the pipeline timeout;
    /// cancellation never returns partial results.
    pub async fn search(
        &self,
        store: &Store,
        request: SearchRequest,
        ctx: &RequestContext,
    ) -> Result<SearchResponse> {
        let tuning = self.current_tuning();
        self.metrics.searches.fetch_add(1, Ordering::Relaxed);

        let result = tokio::select! {
            result = tokio::time::timeout(
                tuning.search_timeout,
                self.run_pipeline(store, request, ctx, &tuning),
            ) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "search exceeded {:?}",
                    tuning.search_timeout
                ))),
            },
            _ = ctx.cancel.cancelled() => Err(Error::canceled("search canceled")),
        };

        if result.is_err() {
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn run_pipeline(
        &self,
        store: &Store,
        request: SearchRequest,
        ctx: &RequestContext,
        tuning: &SearchTuning,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let mut timings = StageTimings::default();

        // validation
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if request.top_k == 0 || request.top_k > tuning.max_top_k {
            return Err(Error::validation(format!(
                "top_k must be within 1..={}",
                tuning.max_top_k
            )));
        }
        let options = &request.options;
        for (name, weight) in [
            ("sparse_weight", options.sparse_weight),
            ("dense_weight", options.dense_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) || !weight.is_finite() {
                return Err(Error::validation(format!(
                    "{} must be within 0.0..=1.0",
                    name
                )));
            }
        }
        if options.sparse_weight == 0.0 && options.dense_weight == 0.0 {
            return Err(Error::validation("at least one retrieval weight must be non-zero"));
        }

        let connection_scope =
            resolve_connection_scope(request.filter.connection_id.as_deref(), ctx);
        let filter = PointFilter {
            path_prefix: request.filter.path_prefix.clone(),
            languages: request.filter.languages.clone(),
            connection_id: connection_scope,
            ..PointFilter::default()
        };

        // (a) query understanding
        let stage = Instant::now();
        let parsed = self.understanding.parse(query);
        timings.understand_ms = stage.elapsed().as_millis() as u64;

        // (b) encode: dense and sparse in parallel, degrade to whichever
        // side succeeded
        let stage = Instant::now();
        let (dense_vector, sparse_vector) = self
            .encode_query(&parsed.search_query, tuning.ml_timeout)
            .await?;
        timings.encode_ms = stage.elapsed().as_millis() as u64;

        // (c) retrieve + fuse
        let stage = Instant::now();
        let candidate_limit = request.top_k.max(options.rerank_top_k);
        let prefetch_limit = (request.top_k * 5).max(options.rerank_top_k).max(100);
        let mut candidates = self
            .retrieve(
                store,
                &sparse_vector,
                &dense_vector,
                options.sparse_weight,
                options.dense_weight,
                prefetch_limit,
                candidate_limit,
                &filter,
                tuning,
            )
            .await?;
        timings.retrieve_ms = stage.elapsed().as_millis() as u64;

        // (d) assemble: fusion output is already unique per chunk id
        let total_candidates = candidates.len();
        candidates.truncate(candidate_limit);

        // (e) multi-pass rerank
        let stage = Instant::now();
        let mut rerank_outcome = crate::rerank::RerankOutcome::default();
        if options.enable_reranking && !candidates.is_empty() {
            rerank_outcome = self
                .reranker
                .rerank(
                    &parsed.search_query,
                    &mut candidates,
                    request.top_k,
                    RerankSettings {
                        confidence_margin: tuning.rerank_confidence_margin,
                        enable_second_pass: tuning.enable_second_pass,
                        timeout: tuning.ml_timeout,
                    },
                )
                .await;
            if rerank_outcome.applied {
                self.metrics.reranks_applied.fetch_add(1, Ordering::Relaxed);
            }
        }
        timings.rerank_ms = stage.elapsed().as_millis() as u64;

        // (f) post-rank
        let stage = Instant::now();
        let candidates = post_rank(
            candidates,
            &PostRankConfig {
                dedup_enabled: tuning.enable_dedup,
                dedup_threshold: tuning.dedup_threshold,
                diversity_enabled: tuning.enable_diversity,
                mmr_lambda: tuning.mmr_lambda,
                group_by_file: options.group_by_file,
                max_per_file: options.max_per_file,
            },
        );
        timings.post_rank_ms = stage.elapsed().as_millis() as u64;

        // (g) trim and assemble the response
        let results: Vec<SearchHit> = candidates
            .into_iter()
            .take(request.top_k)
            .map(|candidate| SearchHit {
                chunk_id: candidate.chunk.id,
                path: candidate.chunk.path,
                language: candidate.chunk.language,
                start_line: candidate.chunk.start_line,
                end_line: candidate.chunk.end_line,
                symbols: candidate.chunk.symbols,
                content: options.include_content.then_some(candidate.chunk.content),
                score: candidate.score,
                dense_score: candidate.dense_score,
                sparse_score: candidate.sparse_score,
                rerank_score: candidate.rerank_score,
                connection_id: candidate.chunk.connection_id,
            })
            .collect();

        timings.total_ms = started.elapsed().as_millis() as u64;
        debug!(
            store = %store.name,
            results = results.len(),
            total_candidates,
            reranked = rerank_outcome.applied,
            "search complete"
        );

        Ok(SearchResponse {
            store: store.name.clone(),
            results,
            total_candidates,
            reranking_applied: rerank_outcome.applied,
            rerank_passes: rerank_outcome.passes,
            parsed_query: parsed,
            timings,
        })
    }

    /// Encode the search query into dense and sparse vectors via two
    /// parallel bus round-trips, falling back to direct ML. A side that
    /// fails is dropped; both failing is an error.
    async fn encode_query(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<(Option<DenseVector>, Option<SparseVector>)> {
        let texts = vec![text.to_string()];
        let embed_request =
            BusMessage::request(topics::ML_EMBED_REQUEST, &EmbedRequest { texts: texts.clone() })?;
        let sparse_request = BusMessage::request(
            topics::ML_SPARSE_REQUEST,
            &SparseEncodeRequest { texts: texts.clone() },
        )?;

        let (embed_reply, sparse_reply) = tokio::join!(
            self.bus.request(embed_request, timeout),
            self.bus.request(sparse_request, timeout),
        );

        let dense = match embed_reply.and_then(|m| decode_reply::<EmbedResponse>(m)) {
            Ok(response) => response.vectors.into_iter().next(),
            Err(e) => match &self.ml {
                Some(ml) => {
                    self.metrics.ml_fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!("bus embed failed, trying direct ML: {}", e);
                    match ml.embed(&texts).await {
                        Ok(vectors) => vectors.into_iter().next(),
                        Err(e) => {
                            warn!("dense encoding failed: {}", e);
                            None
                        }
                    }
                }
                None => {
                    warn!("dense encoding failed: {}", e);
                    None
                }
            },
        };

        let sparse = match sparse_reply.and_then(|m| decode_reply::<SparseEncodeResponse>(m)) {
            Ok(response) => response.vectors.into_iter().next(),
            Err(e) => match &self.ml {
                Some(ml) => {
                    warn!("bus sparse failed, trying direct ML: {}", e);
                    match ml.encode_sparse(&texts).await {
                        Ok(vectors) => vectors.into_iter().next(),
                        Err(e) => {
                            warn!("sparse encoding failed: {}", e);
                            None
                        }
                    }
                }
                None => {
                    warn!("sparse encoding failed: {}", e);
                    None
                }
            },
        };

        // An empty sparse vector cannot retrieve anything.
        let sparse = sparse.filter(|v| !v.is_empty());

        if dense.is_none() && sparse.is_none() {
            return Err(Error::unavailable(
                "ML service unavailable: no query vectors could be produced",
            ));
        }
        Ok((dense, sparse))
    }

    #[allow(clippy::too_many_arguments)]
    async fn retrieve(
        &self,
        store: &Store,
        sparse: &Option<SparseVector>,
        dense: &Option<DenseVector>,
        sparse_weight: f32,
        dense_weight: f32,
        prefetch_limit: usize,
        final_limit: usize,
        filter: &PointFilter,
        tuning: &SearchTuning,
    ) -> Result<Vec<Candidate>> {
        let balanced = (sparse_weight - 0.5).abs() <= BALANCED_TOLERANCE
            && (dense_weight - 0.5).abs() <= BALANCED_TOLERANCE;
        let retrieval_timeout = tuning.retrieval_timeout;

        match (sparse, dense) {
            (Some(sparse), Some(dense)) if balanced => {
                // backend-native RRF with both prefetches in one call
                let hits = tokio::time::timeout(
                    retrieval_timeout,
                    self.vector_store.query_hybrid_rrf(
                        &store.name,
                        sparse,
                        dense,
                        prefetch_limit,
                        final_limit,
                        filter,
                    ),
                )
                .await
                .map_err(|_| Error::timeout("hybrid retrieval timed out"))??;
                let mut candidates: Vec<Candidate> = hits
                    .into_iter()
                    .map(|hit| Candidate::from_chunk(hit.chunk, hit.score))
                    .collect();
                sort_candidates(&mut candidates);
                Ok(candidates)
            }
            (Some(sparse_vector), Some(dense_vector)) => {
                let (sparse_result, dense_result) = tokio::join!(
                    tokio::time::timeout(
                        retrieval_timeout,
                        self.vector_store.query_sparse(
                            &store.name,
                            sparse_vector,
                            prefetch_limit,
                            filter,
                        ),
                    ),
                    tokio::time::timeout(
                        retrieval_timeout,
                        self.vector_store.query_dense(
                            &store.name,
                            dense_vector,
                            prefetch_limit,
                            filter,
                        ),
                    ),
                );
                let sparse_hits = flatten_retrieval(sparse_result, "sparse");
                let dense_hits = flatten_retrieval(dense_result, "dense");
                let (sparse_hits, dense_hits) = match (sparse_hits, dense_hits) {
                    (Err(e), Err(_)) => return Err(e),
                    (sparse_hits, dense_hits) => {
                        (sparse_hits.unwrap_or_default(), dense_hits.unwrap_or_default())
                    }
                };
                Ok(fuse_rrf(
                    sparse_hits,
                    dense_hits,
                    sparse_weight,
                    dense_weight,
                    tuning.rrf_k,
                ))
            }
            (Some(sparse_vector), None) => {
                let hits = tokio::time::timeout(
                    retrieval_timeout,
                    self.vector_store.query_sparse(
                        &store.name,
                        sparse_vector,
                        prefetch_limit,
                        filter,
                    ),
                )
                .await
                .map_err(|_| Error::timeout("sparse retrieval timed out"))??;
                Ok(fuse_rrf(
                    hits,
                    Vec::new(),
                    sparse_weight.max(f32::EPSILON),
                    dense_weight,
                    tuning.rrf_k,
                ))
            }
            (None, Some(dense_vector)) => {
                let hits = tokio::time::timeout(
                    retrieval_timeout,
                    self.vector_store.query_dense(
                        &store.name,
                        dense_vector,
                        prefetch_limit,
                        filter,
                    ),
                )
                .await
                .map_err(|_| Error::timeout("dense retrieval timed out"))??;
                Ok(fuse_rrf(
                    Vec::new(),
                    hits,
                    sparse_weight,
                    dense_weight.max(f32::EPSILON),
                    tuning.rrf_k,
                ))
            }
            (None, None) => Err(Error::unavailable("no query vectors available")),
        }
    }
}

/// Connection-scoping rules, in priority order: explicit filter value
/// wins, `"*"`/`"all"` clears scoping, otherwise the transport's
/// connection id applies, otherwise no scoping.
fn resolve_connection_scope(
    filter_value: Option<&str>,
    ctx: &RequestContext,
) -> Option<String> {
    match filter_value {
        Some("*") | Some("all") => None,
        Some(explicit) => Some(explicit.to_string()),
        None => ctx.connection_id.clone(),
    }
}

fn decode_reply<T: serde::de::DeserializeOwned>(message: BusMessage) -> Result<T> {
    match message.decode::<T>() {
        Ok(value) => Ok(value),
        Err(_) => match message.decode::<BusErrorResponse>() {
            Ok(error) => Err(Error::unavailable(error.error)),
            Err(e) => Err(Error::internal(format!("malformed ML response: {}", e))),
        },
    }
}

fn flatten_retrieval(
    result: std::result::Result<Result<Vec<QueryHit>>, tokio::time::error::Elapsed>,
    which: &str,
) -> Result<Vec<QueryHit>> {
    match result {
        Ok(Ok(hits)) => Ok(hits),
        Ok(Err(e)) => {
            warn!("{} retrieval failed: {}", which, e);
            Err(e)
        }
        Err(_) => {
            warn!("{} retrieval timed out", which);
            Err(Error::timeout(format!("{} retrieval timed out", which)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rice_bus::InProcessBus;
    use rice_core::config::{BusConfig, MlConfig};
    use rice_core::protocol::SearchFilter;
    use rice_core::{id, Chunk, EmbeddedChunk, StoreConfig};
    use rice_ml::MlService;
    use rice_vector::InMemoryStore;

    const DIM: usize = 32;

    fn test_store() -> Store {
        Store {
            name: "default".to_string(),
            config: StoreConfig {
                dense_dimension: DIM,
                ..StoreConfig::default()
            },
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        service: SearchService,
        ml: Arc<MlService>,
        vector_store: Arc<InMemoryStore>,
        store: Store,
        _guards: Vec<rice_bus::HandlerGuard>,
    }

    async fn fixture() -> Fixture {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        let ml = Arc::new(MlService::new(MlConfig {
            dense_dimension: DIM,
            ..MlConfig::default()
        }));
        let guards = ml.register_handlers(bus.clone());

        let vector_store = Arc::new(InMemoryStore::new());
        let store = test_store();
        vector_store
            .ensure_collection(&store.name, DIM)
            .await
            .unwrap();

        let service = SearchService::new(
            bus,
            vector_store.clone(),
            Some(ml.clone()),
            SearchTuning::from(&SearchConfig::default()),
        );
        Fixture {
            service,
            ml,
            vector_store,
            store,
            _guards: guards,
        }
    }

    async fn seed_chunk(fixture: &Fixture, path: &str, line: u32, content: &str, connection: Option<&str>) {
        let texts = vec![content.to_string()];
        let dense = fixture.ml.embed_texts(&texts).await.unwrap().remove(0);
        let sparse = fixture.ml.sparse_texts(&texts).await.unwrap().remove(0);
        let chunk = Chunk {
            id: id::chunk_id(&fixture.store.name, path, line, line),
            document_id: id::document_id(path),
            store: fixture.store.name.clone(),
            path: path.to_string(),
            language: "go".to_string(),
            content: content.to_string(),
            symbols: vec![],
            start_line: line,
            end_line: line,
            start_offset: 0,
            end_offset: content.len(),
            token_count: content.split_whitespace().count(),
            document_hash: id::content_hash(content.as_bytes()),
            indexed_at: Utc::now(),
            connection_id: connection.map(str::to_string),
        };
        fixture
            .vector_store
            .upsert_chunks(
                &fixture.store.name,
                &[EmbeddedChunk::new(chunk, dense, sparse).unwrap()],
            )
            .await
            .unwrap();
    }

    fn request(query: &str, top_k: usize) -> SearchRequest {
        let mut request = SearchRequest::query(query);
        request.top_k = top_k;
        request.options.enable_reranking = false;
        request
    }

    #[tokio::test]
    async fn test_lexical_match_found() {
        let fixture = fixture().await;
        seed_chunk(&fixture, "a.go", 3, "func Hello() string { return \"hi\" }", None).await;
        seed_chunk(&fixture, "b.go", 1, "func Unrelated() int { return 0 }", None).await;

        let response = fixture
            .service
            .search(&fixture.store, request("hello", 5), &RequestContext::new())
            .await
            .unwrap();

        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].path, "a.go");
        assert_eq!(response.results[0].start_line, 3);
        assert!(!response.reranking_applied);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let fixture = fixture().await;
        let err = fixture
            .service
            .search(&fixture.store, request("  ", 5), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_top_k_zero_rejected() {
        let fixture = fixture().await;
        let err = fixture
            .service
            .search(&fixture.store, request("hello", 0), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_results_bounded_by_top_k() {
        let fixture = fixture().await;
        for i in 0..10 {
            seed_chunk(
                &fixture,
                &format!("file{}.go", i),
                1,
                &format!("func Shared() int {{ return {} }}", i),
                None,
            )
            .await;
        }

        let response = fixture
            .service
            .search(&fixture.store, request("shared", 3), &RequestContext::new())
            .await
            .unwrap();
        assert!(response.results.len() <= 3);
        assert!(response.total_candidates >= 3);
    }

    #[tokio::test]
    async fn test_connection_scoping_rules() {
        let fixture = fixture().await;
        seed_chunk(&fixture, "a.go", 1, "func Scoped() {}", Some("c1")).await;
        seed_chunk(&fixture, "b.go", 1, "func Scoped() {}", Some("c2")).await;

        // transport scope applies by default
        let ctx = RequestContext::with_connection("c1");
        let response = fixture
            .service
            .search(&fixture.store, request("scoped", 10), &ctx)
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].connection_id.as_deref(), Some("c1"));

        // "*" clears scoping
        let mut unscoped = request("scoped", 10);
        unscoped.filter = SearchFilter {
            connection_id: Some("*".to_string()),
            ..SearchFilter::default()
        };
        let response = fixture
            .service
            .search(&fixture.store, unscoped, &ctx)
            .await
            .unwrap();
        assert_eq!(response.results.len(), 2);

        // explicit filter value wins over transport
        let mut explicit = request("scoped", 10);
        explicit.filter = SearchFilter {
            connection_id: Some("c2".to_string()),
            ..SearchFilter::default()
        };
        let response = fixture
            .service
            .search(&fixture.store, explicit, &ctx)
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].connection_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_determinism_without_reranking() {
        let fixture = fixture().await;
        for i in 0..5 {
            seed_chunk(
                &fixture,
                &format!("f{}.go", i),
                1,
                &format!("func Handler{}() error {{ return process({}) }}", i, i),
                None,
            )
            .await;
        }

        let ids = |response: &SearchResponse| {
            response
                .results
                .iter()
                .map(|hit| hit.chunk_id.clone())
                .collect::<Vec<_>>()
        };
        let first = fixture
            .service
            .search(&fixture.store, request("handler process", 5), &RequestContext::new())
            .await
            .unwrap();
        let second = fixture
            .service
            .search(&fixture.store, request("handler process", 5), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_weights_flip_ordering() {
        let fixture = fixture().await;
        // lexical match shares the query token, semantic twin does not
        seed_chunk(&fixture, "lexical.go", 1, "func ParseTimeout() {}", None).await;
        seed_chunk(&fixture, "other.go", 1, "func Connect() {}", None).await;

        let mut sparse_only = request("ParseTimeout", 5);
        sparse_only.options.sparse_weight = 1.0;
        sparse_only.options.dense_weight = 0.0;
        let response = fixture
            .service
            .search(&fixture.store, sparse_only, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(response.results[0].path, "lexical.go");
    }

    #[tokio::test]
    async fn test_reranking_applied_with_fallback_head() {
        let fixture = fixture().await;
        seed_chunk(&fixture, "a.go", 1, "func RetryBackoff() {}", None).await;
        seed_chunk(&fixture, "b.go", 1, "func Unrelated() {}", None).await;

        let mut reranked = request("retry backoff", 5);
        reranked.options.enable_reranking = true;
        let response = fixture
            .service
            .search(&fixture.store, reranked, &RequestContext::new())
            .await
            .unwrap();
        assert!(response.reranking_applied);
        assert!(response.rerank_passes >= 1);
        assert_eq!(response.results[0].path, "a.go");
        assert!(response.results[0].rerank_score.is_some());
    }

    #[tokio::test]
    async fn test_canceled_search_returns_no_partial_results() {
        let fixture = fixture().await;
        seed_chunk(&fixture, "a.go", 1, "func Hello() {}", None).await;

        let ctx = RequestContext::new();
        ctx.cancel.cancel();
        let err = fixture
            .service
            .search(&fixture.store, request("hello", 5), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_parsed_query_echoed() {
        let fixture = fixture().await;
        seed_chunk(&fixture, "a.go", 1, "func Login() {}", None).await;

        let response = fixture
            .service
            .search(&fixture.store, request("find auth login", 5), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(response.parsed_query.original, "find auth login");
        assert!(response
            .parsed_query
            .code_terms
            .contains(&"auth".to_string()));
    }
}
