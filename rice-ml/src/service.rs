//! The ML service: head ownership, caching, and bus handlers.

use crate::cache::HeadCache;
use crate::embedder::EmbedHead;
use crate::reranker::RerankHead;
use crate::session::Device;
use crate::sparse::SparseHead;
use async_trait::async_trait;
use rice_bus::{spawn_handler, topics, BusMessage, EventBus, HandlerGuard};
use rice_core::config::MlConfig;
use rice_core::protocol::{
    BusErrorResponse, EmbedRequest, EmbedResponse, RerankRequest, RerankResponse,
    SparseEncodeRequest, SparseEncodeResponse,
};
use rice_core::{DenseVector, Error, MlBackend, Result, SparseVector};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Counters for ML monitoring.
#[derive(Debug, Default)]
pub struct MlMetrics {
    pub embed_requests: AtomicU64,
    pub sparse_requests: AtomicU64,
    pub rerank_requests: AtomicU64,
    pub texts_embedded: AtomicU64,
    pub pairs_scored: AtomicU64,
}

/// Health of one model head, including requested vs. effective device so
/// operators can detect silent CPU fallback.
#[derive(Debug, Clone, Serialize)]
pub struct HeadHealth {
    pub model: String,
    pub loaded: bool,
    pub fallback: bool,
    pub requested_device: Device,
    pub effective_device: Device,
    pub cache_entries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Health of the whole ML service.
#[derive(Debug, Clone, Serialize)]
pub struct MlServiceHealth {
    pub embed: HeadHealth,
    pub sparse: HeadHealth,
    pub rerank: HeadHealth,
}

impl MlServiceHealth {
    /// The service is usable when every head can answer requests.
    pub fn ok(&self) -> bool {
        self.embed.loaded && self.sparse.loaded && self.rerank.loaded
    }
}

/// Owns the three model heads and serves inference over the bus and the
/// [`MlBackend`] trait.
pub struct MlService {
    config: MlConfig,
    embedder: EmbedHead,
    sparse: SparseHead,
    reranker: RerankHead,
    embed_cache: HeadCache<DenseVector>,
    sparse_cache: HeadCache<SparseVector>,
    metrics: MlMetrics,
}

impl MlService {
    /// Load all heads. Missing models fall back to deterministic hash
    /// heads unless `allow_fallback` is off.
    pub fn new(config: MlConfig) -> Self {
        info!(
            embed = %config.embed.model_name,
            sparse = %config.sparse.model_name,
            rerank = %config.rerank.model_name,
            "initializing ML service"
        );

        let embedder = EmbedHead::load(&config.embed, config.dense_dimension);
        let sparse = SparseHead::load(&config.sparse, config.sparse_top_k);
        let reranker = RerankHead::load(&config.rerank);

        let embed_cache = HeadCache::new("embed", config.embed.model_name.clone(), config.cache_capacity);
        let sparse_cache =
            HeadCache::new("sparse", config.sparse.model_name.clone(), config.cache_capacity);

        Self {
            config,
            embedder,
            sparse,
            reranker,
            embed_cache,
            sparse_cache,
            metrics: MlMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &MlMetrics {
        &self.metrics
    }

    pub fn dense_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn check_head(&self, head: &str, fallback: bool) -> Result<()> {
        if fallback && !self.config.allow_fallback {
            return Err(Error::model_not_available(format!(
                "{} model is not loaded and fallback is disabled",
                head
            )));
        }
        Ok(())
    }

    /// Dense embeddings with cache-aware batching: hits are served from
    /// the cache, only misses run inference, output order matches input.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<DenseVector>> {
        self.check_head("embed", self.embedder.is_fallback())?;
        self.metrics.embed_requests.fetch_add(1, Ordering::Relaxed);

        let cached = self.embed_cache.get_many(texts).await;
        let mut results: Vec<Option<DenseVector>> = cached
            .iter()
            .map(|hit| hit.as_ref().map(|v| v.as_ref().clone()))
            .collect();

        let miss_indexes: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !miss_indexes.is_empty() {
            let miss_texts: Vec<String> =
                miss_indexes.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&miss_texts, self.config.embed_batch_size)?;
            self.metrics
                .texts_embedded
                .fetch_add(vectors.len() as u64, Ordering::Relaxed);

            for (&index, vector) in miss_indexes.iter().zip(vectors.into_iter()) {
                self.embed_cache.insert(&texts[index], vector.clone()).await;
                results[index] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Sparse encodings, cached at the same granularity as dense ones.
    pub async fn sparse_texts(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        self.check_head("sparse", self.sparse.is_fallback())?;
        self.metrics.sparse_requests.fetch_add(1, Ordering::Relaxed);

        let cached = self.sparse_cache.get_many(texts).await;
        let mut results: Vec<Option<SparseVector>> = cached
            .iter()
            .map(|hit| hit.as_ref().map(|v| v.as_ref().clone()))
            .collect();

        let miss_indexes: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !miss_indexes.is_empty() {
            let miss_texts: Vec<String> =
                miss_indexes.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self
                .sparse
                .encode_batch(&miss_texts, self.config.embed_batch_size)?;

            for (&index, vector) in miss_indexes.iter().zip(vectors.into_iter()) {
                self.sparse_cache.insert(&texts[index], vector.clone()).await;
                results[index] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Cross-encoder scores; pair inputs make caching ineffective, so this
    /// path always runs inference.
    pub async fn rerank_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        self.check_head("rerank", self.reranker.is_fallback())?;
        self.metrics.rerank_requests.fetch_add(1, Ordering::Relaxed);
        let scores =
            self.reranker
                .score_pairs(query, documents, self.config.rerank_batch_size)?;
        self.metrics
            .pairs_scored
            .fetch_add(scores.len() as u64, Ordering::Relaxed);
        Ok(scores)
    }

    /// Per-head health including requested vs. effective device.
    pub fn health(&self) -> MlServiceHealth {
        let head = |model: &str,
                    fallback: bool,
                    requested: Device,
                    effective: Device,
                    entries: u64,
                    hits: u64,
                    misses: u64| HeadHealth {
            model: model.to_string(),
            loaded: !fallback || self.config.allow_fallback,
            fallback,
            requested_device: requested,
            effective_device: effective,
            cache_entries: entries,
            cache_hits: hits,
            cache_misses: misses,
        };
        MlServiceHealth {
            embed: head(
                self.embedder.model_name(),
                self.embedder.is_fallback(),
                self.embedder.requested_device(),
                self.embedder.effective_device(),
                self.embed_cache.entry_count(),
                self.embed_cache.hits(),
                self.embed_cache.misses(),
            ),
            sparse: head(
                self.sparse.model_name(),
                self.sparse.is_fallback(),
                self.sparse.requested_device(),
                self.sparse.effective_device(),
                self.sparse_cache.entry_count(),
                self.sparse_cache.hits(),
                self.sparse_cache.misses(),
            ),
            rerank: head(
                self.reranker.model_name(),
                self.reranker.is_fallback(),
                self.reranker.requested_device(),
                self.reranker.effective_device(),
                0,
                0,
                0,
            ),
        }
    }

    /// Register the three request handlers on the bus. Each handler
    /// answers on the matching response topic, preserving the correlation
    /// id and reporting latency measured from handler entry to publish.
    pub fn register_handlers(self: &Arc<Self>, bus: Arc<dyn EventBus>) -> Vec<HandlerGuard> {
        let embed_guard = {
            let service = self.clone();
            let bus_out = bus.clone();
            spawn_handler(bus.clone(), topics::ML_EMBED_REQUEST, move |message| {
                let service = service.clone();
                let bus_out = bus_out.clone();
                async move {
                    let started = Instant::now();
                    let reply = match message.decode::<EmbedRequest>() {
                        Ok(request) => match service.embed_texts(&request.texts).await {
                            Ok(vectors) => message.reply(&EmbedResponse {
                                vectors,
                                model: service.embedder.model_name().to_string(),
                                latency_ms: started.elapsed().as_millis() as u64,
                            }),
                            Err(e) => message.reply(&BusErrorResponse {
                                error: e.to_string(),
                            }),
                        },
                        Err(e) => message.reply(&BusErrorResponse {
                            error: format!("malformed embed request: {}", e),
                        }),
                    };
                    publish_reply(&bus_out, reply).await;
                }
            })
        };

        let sparse_guard = {
            let service = self.clone();
            let bus_out = bus.clone();
            spawn_handler(bus.clone(), topics::ML_SPARSE_REQUEST, move |message| {
                let service = service.clone();
                let bus_out = bus_out.clone();
                async move {
                    let started = Instant::now();
                    let reply = match message.decode::<SparseEncodeRequest>() {
                        Ok(request) => match service.sparse_texts(&request.texts).await {
                            Ok(vectors) => message.reply(&SparseEncodeResponse {
                                vectors,
                                model: service.sparse.model_name().to_string(),
                                latency_ms: started.elapsed().as_millis() as u64,
                            }),
                            Err(e) => message.reply(&BusErrorResponse {
                                error: e.to_string(),
                            }),
                        },
                        Err(e) => message.reply(&BusErrorResponse {
                            error: format!("malformed sparse request: {}", e),
                        }),
                    };
                    publish_reply(&bus_out, reply).await;
                }
            })
        };

        let rerank_guard = {
            let service = self.clone();
            let bus_out = bus.clone();
            spawn_handler(bus.clone(), topics::ML_RERANK_REQUEST, move |message| {
                let service = service.clone();
                let bus_out = bus_out.clone();
                async move {
                    let started = Instant::now();
                    let reply = match message.decode::<RerankRequest>() {
                        Ok(request) => match service
                            .rerank_pairs(&request.query, &request.documents)
                            .await
                        {
                            Ok(scores) => message.reply(&RerankResponse {
                                scores,
                                model: service.reranker.model_name().to_string(),
                                latency_ms: started.elapsed().as_millis() as u64,
                            }),
                            Err(e) => message.reply(&BusErrorResponse {
                                error: e.to_string(),
                            }),
                        },
                        Err(e) => message.reply(&BusErrorResponse {
                            error: format!("malformed rerank request: {}", e),
                        }),
                    };
                    publish_reply(&bus_out, reply).await;
                }
            })
        };

        info!("ML bus handlers registered");
        vec![embed_guard, sparse_guard, rerank_guard]
    }
}

async fn publish_reply(bus: &Arc<dyn EventBus>, reply: Result<BusMessage>) {
    match reply {
        Ok(message) => {
            if let Err(e) = bus.publish(message).await {
                warn!("failed to publish ML response: {}", e);
            }
        }
        Err(e) => warn!("failed to build ML response: {}", e),
    }
}

#[async_trait]
impl MlBackend for MlService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<DenseVector>> {
        self.embed_texts(texts).await
    }

    async fn encode_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        self.sparse_texts(texts).await
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        self.rerank_pairs(query, documents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rice_bus::InProcessBus;
    use rice_core::config::BusConfig;
    use std::time::Duration;

    fn fallback_config() -> MlConfig {
        MlConfig {
            dense_dimension: 32,
            ..MlConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_orders_match_and_cache_fills() {
        let service = MlService::new(fallback_config());
        let texts = vec!["one".to_string(), "two".to_string(), "one".to_string()];

        let vectors = service.embed_texts(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);

        // second call should be all cache hits
        let before = service.embed_cache.hits();
        service.embed_texts(&texts).await.unwrap();
        assert!(service.embed_cache.hits() >= before + 3);
    }

    #[tokio::test]
    async fn test_fallback_disabled_yields_model_not_available() {
        let config = MlConfig {
            allow_fallback: false,
            ..fallback_config()
        };
        let service = MlService::new(config);
        let err = service
            .embed_texts(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_health_reports_fallback_heads() {
        let service = MlService::new(fallback_config());
        let health = service.health();
        assert!(health.ok());
        assert!(health.embed.fallback);
        assert_eq!(health.embed.requested_device, Device::Cpu);
        assert_eq!(health.embed.effective_device, Device::Cpu);
    }

    #[tokio::test]
    async fn test_bus_roundtrip_embed() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        let service = Arc::new(MlService::new(fallback_config()));
        let _guards = service.register_handlers(bus.clone());

        let request = BusMessage::request(
            topics::ML_EMBED_REQUEST,
            &EmbedRequest {
                texts: vec!["hello".to_string()],
            },
        )
        .unwrap();
        let response = bus
            .request(request, Duration::from_secs(5))
            .await
            .unwrap();
        let decoded: EmbedResponse = response.decode().unwrap();
        assert_eq!(decoded.vectors.len(), 1);
        assert_eq!(decoded.vectors[0].len(), 32);
    }

    #[tokio::test]
    async fn test_bus_roundtrip_rerank() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        let service = Arc::new(MlService::new(fallback_config()));
        let _guards = service.register_handlers(bus.clone());

        let request = BusMessage::request(
            topics::ML_RERANK_REQUEST,
            &RerankRequest {
                query: "hello".to_string(),
                documents: vec!["hello world".to_string(), "goodbye".to_string()],
            },
        )
        .unwrap();
        let response = bus
            .request(request, Duration::from_secs(5))
            .await
            .unwrap();
        let decoded: RerankResponse = response.decode().unwrap();
        assert_eq!(decoded.scores.len(), 2);
        assert!(decoded.scores[0] > decoded.scores[1]);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        let service = Arc::new(MlService::new(fallback_config()));
        let _guards = service.register_handlers(bus.clone());

        let request = BusMessage::request(
            topics::ML_EMBED_REQUEST,
            &serde_json::json!({ "wrong": "shape" }),
        )
        .unwrap();
        let response = bus
            .request(request, Duration::from_secs(5))
            .await
            .unwrap();
        let decoded: BusErrorResponse = response.decode().unwrap();
        assert!(decoded.error.contains("malformed"));
    }
}
