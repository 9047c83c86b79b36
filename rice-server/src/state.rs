//! Application state: component wiring and process lifecycle.

use crate::connections::ConnectionRegistry;
use crate::settings::SettingsService;
use crate::stores::StoreService;
use parking_lot::Mutex;
use rice_bus::{spawn_handler, topics, BusMetrics, EventBus, HandlerGuard, InProcessBus};
use rice_core::config::RiceConfig;
use rice_core::protocol::{BusErrorResponse, IndexRequest, SearchRequest};
use rice_core::{Result, DEFAULT_STORE};
use rice_index::pipeline::IndexingPipeline;
use rice_ml::MlService;
use rice_search::{RequestContext, SearchService};
use rice_vector::{InMemoryStore, QdrantStore, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Envelope for search requests arriving over the bus instead of HTTP.
#[derive(Debug, Serialize, Deserialize)]
struct BusSearchEnvelope {
    #[serde(default)]
    store: Option<String>,
    request: SearchRequest,
    #[serde(default)]
    connection_id: Option<String>,
}

/// Envelope for index requests arriving over the bus.
#[derive(Debug, Serialize, Deserialize)]
struct BusIndexEnvelope {
    #[serde(default)]
    store: Option<String>,
    request: IndexRequest,
    #[serde(default)]
    connection_id: Option<String>,
}

/// Everything the HTTP layer needs, plus lifecycle state.
pub struct AppState {
    pub config: RiceConfig,
    bus: Arc<InProcessBus>,
    bus_dyn: Arc<dyn EventBus>,
    pub ml: Arc<MlService>,
    pub vector_store: Arc<dyn VectorStore>,
    pub stores: Arc<StoreService>,
    pub settings: Arc<SettingsService>,
    pub connections: Arc<ConnectionRegistry>,
    pub search: Arc<SearchService>,
    pub pipeline: Arc<IndexingPipeline>,
    guards: Mutex<Vec<HandlerGuard>>,
    monitor: Mutex<Option<tokio::task::JoinHandle<()>>>,
    ready: AtomicBool,
    in_flight: AtomicU64,
    started_at: Instant,
}

impl AppState {
    /// Wire up every component from configuration.
    pub async fn new(config: RiceConfig) -> Result<Arc<Self>> {
        let bus = Arc::new(InProcessBus::new(config.bus.clone()));
        let bus_dyn: Arc<dyn EventBus> = bus.clone();

        // ML service + bus handlers
        let ml = Arc::new(MlService::new(config.ml.clone()));
        let mut guards = ml.register_handlers(bus_dyn.clone());

        // Vector store backend
        let vector_store: Arc<dyn VectorStore> = if config.qdrant.in_memory {
            info!("using embedded in-memory vector store");
            Arc::new(InMemoryStore::new())
        } else {
            Arc::new(
                QdrantStore::new(config.qdrant.clone(), config.index.upsert_batch_size).await?,
            )
        };

        // Services
        let settings = Arc::new(SettingsService::new(&config, bus_dyn.clone())?);
        let stores = Arc::new(StoreService::new(
            &config.server.data_dir,
            vector_store.clone(),
            bus_dyn.clone(),
            rice_core::StoreConfig {
                embed_model: config.ml.embed.model_name.clone(),
                sparse_model: config.ml.sparse.model_name.clone(),
                dense_dimension: config.ml.dense_dimension,
                chunk_size: config.index.chunk_size,
                chunk_overlap: config.index.chunk_overlap,
            },
        )?);
        let connections = Arc::new(ConnectionRegistry::new(
            &config.server.data_dir,
            bus_dyn.clone(),
        )?);

        let search = Arc::new(SearchService::new(
            bus_dyn.clone(),
            vector_store.clone(),
            Some(ml.clone()),
            settings.search_tuning(),
        ));
        let pipeline = Arc::new(IndexingPipeline::new(
            settings.index_config(),
            vector_store.clone(),
            bus_dyn.clone(),
            Some(ml.clone()),
            Duration::from_secs(config.search.ml_timeout_secs),
        ));

        // the default store always exists
        stores.resolve(DEFAULT_STORE).await?;

        // Hot reload: swap consumer snapshots on settings.changed.
        guards.push(Self::spawn_settings_listener(
            bus_dyn.clone(),
            settings.clone(),
            search.clone(),
            pipeline.clone(),
        ));
        // Bus bindings for search.request / index.request.
        guards.push(Self::spawn_search_bridge(
            bus_dyn.clone(),
            stores.clone(),
            search.clone(),
        ));
        guards.push(Self::spawn_index_bridge(
            bus_dyn.clone(),
            stores.clone(),
            pipeline.clone(),
        ));

        let monitor = connections.spawn_monitor();

        let state = Arc::new(Self {
            config,
            bus,
            bus_dyn,
            ml,
            vector_store,
            stores,
            settings,
            connections,
            search,
            pipeline,
            guards: Mutex::new(guards),
            monitor: Mutex::new(Some(monitor)),
            ready: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            started_at: Instant::now(),
        });

        info!("application state initialized");
        Ok(state)
    }

    fn spawn_settings_listener(
        bus: Arc<dyn EventBus>,
        settings: Arc<SettingsService>,
        search: Arc<SearchService>,
        pipeline: Arc<IndexingPipeline>,
    ) -> HandlerGuard {
        spawn_handler(bus, topics::SETTINGS_CHANGED, move |_message| {
            let settings = settings.clone();
            let search = search.clone();
            let pipeline = pipeline.clone();
            async move {
                search.apply_tuning(settings.search_tuning());
                pipeline.apply_config(settings.index_config());
                info!(version = settings.version(), "settings refreshed");
            }
        })
    }

    fn spawn_search_bridge(
        bus: Arc<dyn EventBus>,
        stores: Arc<StoreService>,
        search: Arc<SearchService>,
    ) -> HandlerGuard {
        let bus_out = bus.clone();
        spawn_handler(bus, topics::SEARCH_REQUEST, move |message| {
            let bus_out = bus_out.clone();
            let stores = stores.clone();
            let search = search.clone();
            async move {
                let reply = match message.decode::<BusSearchEnvelope>() {
                    Ok(envelope) => {
                        let store_name =
                            envelope.store.as_deref().unwrap_or(DEFAULT_STORE).to_string();
                        let mut ctx = RequestContext::new();
                        ctx.connection_id = envelope.connection_id;
                        match stores.resolve(&store_name).await {
                            Ok(store) => {
                                match search.search(&store, envelope.request, &ctx).await {
                                    Ok(response) => message.reply(&response),
                                    Err(e) => message.reply(&BusErrorResponse {
                                        error: e.to_string(),
                                    }),
                                }
                            }
                            Err(e) => message.reply(&BusErrorResponse {
                                error: e.to_string(),
                            }),
                        }
                    }
                    Err(e) => message.reply(&BusErrorResponse {
                        error: format!("malformed search request: {}", e),
                    }),
                };
                if let Ok(reply) = reply {
                    if let Err(e) = bus_out.publish(reply).await {
                        warn!("search response publish failed: {}", e);
                    }
                }
            }
        })
    }

    fn spawn_index_bridge(
        bus: Arc<dyn EventBus>,
        stores: Arc<StoreService>,
        pipeline: Arc<IndexingPipeline>,
    ) -> HandlerGuard {
        let bus_out = bus.clone();
        spawn_handler(bus, topics::INDEX_REQUEST, move |message| {
            let bus_out = bus_out.clone();
            let stores = stores.clone();
            let pipeline = pipeline.clone();
            async move {
                let reply = match message.decode::<BusIndexEnvelope>() {
                    Ok(envelope) => {
                        let store_name =
                            envelope.store.as_deref().unwrap_or(DEFAULT_STORE).to_string();
                        let cancel = tokio_util::sync::CancellationToken::new();
                        match stores.resolve(&store_name).await {
                            Ok(store) => match pipeline
                                .index(&store, envelope.request, envelope.connection_id, &cancel)
                                .await
                            {
                                Ok(result) => message.reply(&result),
                                Err(e) => message.reply(&BusErrorResponse {
                                    error: e.to_string(),
                                }),
                            },
                            Err(e) => message.reply(&BusErrorResponse {
                                error: e.to_string(),
                            }),
                        }
                    }
                    Err(e) => message.reply(&BusErrorResponse {
                        error: format!("malformed index request: {}", e),
                    }),
                };
                if let Ok(reply) = reply {
                    if let Err(e) = bus_out.publish(reply).await {
                        warn!("index response publish failed: {}", e);
                    }
                }
            }
        })
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus_dyn.clone()
    }

    pub fn bus_metrics(&self) -> &BusMetrics {
        self.bus.metrics()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// RAII in-flight tracker used by the HTTP middleware.
    pub fn track_request(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { state: self.clone() }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Deep readiness: vector store reachable and every ML head usable.
    pub async fn readiness(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let vector_ok = self
            .vector_store
            .health()
            .await
            .map(|health| health.ok)
            .unwrap_or(false);
        vector_ok && self.ml.health().ok()
    }

    /// Graceful shutdown: readiness off, drain in-flight requests up to
    /// the grace deadline, then close the bus, ML handlers and monitor in
    /// LIFO order.
    pub async fn shutdown(&self) {
        info!("shutdown requested");
        self.set_ready(false);

        let deadline = Instant::now() + Duration::from_secs(self.config.server.shutdown_grace_secs);
        while self.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let drained = self.in_flight() == 0;
        if !drained {
            warn!(
                remaining = self.in_flight(),
                "grace period expired with requests in flight"
            );
        }

        self.bus.close();
        self.guards.lock().clear();
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }

        info!(drained, "shutdown complete");
    }
}

/// Decrements the in-flight counter when the request finishes.
pub struct InFlightGuard {
    state: Arc<AppState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
