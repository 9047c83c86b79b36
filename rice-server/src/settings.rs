//! Runtime-mutable settings with versioning, audit trail and hot reload.
//!
//! Values layer over the process configuration: the registry's defaults
//! are seeded from [`RiceConfig`] (which already folded in the `RICE_*`
//! environment), and admin-persisted values from `settings.yaml` sit on
//! top. Every mutation is validated, persisted atomically (temp file +
//! rename), appended to the audit log, and announced on the bus.

use chrono::Utc;
use parking_lot::RwLock;
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::config::{IndexConfig, RiceConfig};
use rice_core::protocol::{SettingChange, SettingsChangedEvent};
use rice_core::{Error, Result};
use rice_search::SearchTuning;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Value shape and bounds for one setting.
#[derive(Debug, Clone)]
enum Validator {
    Bool,
    UInt { min: u64, max: u64 },
    Float { min: f64, max: f64 },
    Str,
}

impl Validator {
    fn check(&self, key: &str, value: &Value) -> Result<()> {
        let fail = |expected: &str| {
            Err(Error::validation(format!(
                "setting '{}' expects {}, got {}",
                key, expected, value
            )))
        };
        match self {
            Validator::Bool => {
                if !value.is_boolean() {
                    return fail("a boolean");
                }
            }
            Validator::UInt { min, max } => match value.as_u64() {
                Some(v) if v >= *min && v <= *max => {}
                _ => return fail(&format!("an integer within {}..={}", min, max)),
            },
            Validator::Float { min, max } => match value.as_f64() {
                Some(v) if v >= *min && v <= *max && v.is_finite() => {}
                _ => return fail(&format!("a number within {}..={}", min, max)),
            },
            Validator::Str => {
                if !value.is_string() {
                    return fail("a string");
                }
            }
        }
        Ok(())
    }
}

struct SettingDef {
    key: &'static str,
    default: Value,
    validator: Validator,
}

fn uint(key: &'static str, default: u64, min: u64, max: u64) -> SettingDef {
    SettingDef {
        key,
        default: json!(default),
        validator: Validator::UInt { min, max },
    }
}

fn float(key: &'static str, default: f64, min: f64, max: f64) -> SettingDef {
    SettingDef {
        key,
        default: json!(default),
        validator: Validator::Float { min, max },
    }
}

fn boolean(key: &'static str, default: bool) -> SettingDef {
    SettingDef {
        key,
        default: json!(default),
        validator: Validator::Bool,
    }
}

fn string(key: &'static str, default: &str) -> SettingDef {
    SettingDef {
        key,
        default: json!(default),
        validator: Validator::Str,
    }
}

/// Full registry, seeded from the process configuration. Keys marked
/// structural in the docs (models, dimensions, bind address) still live
/// here so they are visible and audited; applying them requires a
/// restart or store recreation.
fn registry(config: &RiceConfig) -> Vec<SettingDef> {
    vec![
        // server
        string("server.host", &config.server.host),
        uint("server.port", config.server.port as u64, 1, 65535),
        uint("server.http_timeout_secs", config.server.http_timeout_secs, 1, 600),
        uint("server.shutdown_grace_secs", config.server.shutdown_grace_secs, 1, 600),
        // qdrant
        string("qdrant.url", &config.qdrant.url),
        string("qdrant.collection_prefix", &config.qdrant.collection_prefix),
        uint("qdrant.timeout_secs", config.qdrant.timeout_secs, 1, 300),
        uint("qdrant.max_retries", config.qdrant.max_retries as u64, 0, 10),
        boolean("qdrant.in_memory", config.qdrant.in_memory),
        // ml
        string("ml.embed.model", &config.ml.embed.model_name),
        string("ml.sparse.model", &config.ml.sparse.model_name),
        string("ml.rerank.model", &config.ml.rerank.model_name),
        boolean("ml.embed.use_gpu", config.ml.embed.use_gpu),
        boolean("ml.sparse.use_gpu", config.ml.sparse.use_gpu),
        boolean("ml.rerank.use_gpu", config.ml.rerank.use_gpu),
        uint("ml.embed.max_seq_length", config.ml.embed.max_seq_length as u64, 16, 32768),
        uint("ml.sparse.max_seq_length", config.ml.sparse.max_seq_length as u64, 16, 32768),
        uint("ml.rerank.max_seq_length", config.ml.rerank.max_seq_length as u64, 16, 32768),
        uint("ml.dense_dimension", config.ml.dense_dimension as u64, 8, 8192),
        uint("ml.embed_batch_size", config.ml.embed_batch_size as u64, 1, 1024),
        uint("ml.rerank_batch_size", config.ml.rerank_batch_size as u64, 1, 1024),
        uint("ml.cache_capacity", config.ml.cache_capacity, 0, 10_000_000),
        uint("ml.sparse_top_k", config.ml.sparse_top_k as u64, 8, 4096),
        boolean("ml.allow_fallback", config.ml.allow_fallback),
        // index
        uint("index.chunk_size", config.index.chunk_size as u64, 32, 4096),
        uint("index.chunk_overlap", config.index.chunk_overlap as u64, 0, 1024),
        uint("index.min_chunk_tokens", config.index.min_chunk_tokens as u64, 1, 512),
        uint("index.max_chunk_tokens", config.index.max_chunk_tokens as u64, 64, 16384),
        uint("index.max_file_size", config.index.max_file_size as u64, 1024, 100 * 1024 * 1024),
        uint("index.workers", config.index.workers as u64, 1, 64),
        uint("index.upsert_batch_size", config.index.upsert_batch_size as u64, 1, 4096),
        uint("index.file_timeout_secs", config.index.file_timeout_secs, 1, 3600),
        uint("index.request_timeout_secs", config.index.request_timeout_secs, 1, 86400),
        // search
        uint("search.default_top_k", config.search.default_top_k as u64, 1, 1000),
        uint("search.max_top_k", config.search.max_top_k as u64, 1, 1000),
        float("search.sparse_weight", config.search.sparse_weight as f64, 0.0, 1.0),
        float("search.dense_weight", config.search.dense_weight as f64, 0.0, 1.0),
        float("search.rrf_k", config.search.rrf_k as f64, 1.0, 1000.0),
        boolean("search.enable_reranking", config.search.enable_reranking),
        uint("search.rerank_top_k", config.search.rerank_top_k as u64, 1, 1000),
        float(
            "search.rerank_confidence_margin",
            config.search.rerank_confidence_margin as f64,
            0.0,
            1.0,
        ),
        boolean("search.enable_second_pass", config.search.enable_second_pass),
        boolean("search.enable_dedup", config.search.enable_dedup),
        float("search.dedup_threshold", config.search.dedup_threshold as f64, 0.0, 1.0),
        boolean("search.enable_diversity", config.search.enable_diversity),
        float("search.mmr_lambda", config.search.mmr_lambda as f64, 0.0, 1.0),
        uint("search.timeout_secs", config.search.timeout_secs, 1, 600),
        uint("search.ml_timeout_secs", config.search.ml_timeout_secs, 1, 600),
        uint(
            "search.retrieval_timeout_secs",
            config.search.retrieval_timeout_secs,
            1,
            600,
        ),
        // bus
        uint("bus.channel_capacity", config.bus.channel_capacity as u64, 1, 1_000_000),
        uint("bus.publish_timeout_secs", config.bus.publish_timeout_secs, 0, 60),
        uint("bus.request_timeout_secs", config.bus.request_timeout_secs, 1, 600),
    ]
}

struct Snapshot {
    values: BTreeMap<String, Value>,
    version: u64,
}

/// The settings service (C6).
pub struct SettingsService {
    definitions: HashMap<&'static str, Validator>,
    state: RwLock<Arc<Snapshot>>,
    bus: Arc<dyn EventBus>,
    settings_path: PathBuf,
    audit_path: PathBuf,
}

impl SettingsService {
    /// Build from process config, overlaying a persisted `settings.yaml`
    /// when present. Unknown or invalid persisted keys are dropped with a
    /// warning rather than failing startup.
    pub fn new(config: &RiceConfig, bus: Arc<dyn EventBus>) -> Result<Self> {
        let data_dir = &config.server.data_dir;
        std::fs::create_dir_all(data_dir)?;

        let mut values = BTreeMap::new();
        let mut definitions = HashMap::new();
        for def in registry(config) {
            values.insert(def.key.to_string(), def.default.clone());
            definitions.insert(def.key, def.validator);
        }

        let settings_path = data_dir.join("settings.yaml");
        if settings_path.exists() {
            let raw = std::fs::read_to_string(&settings_path)?;
            match serde_yaml::from_str::<BTreeMap<String, Value>>(&raw) {
                Ok(persisted) => {
                    for (key, value) in persisted {
                        match definitions.get(key.as_str()) {
                            Some(validator) if validator.check(&key, &value).is_ok() => {
                                values.insert(key, value);
                            }
                            Some(_) => warn!(key, "ignoring invalid persisted setting"),
                            None => warn!(key, "ignoring unknown persisted setting"),
                        }
                    }
                }
                Err(e) => warn!("settings.yaml unreadable, using defaults: {}", e),
            }
        }

        info!(
            count = values.len(),
            path = %settings_path.display(),
            "settings service ready"
        );

        Ok(Self {
            definitions,
            state: RwLock::new(Arc::new(Snapshot { values, version: 0 })),
            bus,
            settings_path,
            audit_path: data_dir.join("settings-audit.log"),
        })
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Current value of a key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().values.get(key).cloned()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Set one key: validate, persist, audit, bump version, announce.
    pub async fn set(&self, key: &str, value: Value) -> Result<u64> {
        let validator = self
            .definitions
            .get(key)
            .ok_or_else(|| Error::not_found("setting", key))?;
        validator.check(key, &value)?;

        let (version, change) = {
            let mut state = self.state.write();
            let old = state
                .values
                .get(key)
                .cloned()
                .unwrap_or(Value::Null);
            if old == value {
                return Ok(state.version);
            }
            let mut values = state.values.clone();
            values.insert(key.to_string(), value.clone());
            let version = state.version + 1;
            *state = Arc::new(Snapshot { values, version });
            (
                version,
                SettingChange {
                    key: key.to_string(),
                    old,
                    new: value,
                },
            )
        };

        self.persist()?;
        self.audit(&[change.clone()], version)?;
        self.announce(version, vec![change]).await;
        Ok(version)
    }

    /// Export every value.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.state.read().values.clone()
    }

    /// Atomic bulk import. All entries are validated before any is
    /// applied; subscribers receive one event describing the whole diff.
    pub async fn restore(&self, snapshot: BTreeMap<String, Value>) -> Result<u64> {
        for (key, value) in &snapshot {
            let validator = self
                .definitions
                .get(key.as_str())
                .ok_or_else(|| Error::not_found("setting", key.clone()))?;
            validator.check(key, value)?;
        }

        let (version, changes) = {
            let mut state = self.state.write();
            let mut values = state.values.clone();
            let mut changes = Vec::new();
            for (key, value) in snapshot {
                let old = values.get(&key).cloned().unwrap_or(Value::Null);
                if old != value {
                    changes.push(SettingChange {
                        key: key.clone(),
                        old,
                        new: value.clone(),
                    });
                    values.insert(key, value);
                }
            }
            if changes.is_empty() {
                return Ok(state.version);
            }
            let version = state.version + 1;
            *state = Arc::new(Snapshot { values, version });
            (version, changes)
        };

        self.persist()?;
        self.audit(&changes, version)?;
        self.announce(version, changes).await;
        Ok(version)
    }

    /// Write `settings.yaml` atomically via temp file + rename.
    fn persist(&self) -> Result<()> {
        let values = self.snapshot();
        let rendered = serde_yaml::to_string(&values)
            .map_err(|e| Error::internal(format!("settings serialization failed: {}", e)))?;

        let temp_path = self.settings_path.with_extension("yaml.tmp");
        {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(rendered.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.settings_path)?;
        Ok(())
    }

    /// Append one JSON line per change to the audit log.
    fn audit(&self, changes: &[SettingChange], version: u64) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)?;
        for change in changes {
            let line = json!({
                "ts": Utc::now().to_rfc3339(),
                "version": version,
                "key": change.key,
                "old": change.old,
                "new": change.new,
            });
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    async fn announce(&self, version: u64, changes: Vec<SettingChange>) {
        let event = SettingsChangedEvent { version, changes };
        match BusMessage::event(topics::SETTINGS_CHANGED, &event) {
            Ok(message) => {
                if let Err(e) = self.bus.publish(message).await {
                    warn!("settings.changed publish failed: {}", e);
                }
            }
            Err(e) => warn!("settings.changed encoding failed: {}", e),
        }
    }

    /// Resolve the search tuning consumers cache.
    pub fn search_tuning(&self) -> SearchTuning {
        let get_u = |key: &str, fallback: u64| self.get_u64(key).unwrap_or(fallback);
        let get_f = |key: &str, fallback: f64| self.get_f64(key).unwrap_or(fallback);
        let get_b = |key: &str, fallback: bool| self.get_bool(key).unwrap_or(fallback);
        SearchTuning {
            default_top_k: get_u("search.default_top_k", 20) as usize,
            max_top_k: get_u("search.max_top_k", 100) as usize,
            rrf_k: get_f("search.rrf_k", 60.0) as f32,
            rerank_confidence_margin: get_f("search.rerank_confidence_margin", 0.3) as f32,
            enable_second_pass: get_b("search.enable_second_pass", true),
            enable_dedup: get_b("search.enable_dedup", true),
            dedup_threshold: get_f("search.dedup_threshold", 0.85) as f32,
            enable_diversity: get_b("search.enable_diversity", true),
            mmr_lambda: get_f("search.mmr_lambda", 0.7) as f32,
            search_timeout: Duration::from_secs(get_u("search.timeout_secs", 10)),
            ml_timeout: Duration::from_secs(get_u("search.ml_timeout_secs", 30)),
            retrieval_timeout: Duration::from_secs(get_u("search.retrieval_timeout_secs", 10)),
        }
    }

    /// Resolve the indexing config consumers cache.
    pub fn index_config(&self) -> IndexConfig {
        let defaults = IndexConfig::default();
        let get_u = |key: &str, fallback: u64| self.get_u64(key).unwrap_or(fallback);
        IndexConfig {
            chunk_size: get_u("index.chunk_size", defaults.chunk_size as u64) as usize,
            chunk_overlap: get_u("index.chunk_overlap", defaults.chunk_overlap as u64) as usize,
            min_chunk_tokens: get_u("index.min_chunk_tokens", defaults.min_chunk_tokens as u64)
                as usize,
            max_chunk_tokens: get_u("index.max_chunk_tokens", defaults.max_chunk_tokens as u64)
                as usize,
            max_file_size: get_u("index.max_file_size", defaults.max_file_size as u64) as usize,
            workers: get_u("index.workers", defaults.workers as u64) as usize,
            upsert_batch_size: get_u("index.upsert_batch_size", defaults.upsert_batch_size as u64)
                as usize,
            file_timeout_secs: get_u("index.file_timeout_secs", defaults.file_timeout_secs),
            request_timeout_secs: get_u(
                "index.request_timeout_secs",
                defaults.request_timeout_secs,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rice_bus::InProcessBus;
    use rice_core::config::BusConfig;

    fn service(dir: &std::path::Path) -> SettingsService {
        let mut config = RiceConfig::default();
        config.server.data_dir = dir.to_path_buf();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        SettingsService::new(&config, bus).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let settings = service(dir.path());

        let before = settings.version();
        settings
            .set("search.default_top_k", json!(42))
            .await
            .unwrap();
        assert_eq!(settings.get_u64("search.default_top_k"), Some(42));
        assert_eq!(settings.version(), before + 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let settings = service(dir.path());

        assert!(settings
            .set("search.sparse_weight", json!(1.5))
            .await
            .is_err());
        assert!(settings
            .set("search.enable_reranking", json!("yes"))
            .await
            .is_err());
        assert!(settings.set("nonexistent.key", json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let settings = service(dir.path());
            settings.set("index.workers", json!(9)).await.unwrap();
        }
        let reloaded = service(dir.path());
        assert_eq!(reloaded.get_u64("index.workers"), Some(9));
        assert!(dir.path().join("settings-audit.log").exists());
    }

    #[tokio::test]
    async fn test_restore_of_snapshot_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let settings = service(dir.path());
        settings.set("search.mmr_lambda", json!(0.4)).await.unwrap();

        let snapshot = settings.snapshot();
        let version = settings.version();
        settings.restore(snapshot.clone()).await.unwrap();
        assert_eq!(settings.version(), version);
        assert_eq!(settings.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_restore_emits_single_event_with_diff() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RiceConfig::default();
        config.server.data_dir = dir.path().to_path_buf();
        let bus = Arc::new(InProcessBus::new(BusConfig::default()));
        let mut subscription = bus.subscribe(topics::SETTINGS_CHANGED);
        let settings =
            SettingsService::new(&config, bus.clone() as Arc<dyn EventBus>).unwrap();

        let mut snapshot = settings.snapshot();
        snapshot.insert("index.workers".to_string(), json!(2));
        snapshot.insert("search.default_top_k".to_string(), json!(7));
        settings.restore(snapshot).await.unwrap();

        let message = subscription.recv().await.unwrap();
        let event: SettingsChangedEvent = message.decode().unwrap();
        assert_eq!(event.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_search_tuning_reflects_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = service(dir.path());
        settings
            .set("search.dedup_threshold", json!(0.5))
            .await
            .unwrap();
        let tuning = settings.search_tuning();
        assert!((tuning.dedup_threshold - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unchanged_set_does_not_bump_version() {
        let dir = tempfile::tempdir().unwrap();
        let settings = service(dir.path());
        let version = settings.version();
        let current = settings.get("search.default_top_k").unwrap();
        settings.set("search.default_top_k", current).await.unwrap();
        assert_eq!(settings.version(), version);
    }
}
