//! Store lifecycle: CRUD over named corpora.

use chrono::Utc;
use parking_lot::RwLock;
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::protocol::StoreEvent;
use rice_core::{validate_store_name, Error, Result, Store, StoreConfig, StoreStats, DEFAULT_STORE};
use rice_vector::VectorStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Store metadata service (C5).
///
/// Each store owns one vector-DB collection and a config snapshot taken
/// at creation; dimension-affecting fields are immutable afterwards, the
/// operator recreates the store to change them.
pub struct StoreService {
    stores: RwLock<HashMap<String, Store>>,
    vector_store: Arc<dyn VectorStore>,
    bus: Arc<dyn EventBus>,
    metadata_path: PathBuf,
    default_config: StoreConfig,
}

impl StoreService {
    /// Load persisted store metadata from the data directory.
    pub fn new(
        data_dir: &std::path::Path,
        vector_store: Arc<dyn VectorStore>,
        bus: Arc<dyn EventBus>,
        default_config: StoreConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let metadata_path = data_dir.join("stores.json");

        let mut stores = HashMap::new();
        if metadata_path.exists() {
            let raw = std::fs::read_to_string(&metadata_path)?;
            match serde_json::from_str::<Vec<Store>>(&raw) {
                Ok(persisted) => {
                    for store in persisted {
                        stores.insert(store.name.clone(), store);
                    }
                }
                Err(e) => warn!("stores.json unreadable, starting empty: {}", e),
            }
        }

        info!(count = stores.len(), "store service ready");
        Ok(Self {
            stores: RwLock::new(stores),
            vector_store,
            bus,
            metadata_path,
            default_config,
        })
    }

    fn persist(&self) -> Result<()> {
        let stores: Vec<Store> = self.stores.read().values().cloned().collect();
        let rendered = serde_json::to_string_pretty(&stores)?;
        let temp_path = self.metadata_path.with_extension("json.tmp");
        std::fs::write(&temp_path, rendered)?;
        std::fs::rename(&temp_path, &self.metadata_path)?;
        Ok(())
    }

    async fn emit(&self, topic: &str, name: &str) {
        let event = StoreEvent {
            name: name.to_string(),
        };
        if let Ok(message) = BusMessage::event(topic, &event) {
            if let Err(e) = self.bus.publish(message).await {
                warn!("store event publish failed: {}", e);
            }
        }
    }

    /// Create a store. Fails with a conflict when the name is taken
    /// (case-insensitively).
    pub async fn create(&self, name: &str, config: Option<StoreConfig>) -> Result<Store> {
        validate_store_name(name)?;
        {
            let stores = self.stores.read();
            if stores
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name))
            {
                return Err(Error::conflict(format!("store '{}' already exists", name)));
            }
        }

        let store = Store {
            name: name.to_string(),
            config: config.unwrap_or_else(|| self.default_config.clone()),
            created_at: Utc::now(),
        };

        self.vector_store
            .ensure_collection(&store.name, store.config.dense_dimension)
            .await?;

        self.stores
            .write()
            .insert(store.name.clone(), store.clone());
        self.persist()?;
        self.emit(topics::STORE_CREATED, &store.name).await;

        info!(store = %store.name, "store created");
        Ok(store)
    }

    /// Delete a store; `default` is refused.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if name == DEFAULT_STORE {
            return Err(Error::Forbidden(
                "the default store cannot be deleted".to_string(),
            ));
        }
        if self.stores.read().get(name).is_none() {
            return Err(Error::not_found("store", name));
        }

        self.vector_store.drop_collection(name).await?;
        self.stores.write().remove(name);
        self.persist()?;
        self.emit(topics::STORE_DELETED, name).await;

        info!(store = name, "store deleted");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Store> {
        self.stores
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("store", name))
    }

    pub fn list(&self) -> Vec<Store> {
        let mut stores: Vec<Store> = self.stores.read().values().cloned().collect();
        stores.sort_by(|a, b| a.name.cmp(&b.name));
        stores
    }

    /// Live statistics for a store.
    pub async fn stats(&self, name: &str) -> Result<StoreStats> {
        self.get(name)?;
        self.vector_store.stats(name).await
    }

    /// Resolve a store for a request, lazily creating `default`.
    pub async fn resolve(&self, name: &str) -> Result<Store> {
        match self.get(name) {
            Ok(store) => Ok(store),
            Err(_) if name == DEFAULT_STORE => self.create(DEFAULT_STORE, None).await,
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rice_bus::InProcessBus;
    use rice_core::config::BusConfig;
    use rice_vector::InMemoryStore;

    fn service(dir: &std::path::Path) -> StoreService {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        StoreService::new(
            dir,
            Arc::new(InMemoryStore::new()),
            bus,
            StoreConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());

        let created = stores.create("docs", None).await.unwrap();
        assert_eq!(created.name, "docs");
        assert_eq!(stores.get("docs").unwrap().name, "docs");
        assert_eq!(stores.list().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_conflict_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());

        stores.create("docs", None).await.unwrap();
        let err = stores.create("docs", None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // uppercase variants are invalid names outright
        assert!(stores.create("Docs", None).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());
        assert!(stores.create("", None).await.is_err());
        assert!(stores.create("9lives", None).await.is_err());
        assert!(stores.create("has space", None).await.is_err());
    }

    #[tokio::test]
    async fn test_default_store_is_lazy_and_undeletable() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());

        let resolved = stores.resolve(DEFAULT_STORE).await.unwrap();
        assert_eq!(resolved.name, DEFAULT_STORE);

        let err = stores.delete(DEFAULT_STORE).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(stores.get(DEFAULT_STORE).is_ok());
    }

    #[tokio::test]
    async fn test_delete_then_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());

        stores.create("docs", None).await.unwrap();
        stores.delete("docs").await.unwrap();
        assert!(stores.get("docs").is_err());
        stores.create("docs", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stores = service(dir.path());
            stores.create("docs", None).await.unwrap();
        }
        let reloaded = service(dir.path());
        assert!(reloaded.get("docs").is_ok());
    }

    #[tokio::test]
    async fn test_missing_store_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let stores = service(dir.path());
        assert!(stores.get("nope").unwrap_err().is_not_found());
        assert!(stores.resolve("nope").await.unwrap_err().is_not_found());
    }
}
