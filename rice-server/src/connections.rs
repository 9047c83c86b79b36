//! Connection registry: stable client identities, activity tracking and
//! a best-effort anomaly monitor.

use chrono::Utc;
use parking_lot::RwLock;
use rice_bus::{topics, BusMessage, EventBus};
use rice_core::protocol::ConnectionEvent;
use rice_core::{id, Connection, PcInfo, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Searches per monitor interval above which a connection is flagged.
const RATE_SPIKE_THRESHOLD: u64 = 1000;

/// Idle period after which a connection is flagged as inactive.
const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(30 * 24 * 3600);

/// How often the monitor scans registered connections.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Connection registry (C4).
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    /// Search counts at the previous monitor scan, for spike detection
    last_scan_counts: RwLock<HashMap<String, u64>>,
    bus: Arc<dyn EventBus>,
    directory: PathBuf,
}

impl ConnectionRegistry {
    /// Load persisted connections from `<data_dir>/connections/`.
    pub fn new(data_dir: &std::path::Path, bus: Arc<dyn EventBus>) -> Result<Self> {
        let directory = data_dir.join("connections");
        std::fs::create_dir_all(&directory)?;

        let mut connections = HashMap::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(entry.path())
                .map_err(rice_core::Error::from)
                .and_then(|raw| serde_json::from_str::<Connection>(&raw).map_err(Into::into))
            {
                Ok(connection) => {
                    connections.insert(connection.id.clone(), connection);
                }
                Err(e) => warn!(path = %entry.path().display(), "skipping connection file: {}", e),
            }
        }

        info!(count = connections.len(), "connection registry ready");
        Ok(Self {
            connections: RwLock::new(connections),
            last_scan_counts: RwLock::new(HashMap::new()),
            bus,
            directory,
        })
    }

    fn persist(&self, connection: &Connection) -> Result<()> {
        let path = self.directory.join(format!("{}.json", connection.id));
        let rendered = serde_json::to_string_pretty(connection)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    async fn emit(&self, topic: &str, connection: &Connection) {
        let event = ConnectionEvent {
            connection_id: connection.id.clone(),
            files_indexed: connection.files_indexed,
            searches: connection.searches,
        };
        if let Ok(message) = BusMessage::event(topic, &event) {
            if let Err(e) = self.bus.publish(message).await {
                debug!("connection event dropped: {}", e);
            }
        }
    }

    /// Register a client by PC info, deriving its stable id. Idempotent:
    /// a known connection just refreshes `last_seen`.
    pub async fn register(&self, info: &PcInfo, display_name: Option<String>) -> Result<Connection> {
        let connection_id = id::connection_id(&info.mac, &info.hostname, &info.user);

        let (connection, first_sight) = {
            let mut connections = self.connections.write();
            match connections.get_mut(&connection_id) {
                Some(existing) => {
                    existing.last_seen = Utc::now();
                    (existing.clone(), false)
                }
                None => {
                    let display_name = display_name
                        .unwrap_or_else(|| format!("{}@{}", info.user, info.hostname));
                    let connection = Connection::new(connection_id.clone(), display_name);
                    connections.insert(connection_id.clone(), connection.clone());
                    (connection, true)
                }
            }
        };

        self.persist(&connection)?;
        if first_sight {
            info!(connection = %connection.id, "connection registered");
            self.emit(topics::CONNECTION_REGISTERED, &connection).await;
        }
        Ok(connection)
    }

    /// Ensure a record exists for a transport-conveyed connection id.
    pub async fn ensure_known(&self, connection_id: &str) {
        let created = {
            let mut connections = self.connections.write();
            if connections.contains_key(connection_id) {
                None
            } else {
                let connection = Connection::new(
                    connection_id.to_string(),
                    connection_id.to_string(),
                );
                connections.insert(connection_id.to_string(), connection.clone());
                Some(connection)
            }
        };
        if let Some(connection) = created {
            if let Err(e) = self.persist(&connection) {
                warn!("connection persist failed: {}", e);
            }
            self.emit(topics::CONNECTION_REGISTERED, &connection).await;
        }
    }

    /// Record search activity.
    pub async fn record_search(&self, connection_id: &str) {
        self.record(connection_id, 0, 1).await;
    }

    /// Record indexing activity.
    pub async fn record_index(&self, connection_id: &str, files: u64) {
        self.record(connection_id, files, 0).await;
    }

    async fn record(&self, connection_id: &str, files: u64, searches: u64) {
        self.ensure_known(connection_id).await;
        let updated = {
            let mut connections = self.connections.write();
            connections.get_mut(connection_id).map(|connection| {
                connection.files_indexed += files;
                connection.searches += searches;
                connection.last_seen = Utc::now();
                connection.clone()
            })
        };
        if let Some(connection) = updated {
            if let Err(e) = self.persist(&connection) {
                warn!("connection persist failed: {}", e);
            }
            self.emit(topics::CONNECTION_ACTIVITY, &connection).await;
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.connections.read().get(connection_id).cloned()
    }

    pub fn list(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> =
            self.connections.read().values().cloned().collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        connections
    }

    /// One monitor scan: flag rate spikes and long-inactive connections.
    /// Alerting is logs only and never blocks request paths.
    pub fn scan_for_anomalies(&self) {
        let connections = self.list();
        let mut last_counts = self.last_scan_counts.write();
        let now = Utc::now();

        for connection in &connections {
            let previous = last_counts
                .insert(connection.id.clone(), connection.searches)
                .unwrap_or(connection.searches);
            let delta = connection.searches.saturating_sub(previous);
            if delta > RATE_SPIKE_THRESHOLD {
                warn!(
                    connection = %connection.id,
                    searches = delta,
                    "search rate spike detected"
                );
            }

            let idle = now.signed_duration_since(connection.last_seen);
            if idle.num_seconds() > INACTIVITY_THRESHOLD.as_secs() as i64 && connection.enabled {
                debug!(
                    connection = %connection.id,
                    idle_days = idle.num_days(),
                    "connection inactive"
                );
            }
        }
    }

    /// Spawn the periodic monitor; the returned handle aborts it on drop.
    pub fn spawn_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.scan_for_anomalies();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rice_bus::InProcessBus;
    use rice_core::config::BusConfig;

    fn registry(dir: &std::path::Path) -> ConnectionRegistry {
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new(BusConfig::default()));
        ConnectionRegistry::new(dir, bus).unwrap()
    }

    fn pc_info() -> PcInfo {
        PcInfo {
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            hostname: "devbox".to_string(),
            user: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_registration_is_deterministic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let first = registry.register(&pc_info(), None).await.unwrap();
        let second = registry.register(&pc_info(), None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(first.display_name, "alice@devbox");
    }

    #[tokio::test]
    async fn test_activity_counters() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let connection = registry.register(&pc_info(), None).await.unwrap();
        registry.record_search(&connection.id).await;
        registry.record_search(&connection.id).await;
        registry.record_index(&connection.id, 5).await;

        let current = registry.get(&connection.id).unwrap();
        assert_eq!(current.searches, 2);
        assert_eq!(current.files_indexed, 5);
    }

    #[tokio::test]
    async fn test_transport_conveyed_id_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.record_search("abcdef0123456789").await;
        let connection = registry.get("abcdef0123456789").unwrap();
        assert_eq!(connection.searches, 1);
    }

    #[tokio::test]
    async fn test_persistence_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let registry = registry(dir.path());
            let connection = registry.register(&pc_info(), None).await.unwrap();
            registry.record_index(&connection.id, 3).await;
            connection.id
        };

        let reloaded = registry(dir.path());
        let connection = reloaded.get(&id).unwrap();
        assert_eq!(connection.files_indexed, 3);
    }

    #[tokio::test]
    async fn test_anomaly_scan_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        registry.register(&pc_info(), None).await.unwrap();
        registry.scan_for_anomalies();
        registry.scan_for_anomalies();
    }
}
