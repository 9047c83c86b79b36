//! In-process bus implementation over bounded tokio channels.

use crate::message::BusMessage;
use crate::{EventBus, Subscription};
use dashmap::DashMap;
use rice_core::config::BusConfig;
use rice_core::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Counters for bus monitoring.
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub requests: AtomicU64,
    pub request_timeouts: AtomicU64,
    pub backpressure_failures: AtomicU64,
}

struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<BusMessage>,
}

struct PendingRequest {
    /// Topic the request went out on; the reply must arrive on a different
    /// (response) topic, so the request itself never wakes its own waiter.
    request_topic: String,
    waiter: oneshot::Sender<BusMessage>,
}

pub(crate) struct BusInner {
    config: BusConfig,
    subscribers: DashMap<String, Vec<SubscriberSlot>>,
    /// Waiting requesters keyed by correlation id
    pending: DashMap<String, PendingRequest>,
    closed: AtomicBool,
    next_subscriber_id: AtomicU64,
    metrics: BusMetrics,
}

impl BusInner {
    pub(crate) fn remove_subscriber(&self, topic: &str, id: u64) {
        if let Some(mut slots) = self.subscribers.get_mut(topic) {
            slots.retain(|slot| slot.id != id);
        }
    }
}

/// The single-process [`EventBus`] implementation.
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

impl InProcessBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: DashMap::new(),
                pending: DashMap::new(),
                closed: AtomicBool::new(false),
                next_subscriber_id: AtomicU64::new(1),
                metrics: BusMetrics::default(),
            }),
        }
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Snapshot the sender handles for a topic without holding the map
    /// guard across an await point.
    fn senders_for(&self, topic: &str) -> Vec<mpsc::Sender<BusMessage>> {
        self.inner
            .subscribers
            .get(topic)
            .map(|slots| slots.iter().map(|slot| slot.sender.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[async_trait::async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, message: BusMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::unavailable("bus is closed"));
        }
        self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);

        // A response wakes its parked requester directly, whether or not
        // anyone subscribes to the response topic.
        if let Some(correlation_id) = &message.correlation_id {
            if let Some((_, pending)) = self
                .inner
                .pending
                .remove_if(correlation_id, |_, p| p.request_topic != message.topic)
            {
                let _ = pending.waiter.send(message.clone());
            }
        }

        let senders = self.senders_for(&message.topic);
        let publish_timeout = Duration::from_secs(self.inner.config.publish_timeout_secs);

        for sender in senders {
            match sender.send_timeout(message.clone(), publish_timeout).await {
                Ok(()) => {
                    self.inner.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    self.inner
                        .metrics
                        .backpressure_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %message.topic, "subscriber queue full, publish timed out");
                    return Err(Error::backpressure(format!(
                        "subscriber queue for '{}' is full",
                        message.topic
                    )));
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                    // Subscriber went away between snapshot and send.
                    debug!(topic = %message.topic, "dropping message for dead subscriber");
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.config.channel_capacity);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberSlot { id, sender });
        debug!(topic, subscriber = id, "subscribed");

        let inner = self.inner.clone();
        let cancel_topic = topic.to_string();
        Subscription::new(topic, receiver, move || {
            inner.remove_subscriber(&cancel_topic, id);
        })
    }

    async fn request(&self, mut message: BusMessage, timeout: Duration) -> Result<BusMessage> {
        if self.is_closed() {
            return Err(Error::unavailable("bus is closed"));
        }
        self.inner.metrics.requests.fetch_add(1, Ordering::Relaxed);

        let correlation_id = message
            .correlation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.inner.pending.insert(
            correlation_id.clone(),
            PendingRequest {
                request_topic: message.topic.clone(),
                waiter: waiter_tx,
            },
        );

        if let Err(e) = self.publish(message).await {
            self.inner.pending.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, waiter_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Waiter dropped without a response: the bus closed.
                Err(Error::unavailable("bus closed while awaiting response"))
            }
            Err(_) => {
                self.inner.pending.remove(&correlation_id);
                self.inner
                    .metrics
                    .request_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                Err(Error::timeout(format!(
                    "no response within {:?} (correlation {})",
                    timeout, correlation_id
                )))
            }
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        // Dropping the senders wakes every parked requester with an error
        // and every subscriber loop with end-of-stream.
        self.inner.pending.clear();
        self.inner.subscribers.clear();
        debug!("bus closed");
    }
}
