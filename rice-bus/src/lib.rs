//! In-process event bus with request/reply correlation.
//!
//! The bus decouples the search and indexing pipelines from the ML service:
//! callers publish typed payloads to well-known topics and the service
//! answers on the matching response topic, correlated by id. A distributed
//! transport can replace [`InProcessBus`] behind the same trait without
//! touching any call site.
//!
//! Guarantees: FIFO per (topic, subscriber), at-most-once delivery, bounded
//! channels with publish backpressure, and typed timeout/closed errors.

pub mod message;
pub mod topics;

mod inprocess;

pub use inprocess::{BusMetrics, InProcessBus};
pub use message::BusMessage;

use rice_core::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Typed publish/subscribe with request/reply correlation.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget: returns once the event is enqueued for every
    /// current subscriber of its topic.
    async fn publish(&self, message: BusMessage) -> Result<()>;

    /// Register a subscriber; every subscriber of a topic receives every
    /// event. Dropping the subscription cancels it.
    fn subscribe(&self, topic: &str) -> Subscription;

    /// Synchronous round trip: deliver the message, park on its correlation
    /// id, and return the response that arrives on the reply topic.
    async fn request(&self, message: BusMessage, timeout: Duration) -> Result<BusMessage>;

    /// Reject new publishes and wake all waiting requesters with an error.
    fn close(&self);
}

/// A live subscription; messages arrive in publish order.
///
/// Transport-agnostic: implementations supply the delivery channel and a
/// cancel hook invoked on drop.
pub struct Subscription {
    topic: String,
    receiver: tokio::sync::mpsc::Receiver<BusMessage>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        receiver: tokio::sync::mpsc::Receiver<BusMessage>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            receiver,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Receive the next message; `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

/// Guard for a spawned handler task; aborts the task on drop.
pub struct HandlerGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Subscribe to `topic` and run `handler` for each message on a background
/// task. The returned guard cancels the handler when dropped.
pub fn spawn_handler<F, Fut>(bus: Arc<dyn EventBus>, topic: &str, handler: F) -> HandlerGuard
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut subscription = bus.subscribe(topic);
    let topic = topic.to_string();
    let handle = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            handler(message).await;
        }
        tracing::debug!("handler for topic '{}' stopped", topic);
    });
    HandlerGuard { handle }
}
