//! In-process signal hub
//!
//! Topic-based fan-out used for push delivery. Each subscriber owns a
//! bounded queue; a subscriber that falls behind misses messages rather
//! than stalling the publisher (the poll fallback covers the gap).

use async_trait::async_trait;
use callmeter_core::{
    traits::{SignalMessage, SignalTransport, Subscription},
    AppResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

type Subscribers = Vec<(u64, mpsc::Sender<SignalMessage>)>;

#[derive(Default)]
struct HubInner {
    topics: Mutex<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
}

/// Signal transport backed by in-process queues
#[derive(Clone)]
pub struct SignalHub {
    inner: Arc<HubInner>,
    capacity: usize,
}

impl SignalHub {
    /// Create a hub whose subscribers buffer up to `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.len())
    }

    fn detach(inner: &HubInner, topic: &str, id: u64) {
        let mut topics = inner.topics.lock();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl SignalTransport for SignalHub {
    async fn publish(
        &self,
        topic: &str,
        event_name: &str,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        let message = SignalMessage {
            topic: topic.to_string(),
            event: event_name.to_string(),
            payload,
        };

        let mut topics = self.inner.topics.lock();
        let Some(subs) = topics.get_mut(topic) else {
            debug!(topic = %topic, event = %event_name, "No subscribers");
            return Ok(());
        };

        subs.retain(|(id, tx)| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(topic = %topic, subscriber = id, "Subscriber lagging, message dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        debug!(topic = %topic, event = %event_name, subscribers = subs.len(), "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        let inner = self.inner.clone();
        let owned_topic = topic.to_string();
        Ok(Subscription::new(topic, rx, move || {
            SignalHub::detach(&inner, &owned_topic, id);
        }))
    }
}
