//! In-process bus.
//!
//! Broadcast-backed implementation of the adapter contract for tests and
//! local development. Outbound publishes land in an inspectable log;
//! inbound traffic is injected by the test and filtered through the
//! active subscription patterns, so the wiring matches a real broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::adapter::{BusAdapter, BusError, InboundMessage, LastWill};
use crate::topic::topic_matches;

/// In-memory bus with scriptable publish failures.
pub struct InMemoryBus {
    tx: broadcast::Sender<InboundMessage>,
    subscriptions: RwLock<Vec<String>>,
    published: RwLock<Vec<(String, Value)>>,
    fail_publishes: AtomicUsize,
    last_will: RwLock<Option<LastWill>>,
}

impl InMemoryBus {
    /// Create a bus with the given inbound channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            subscriptions: RwLock::new(Vec::new()),
            published: RwLock::new(Vec::new()),
            fail_publishes: AtomicUsize::new(0),
            last_will: RwLock::new(None),
        }
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.fail_publishes.store(count, Ordering::SeqCst);
    }

    /// Snapshot of everything published so far, in publish order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Inject an inbound message. Delivered only when some active
    /// subscription pattern matches, as a broker would. Returns whether
    /// it was delivered.
    pub fn inject(&self, topic: impl Into<String>, payload: Value) -> bool {
        let topic = topic.into();
        let subscribed = self
            .subscriptions
            .read()
            .map(|subs| subs.iter().any(|pattern| topic_matches(pattern, &topic)))
            .unwrap_or(false);
        if !subscribed {
            tracing::trace!(%topic, "inbound dropped: no matching subscription");
            return false;
        }
        // No receiver is a non-error; the publish log is still written
        // by the outbound side.
        self.tx.send(InboundMessage::new(topic, payload)).is_ok()
    }

    /// The registered last-will, if any.
    pub fn last_will(&self) -> Option<LastWill> {
        self.last_will.read().ok().and_then(|will| will.clone())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BusAdapter for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BusError> {
        let remaining = self.fail_publishes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_publishes.store(remaining - 1, Ordering::SeqCst);
            return Err(BusError::PublishFailed {
                topic: topic.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        let mut log = self
            .published
            .write()
            .map_err(|e| BusError::Internal(e.to_string()))?;
        log.push((topic.to_string(), payload.clone()));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        let mut subs = self
            .subscriptions
            .write()
            .map_err(|e| BusError::Internal(e.to_string()))?;
        if !subs.iter().any(|existing| existing == pattern) {
            subs.push(pattern.to_string());
        }
        Ok(())
    }

    fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.tx.subscribe()
    }

    async fn set_last_will(&self, will: LastWill) -> Result<(), BusError> {
        let mut slot = self
            .last_will
            .write()
            .map_err(|e| BusError::Internal(e.to_string()))?;
        *slot = Some(will);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_is_logged() {
        tokio_test::block_on(async {
            let bus = InMemoryBus::default();
            bus.publish("module/v1/ff/X/order", &json!({"command": "PICK"}))
                .await
                .unwrap();

            let log = bus.published();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].0, "module/v1/ff/X/order");
        });
    }

    #[test]
    fn test_scripted_publish_failure() {
        tokio_test::block_on(async {
            let bus = InMemoryBus::default();
            bus.fail_next_publishes(1);

            let err = bus.publish("t", &json!({})).await.unwrap_err();
            assert!(matches!(err, BusError::PublishFailed { .. }));

            bus.publish("t", &json!({})).await.unwrap();
            assert_eq!(bus.published().len(), 1);
        });
    }

    #[test]
    fn test_inject_respects_subscriptions() {
        tokio_test::block_on(async {
            let bus = InMemoryBus::default();
            let mut rx = bus.inbound();

            assert!(!bus.inject("module/v1/ff/X/state", json!({"a": 1})));

            bus.subscribe("module/v1/ff/+/state").await.unwrap();
            assert!(bus.inject("module/v1/ff/X/state", json!({"a": 1})));

            let message = rx.recv().await.unwrap();
            assert_eq!(message.topic, "module/v1/ff/X/state");
            assert_eq!(message.payload, json!({"a": 1}));
        });
    }

    #[test]
    fn test_last_will_registration() {
        tokio_test::block_on(async {
            let bus = InMemoryBus::default();
            assert!(bus.last_will().is_none());

            let will = LastWill {
                topic: "ops/connection".to_string(),
                payload: json!({"connected": false}),
                retain: true,
            };
            bus.set_last_will(will.clone()).await.unwrap();
            assert_eq!(bus.last_will(), Some(will));
        });
    }
}
