//! Bus adapter contract.
//!
//! The engine core treats the transport as an external collaborator with
//! a narrow surface: publish a payload tree, subscribe to patterns,
//! receive inbound messages, and register a last-will announcement.
//! Delivery quality-of-service is the transport's business; the core
//! assumes at-least-once and leaves idempotency to the module side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed on '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("subscribe failed on '{pattern}': {reason}")]
    SubscribeFailed { pattern: String, reason: String },
    #[error("bus internal error: {0}")]
    Internal(String),
}

/// One received message, parsed into the canonical payload tree.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Pre-registered "offline" announcement published by the transport on
/// disconnect. The engine never composes this envelope; it exists to
/// inform peers and is owned entirely by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastWill {
    pub topic: String,
    pub payload: Value,
    #[serde(default)]
    pub retain: bool,
}

/// Publish/subscribe surface the engine requires from the transport.
#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Publish a payload tree. Non-blocking from the engine's view; the
    /// adapter may buffer internally.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BusError>;

    /// Subscribe to a topic pattern (transport-level wildcards allowed).
    async fn subscribe(&self, pattern: &str) -> Result<(), BusError>;

    /// Stream of inbound messages matching the active subscriptions.
    /// Each message is delivered exactly once per receiver.
    fn inbound(&self) -> broadcast::Receiver<InboundMessage>;

    /// Register the last-will announcement.
    async fn set_last_will(&self, will: LastWill) -> Result<(), BusError>;
}
