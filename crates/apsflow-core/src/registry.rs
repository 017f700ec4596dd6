//! Order-Id Registry
//!
//! The single source of truth for the identifier protocol the factory
//! modules require: a stable `orderId` per run and a monotonically
//! increasing `orderUpdateId` bumped exactly once per outbound publish.
//! Anything that annotates an outbound message (the engine, a UI sending
//! an ad-hoc command under an existing run) reads from here rather than
//! inventing its own counter.

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::types::OrderId;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown order id: {0}")]
    UnknownOrderId(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Issues order ids and per-run update counters.
///
/// `next_update` is the only mutator; counters are monotone over the life
/// of a run even if a publish is retried (a retry reuses the counter that
/// was already bumped for the current step). Entries for distinct runs
/// are independent.
pub struct OrderIdRegistry {
    counters: RwLock<HashMap<OrderId, u64>>,
}

impl OrderIdRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh order id with its counter at zero.
    pub fn new_run(&self) -> Result<OrderId, RegistryError> {
        let order_id = OrderId::generate();
        let mut counters = self
            .counters
            .write()
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        counters.insert(order_id.clone(), 0);
        Ok(order_id)
    }

    /// Increment and return the new counter value. Call exactly once per
    /// outbound step publish, immediately before rendering.
    pub fn next_update(&self, order_id: &OrderId) -> Result<u64, RegistryError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        let counter = counters
            .get_mut(order_id)
            .ok_or_else(|| RegistryError::UnknownOrderId(order_id.to_string()))?;
        *counter += 1;
        Ok(*counter)
    }

    /// Current `(order_id, counter)` without mutation.
    pub fn snapshot(&self, order_id: &OrderId) -> Result<(OrderId, u64), RegistryError> {
        let counters = self
            .counters
            .read()
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        let counter = counters
            .get(order_id)
            .ok_or_else(|| RegistryError::UnknownOrderId(order_id.to_string()))?;
        Ok((order_id.clone(), *counter))
    }

    /// Drop a run's entry. Returns whether it existed.
    pub fn release(&self, order_id: &OrderId) -> Result<bool, RegistryError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|e| RegistryError::Internal(e.to_string()))?;
        Ok(counters.remove(order_id).is_some())
    }
}

impl Default for OrderIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
