//! Wait coordinator.
//!
//! Holds at most one armed wait per run: a message predicate, a timer,
//! or both racing each other. The coordinator is driven entirely by the
//! engine's dispatch loop; inbound messages and timer expiries arrive on
//! that loop, so no locking is needed here. Timer wakeups carry an arm
//! epoch so a stale expiry can never fire a wait that was re-armed or
//! disarmed in the meantime.

use std::collections::HashMap;

use serde_json::Value;
use tokio::task::JoinHandle;

use apsflow_core::OrderId;

/// Exact-topic predicate with a payload subset.
#[derive(Debug, Clone)]
pub struct MessagePredicate {
    pub topic: String,
    pub required_subset: Value,
}

impl MessagePredicate {
    pub fn matches(&self, topic: &str, payload: &Value) -> bool {
        self.topic == topic && subset_matches(&self.required_subset, payload)
    }
}

/// True when every key path and scalar in `expected` appears with an
/// equal value in `actual`. Keys absent from `expected` are ignored;
/// arrays match element-wise and must be the same length.
pub fn subset_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            expected_map.iter().all(|(key, expected_value)| {
                actual_map
                    .get(key)
                    .map(|actual_value| subset_matches(expected_value, actual_value))
                    .unwrap_or(false)
            })
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            expected_items.len() == actual_items.len()
                && expected_items
                    .iter()
                    .zip(actual_items.iter())
                    .all(|(e, a)| subset_matches(e, a))
        }
        (expected, actual) => expected == actual,
    }
}

/// One armed wait.
struct ArmedWait {
    step_index: u32,
    epoch: u64,
    predicate: Option<MessagePredicate>,
    timer: Option<JoinHandle<()>>,
}

impl ArmedWait {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A wait that fired and was disarmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitFired {
    pub order_id: OrderId,
    pub step_index: u32,
}

/// Gates the advance from `waiting` to `completed`, one wait per run.
pub struct WaitCoordinator {
    waits: HashMap<OrderId, ArmedWait>,
    next_epoch: u64,
}

impl WaitCoordinator {
    pub fn new() -> Self {
        Self {
            waits: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// Allocate the epoch for the next arm; the caller threads it into
    /// the timer wakeup it spawns.
    pub fn next_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Register a wait. Re-arming for the same run before the previous
    /// wait fires replaces it and cancels its timer.
    pub fn arm(
        &mut self,
        order_id: OrderId,
        step_index: u32,
        epoch: u64,
        predicate: Option<MessagePredicate>,
        timer: Option<JoinHandle<()>>,
    ) {
        if let Some(mut previous) = self.waits.insert(
            order_id,
            ArmedWait {
                step_index,
                epoch,
                predicate,
                timer,
            },
        ) {
            previous.abort_timer();
        }
    }

    /// Drop any pending wait for the run. Used on cancel and failure.
    pub fn disarm(&mut self, order_id: &OrderId) {
        if let Some(mut wait) = self.waits.remove(order_id) {
            wait.abort_timer();
        }
    }

    /// Whether the run currently has an armed wait.
    pub fn is_armed(&self, order_id: &OrderId) -> bool {
        self.waits.contains_key(order_id)
    }

    /// Feed an inbound message to every armed predicate. Matching waits
    /// fire exactly once and are disarmed; everything else is untouched.
    pub fn on_inbound(&mut self, topic: &str, payload: &Value) -> Vec<WaitFired> {
        let matched: Vec<OrderId> = self
            .waits
            .iter()
            .filter(|(_, wait)| {
                wait.predicate
                    .as_ref()
                    .map(|p| p.matches(topic, payload))
                    .unwrap_or(false)
            })
            .map(|(order_id, _)| order_id.clone())
            .collect();

        matched
            .into_iter()
            .filter_map(|order_id| {
                let mut wait = self.waits.remove(&order_id)?;
                wait.abort_timer();
                Some(WaitFired {
                    order_id,
                    step_index: wait.step_index,
                })
            })
            .collect()
    }

    /// Handle a timer expiry. Fires only when the epoch still matches
    /// the armed wait; stale wakeups are dropped.
    pub fn on_timer(&mut self, order_id: &OrderId, epoch: u64) -> Option<WaitFired> {
        let current = self.waits.get(order_id)?;
        if current.epoch != epoch {
            return None;
        }
        let mut wait = self.waits.remove(order_id)?;
        wait.abort_timer();
        Some(WaitFired {
            order_id: order_id.clone(),
            step_index: wait.step_index,
        })
    }
}

impl Default for WaitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arm_message(
        coordinator: &mut WaitCoordinator,
        order_id: &OrderId,
        step_index: u32,
        topic: &str,
        subset: Value,
    ) -> u64 {
        let epoch = coordinator.next_epoch();
        coordinator.arm(
            order_id.clone(),
            step_index,
            epoch,
            Some(MessagePredicate {
                topic: topic.to_string(),
                required_subset: subset,
            }),
            None,
        );
        epoch
    }

    #[test]
    fn test_subset_matches_semantics() {
        let payload = json!({
            "actionState": "IDLE",
            "nested": {"a": 1, "b": [1, 2]},
            "extra": true
        });
        assert!(subset_matches(&json!({"actionState": "IDLE"}), &payload));
        assert!(subset_matches(&json!({"nested": {"a": 1}}), &payload));
        assert!(subset_matches(&json!({"nested": {"b": [1, 2]}}), &payload));
        assert!(!subset_matches(&json!({"actionState": "BUSY"}), &payload));
        assert!(!subset_matches(&json!({"nested": {"b": [1]}}), &payload));
        assert!(!subset_matches(&json!({"missing": 1}), &payload));
        // An empty subset matches anything.
        assert!(subset_matches(&json!({}), &payload));
    }

    #[test]
    fn test_matching_inbound_fires_once_and_disarms() {
        let mut coordinator = WaitCoordinator::new();
        let order_id = OrderId::generate();
        arm_message(
            &mut coordinator,
            &order_id,
            2,
            "m/state",
            json!({"actionState": "IDLE"}),
        );

        let unrelated = coordinator.on_inbound("m/state", &json!({"actionState": "BUSY"}));
        assert!(unrelated.is_empty());
        assert!(coordinator.is_armed(&order_id));

        let fired = coordinator.on_inbound("m/state", &json!({"actionState": "IDLE"}));
        assert_eq!(
            fired,
            vec![WaitFired {
                order_id: order_id.clone(),
                step_index: 2
            }]
        );
        assert!(!coordinator.is_armed(&order_id));

        let again = coordinator.on_inbound("m/state", &json!({"actionState": "IDLE"}));
        assert!(again.is_empty());
    }

    #[test]
    fn test_topic_must_match_exactly() {
        let mut coordinator = WaitCoordinator::new();
        let order_id = OrderId::generate();
        arm_message(&mut coordinator, &order_id, 1, "m/state", json!({}));

        assert!(coordinator.on_inbound("m/other", &json!({})).is_empty());
        assert!(!coordinator.on_inbound("m/state", &json!({})).is_empty());
    }

    #[test]
    fn test_stale_timer_epoch_is_dropped() {
        let mut coordinator = WaitCoordinator::new();
        let order_id = OrderId::generate();

        let old_epoch = arm_message(&mut coordinator, &order_id, 1, "m/state", json!({}));
        // Re-arm replaces the wait; the old epoch must no longer fire.
        let new_epoch = arm_message(&mut coordinator, &order_id, 1, "m/state", json!({}));

        assert!(coordinator.on_timer(&order_id, old_epoch).is_none());
        assert!(coordinator.is_armed(&order_id));
        assert_eq!(
            coordinator.on_timer(&order_id, new_epoch),
            Some(WaitFired {
                order_id: order_id.clone(),
                step_index: 1
            })
        );
    }

    #[test]
    fn test_timer_expiry_fires_a_message_gated_wait() {
        let mut coordinator = WaitCoordinator::new();
        let order_id = OrderId::generate();
        let epoch = arm_message(
            &mut coordinator,
            &order_id,
            3,
            "m/state",
            json!({"actionState": "IDLE"}),
        );

        // The racing deadline wins: the wait fires and is disarmed.
        let fired = coordinator.on_timer(&order_id, epoch).unwrap();
        assert_eq!(fired.step_index, 3);
        assert!(!coordinator.is_armed(&order_id));

        // The message the predicate was watching for arrives too late.
        let late = coordinator.on_inbound("m/state", &json!({"actionState": "IDLE"}));
        assert!(late.is_empty());
    }

    #[test]
    fn test_disarm_drops_late_inbound_silently() {
        let mut coordinator = WaitCoordinator::new();
        let order_id = OrderId::generate();
        arm_message(&mut coordinator, &order_id, 1, "m/state", json!({}));

        coordinator.disarm(&order_id);
        assert!(coordinator.on_inbound("m/state", &json!({})).is_empty());
    }

    #[test]
    fn test_waits_for_distinct_runs_are_independent() {
        let mut coordinator = WaitCoordinator::new();
        let a = OrderId::generate();
        let b = OrderId::generate();
        arm_message(&mut coordinator, &a, 1, "m/a", json!({}));
        arm_message(&mut coordinator, &b, 1, "m/b", json!({}));

        let fired = coordinator.on_inbound("m/a", &json!({}));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].order_id, a);
        assert!(coordinator.is_armed(&b));
    }
}
