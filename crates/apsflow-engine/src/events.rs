//! Run event stream.
//!
//! Every state transition the engine performs is emitted as a typed
//! event on a broadcast channel so dashboards and log shippers can
//! consume progress without parsing logs. Publishing with no subscribers
//! is a non-error; the engine's own state remains the source of truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use apsflow_core::{OrderId, RunState, StepStatus};

/// One observable transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A step changed status.
    Step {
        order_id: OrderId,
        step_index: u32,
        step_name: String,
        from: StepStatus,
        to: StepStatus,
        at: DateTime<Utc>,
    },
    /// The run itself changed state.
    Run {
        order_id: OrderId,
        from: RunState,
        to: RunState,
        at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn step(
        order_id: OrderId,
        step_index: u32,
        step_name: impl Into<String>,
        from: StepStatus,
        to: StepStatus,
    ) -> Self {
        Self::Step {
            order_id,
            step_index,
            step_name: step_name.into(),
            from,
            to,
            at: Utc::now(),
        }
    }

    pub fn run(order_id: OrderId, from: RunState, to: RunState) -> Self {
        Self::Run {
            order_id,
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// In-process fan-out for run events. Cheap to clone; clones share the
/// same channel.
#[derive(Clone)]
pub struct RunEventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl RunEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all active subscribers.
    pub fn emit(&self, event: RunEvent) {
        // No receiver is not an error.
        let _ = self.tx.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = RunEventBus::new(8);
        bus.emit(RunEvent::run(
            OrderId::generate(),
            RunState::Running,
            RunState::Completed,
        ));
    }

    #[test]
    fn test_subscriber_receives_step_event() {
        tokio_test::block_on(async {
            let bus = RunEventBus::new(8);
            let mut rx = bus.subscribe();
            let order_id = OrderId::generate();

            bus.emit(RunEvent::step(
                order_id.clone(),
                1,
                "PICK",
                StepStatus::Ready,
                StepStatus::Sent,
            ));

            match rx.recv().await.unwrap() {
                RunEvent::Step {
                    order_id: got,
                    step_index,
                    from,
                    to,
                    ..
                } => {
                    assert_eq!(got, order_id);
                    assert_eq!(step_index, 1);
                    assert_eq!(from, StepStatus::Ready);
                    assert_eq!(to, StepStatus::Sent);
                }
                other => panic!("expected step event, got {:?}", other),
            }
        });
    }
}
