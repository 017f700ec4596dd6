//! Sequence engine.
//!
//! The orchestrator: selects the next pending step, renders and publishes
//! it, arms a wait, and on fire promotes the next step until the run
//! terminates or is cancelled.
//!
//! Scheduling is single-threaded cooperative. One dispatch task owns all
//! run state and receives commands over an mpsc channel; inbound bus
//! traffic and timer expiries are funnelled onto the same channel, so
//! every state transition and counter bump is serialized without locks.
//! A step is "active" for exactly the interval between its publish and
//! the fire of its armed wait; the loop never spins waiting for an
//! acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use apsflow_bus::{BusAdapter, InboundMessage};
use apsflow_config::EngineSettings;
use apsflow_core::{
    render_str, render_value, OrderId, OrderIdRegistry, RegistryError, RunState, RunStatus,
    RunningSequence, SequenceDefinition, SequenceStep, StepStatus, WaitIntent, KEY_ACTION_ID,
    KEY_ORDER_ID, KEY_ORDER_UPDATE_ID,
};

use crate::coordinator::{MessagePredicate, WaitCoordinator, WaitFired};
use crate::events::{RunEvent, RunEventBus};

/// Engine errors surfaced to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown run: {0}")]
    UnknownRun(String),
    #[error("run '{0}' is still active")]
    PurgeWhileActive(String),
    #[error("definition '{0}' has no steps")]
    EmptyDefinition(String),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("engine is not running")]
    Unavailable,
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wait applied to steps without an explicit intent.
    pub default_wait: Duration,
    /// Run-event broadcast capacity.
    pub event_capacity: usize,
    /// Command channel capacity.
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(5),
            event_capacity: 1024,
            command_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Build from the unified configuration file.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            default_wait: Duration::from_secs_f64(settings.default_wait_secs.max(0.0)),
            event_capacity: settings.event_capacity,
            command_capacity: settings.command_capacity,
        }
    }
}

enum EngineCommand {
    Start {
        definition: Arc<SequenceDefinition>,
        overrides: HashMap<String, Value>,
        reply: oneshot::Sender<Result<OrderId, EngineError>>,
    },
    Status {
        order_id: OrderId,
        reply: oneshot::Sender<Result<RunStatus, EngineError>>,
    },
    ListRuns {
        reply: oneshot::Sender<Vec<RunStatus>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Purge {
        order_id: OrderId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Inbound {
        message: InboundMessage,
    },
    TimerElapsed {
        order_id: OrderId,
        epoch: u64,
    },
    Shutdown,
}

/// Public handle to the engine's dispatch loop.
pub struct SequenceEngine {
    command_tx: mpsc::Sender<EngineCommand>,
    registry: Arc<OrderIdRegistry>,
    events: RunEventBus,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl SequenceEngine {
    /// Spawn the dispatch loop and the inbound pump.
    pub fn spawn(
        bus: Arc<dyn BusAdapter>,
        registry: Arc<OrderIdRegistry>,
        config: EngineConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let events = RunEventBus::new(config.event_capacity);

        // Deliver inbound bus traffic onto the dispatch loop.
        let mut inbound = bus.inbound();
        let pump_tx = command_tx.clone();
        let pump = tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(message) => {
                        if pump_tx
                            .send(EngineCommand::Inbound { message })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "inbound receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let dispatch = EngineLoop {
            bus,
            registry: registry.clone(),
            config,
            runs: HashMap::new(),
            coordinator: WaitCoordinator::new(),
            events: events.clone(),
            command_tx: command_tx.clone(),
        };
        let worker = tokio::spawn(dispatch.run(command_rx));

        Self {
            command_tx,
            registry,
            events,
            pump,
            worker,
        }
    }

    /// Start a run of the given definition. Returns the fresh `order_id`;
    /// step failures after this point surface through `status` and the
    /// event stream. Concurrency is by run, not by name: starting the
    /// same definition twice yields two independent runs.
    pub async fn start(
        &self,
        definition: Arc<SequenceDefinition>,
        overrides: HashMap<String, Value>,
    ) -> Result<OrderId, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Start {
            definition,
            overrides,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::Unavailable)?
    }

    /// Observable snapshot of a run.
    pub async fn status(&self, order_id: &OrderId) -> Result<RunStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Status {
            order_id: order_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::Unavailable)?
    }

    /// Snapshots of every run in the registry, terminal ones included.
    pub async fn list_runs(&self) -> Result<Vec<RunStatus>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ListRuns { reply }).await?;
        rx.await.map_err(|_| EngineError::Unavailable)
    }

    /// Cancel a run. Synchronous from the caller's view: on return the
    /// run is cancelled, the wait is disarmed, and late inbound for the
    /// run is dropped. Idempotent.
    pub async fn cancel(&self, order_id: &OrderId) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Cancel {
            order_id: order_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::Unavailable)?
    }

    /// Remove a terminal run from the registry.
    pub async fn purge(&self, order_id: &OrderId) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Purge {
            order_id: order_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::Unavailable)?
    }

    /// Subscribe to the run event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// The shared order-id registry, for collaborators that annotate
    /// ad-hoc commands under an existing run.
    pub fn registry(&self) -> Arc<OrderIdRegistry> {
        self.registry.clone()
    }

    /// Stop the dispatch loop and the inbound pump.
    pub async fn shutdown(self) {
        self.pump.abort();
        let _ = self.command_tx.send(EngineCommand::Shutdown).await;
        let _ = self.worker.await;
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Unavailable)
    }
}

/// Owns all run state; runs on the dispatch task.
struct EngineLoop {
    bus: Arc<dyn BusAdapter>,
    registry: Arc<OrderIdRegistry>,
    config: EngineConfig,
    runs: HashMap<OrderId, RunningSequence>,
    coordinator: WaitCoordinator,
    events: RunEventBus,
    command_tx: mpsc::Sender<EngineCommand>,
}

impl EngineLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Start {
                    definition,
                    overrides,
                    reply,
                } => self.handle_start(definition, overrides, reply).await,
                EngineCommand::Status { order_id, reply } => {
                    let _ = reply.send(self.handle_status(&order_id));
                }
                EngineCommand::ListRuns { reply } => {
                    let _ = reply.send(self.handle_list());
                }
                EngineCommand::Cancel { order_id, reply } => {
                    let _ = reply.send(self.handle_cancel(&order_id));
                }
                EngineCommand::Purge { order_id, reply } => {
                    let _ = reply.send(self.handle_purge(&order_id));
                }
                EngineCommand::Inbound { message } => self.handle_inbound(message).await,
                EngineCommand::TimerElapsed { order_id, epoch } => {
                    if let Some(fired) = self.coordinator.on_timer(&order_id, epoch) {
                        self.complete_wait(fired).await;
                    }
                }
                EngineCommand::Shutdown => break,
            }
        }
    }

    async fn handle_start(
        &mut self,
        definition: Arc<SequenceDefinition>,
        overrides: HashMap<String, Value>,
        reply: oneshot::Sender<Result<OrderId, EngineError>>,
    ) {
        if definition.steps.is_empty() {
            let _ = reply.send(Err(EngineError::EmptyDefinition(definition.name.clone())));
            return;
        }

        let order_id = match self.registry.new_run() {
            Ok(order_id) => order_id,
            Err(err) => {
                let _ = reply.send(Err(err.into()));
                return;
            }
        };

        let mut context = definition.context_defaults.clone();
        context.extend(overrides);

        let run = RunningSequence::new(order_id.clone(), definition, context);
        let first = run.definition.steps[0].clone();
        tracing::info!(%order_id, definition = %run.definition.name, "run started");
        self.runs.insert(order_id.clone(), run);
        // Step 1 becomes ready at construction; surface that transition.
        self.events.emit(RunEvent::step(
            order_id.clone(),
            first.step_index,
            first.name,
            StepStatus::Pending,
            StepStatus::Ready,
        ));

        let _ = reply.send(Ok(order_id.clone()));
        self.advance(&order_id).await;
    }

    /// Execute the unique ready step, or complete the run when none is
    /// left. Identifier bumping is atomic with the publish attempt so a
    /// retry never skews counters.
    async fn advance(&mut self, order_id: &OrderId) {
        let ready = {
            let Some(run) = self.runs.get_mut(order_id) else {
                return;
            };
            if run.state.is_terminal() {
                return;
            }
            match run.ready_step() {
                Some(step_index) => {
                    run.current_step_index = step_index;
                    run.definition.step(step_index).cloned()
                }
                None => None,
            }
        };
        let Some(step) = ready else {
            self.transition_run(order_id, RunState::Completed);
            return;
        };
        let step_index = step.step_index;

        self.transition_step(order_id, step_index, StepStatus::Sent);

        // Bump before rendering; the registry is the only counter owner.
        let counter = match self.registry.next_update(order_id) {
            Ok(counter) => counter,
            Err(err) => {
                self.fail_step(order_id, step_index, &err.to_string());
                return;
            }
        };
        let action_id = uuid::Uuid::new_v4().to_string();

        let context = {
            let Some(run) = self.runs.get_mut(order_id) else {
                return;
            };
            run.context.insert(
                KEY_ORDER_ID.to_string(),
                Value::String(order_id.as_str().to_string()),
            );
            run.context
                .insert(KEY_ORDER_UPDATE_ID.to_string(), Value::from(counter));
            run.context
                .insert(KEY_ACTION_ID.to_string(), Value::String(action_id));
            run.context.clone()
        };

        let topic = match render_str(&step.topic_template, &context) {
            Ok(topic) => topic,
            Err(err) => {
                self.fail_step(order_id, step_index, &err.to_string());
                return;
            }
        };
        let payload = match render_value(&step.payload_template, &context) {
            Ok(payload) => payload,
            Err(err) => {
                self.fail_step(order_id, step_index, &err.to_string());
                return;
            }
        };

        if let Err(err) = self.bus.publish(&topic, &payload).await {
            self.fail_step(order_id, step_index, &err.to_string());
            return;
        }
        tracing::debug!(%order_id, step_index, %topic, order_update_id = counter, "step published");

        self.transition_step(order_id, step_index, StepStatus::Waiting);
        self.arm_wait(order_id, &step).await;
    }

    async fn arm_wait(&mut self, order_id: &OrderId, step: &SequenceStep) {
        let intent = step
            .wait_intent
            .clone()
            .unwrap_or_else(|| WaitIntent::timeout(self.config.default_wait.as_secs_f64()));

        let epoch = self.coordinator.next_epoch();
        let (predicate, deadline) = match intent {
            WaitIntent::Timeout { duration_s } => (None, Some(duration_s)),
            WaitIntent::Message {
                topic_pattern,
                required_subset,
                timeout_s,
            } => {
                // Make sure the transport delivers what the predicate
                // needs; the predicate itself stays exact-match.
                if let Err(err) = self.bus.subscribe(&topic_pattern).await {
                    tracing::warn!(%order_id, error = %err, "subscribe failed");
                }
                (
                    Some(MessagePredicate {
                        topic: topic_pattern,
                        required_subset,
                    }),
                    timeout_s,
                )
            }
        };

        let timer = deadline.map(|seconds| {
            // Catalog definitions are bounds-checked at load time, but the
            // engine also accepts ad-hoc definitions; an out-of-range value
            // falls back to the configured default.
            let sleep_for =
                Duration::try_from_secs_f64(seconds).unwrap_or(self.config.default_wait);
            let command_tx = self.command_tx.clone();
            let order_id = order_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(sleep_for).await;
                let _ = command_tx
                    .send(EngineCommand::TimerElapsed { order_id, epoch })
                    .await;
            })
        });

        self.coordinator
            .arm(order_id.clone(), step.step_index, epoch, predicate, timer);
    }

    async fn handle_inbound(&mut self, message: InboundMessage) {
        let fired = self
            .coordinator
            .on_inbound(&message.topic, &message.payload);
        if fired.is_empty() {
            // Late or unrelated inbound is dropped silently.
            tracing::trace!(topic = %message.topic, "inbound matched no armed wait");
            return;
        }
        for hit in fired {
            self.complete_wait(hit).await;
        }
    }

    /// A wait fired: complete the step, promote the next pending one,
    /// and re-enter the execution algorithm.
    async fn complete_wait(&mut self, fired: WaitFired) {
        let order_id = fired.order_id.clone();
        {
            let Some(run) = self.runs.get(&order_id) else {
                return;
            };
            if run.state.is_terminal()
                || run.step_status(fired.step_index) != Some(StepStatus::Waiting)
            {
                return;
            }
        }

        self.transition_step(&order_id, fired.step_index, StepStatus::Completed);
        let next = self.runs.get(&order_id).and_then(|run| run.next_pending());
        if let Some(next_index) = next {
            self.transition_step(&order_id, next_index, StepStatus::Ready);
        }
        self.advance(&order_id).await;
    }

    fn handle_status(&self, order_id: &OrderId) -> Result<RunStatus, EngineError> {
        let run = self
            .runs
            .get(order_id)
            .ok_or_else(|| EngineError::UnknownRun(order_id.to_string()))?;
        Ok(run.status(self.counter_of(order_id)))
    }

    fn handle_list(&self) -> Vec<RunStatus> {
        let mut statuses: Vec<RunStatus> = self
            .runs
            .values()
            .map(|run| run.status(self.counter_of(&run.order_id)))
            .collect();
        statuses.sort_by(|a, b| a.order_id.as_str().cmp(b.order_id.as_str()));
        statuses
    }

    fn handle_cancel(&mut self, order_id: &OrderId) -> Result<(), EngineError> {
        let Some(run) = self.runs.get(order_id) else {
            return Err(EngineError::UnknownRun(order_id.to_string()));
        };
        if run.state.is_terminal() {
            // Idempotent; terminal runs are left as they ended.
            return Ok(());
        }

        self.coordinator.disarm(order_id);
        let changed = match self.runs.get_mut(order_id) {
            Some(run) => run.cancel(),
            None => return Err(EngineError::UnknownRun(order_id.to_string())),
        };
        for (step_index, from) in changed {
            let name = self
                .runs
                .get(order_id)
                .and_then(|run| run.definition.step(step_index))
                .map(|step| step.name.clone())
                .unwrap_or_default();
            tracing::debug!(%order_id, step_index, ?from, "step cancelled");
            self.events.emit(RunEvent::step(
                order_id.clone(),
                step_index,
                name,
                from,
                StepStatus::Error,
            ));
        }
        tracing::info!(%order_id, "run cancelled");
        self.events.emit(RunEvent::run(
            order_id.clone(),
            RunState::Running,
            RunState::Cancelled,
        ));
        Ok(())
    }

    fn handle_purge(&mut self, order_id: &OrderId) -> Result<(), EngineError> {
        let run = self
            .runs
            .get(order_id)
            .ok_or_else(|| EngineError::UnknownRun(order_id.to_string()))?;
        if !run.state.is_terminal() {
            return Err(EngineError::PurgeWhileActive(order_id.to_string()));
        }
        self.coordinator.disarm(order_id);
        self.runs.remove(order_id);
        let _ = self.registry.release(order_id);
        tracing::debug!(%order_id, "run purged");
        Ok(())
    }

    /// Publish or render failure: the step errors, the run fails, no
    /// further steps are attempted, and nothing stays armed.
    fn fail_step(&mut self, order_id: &OrderId, step_index: u32, reason: &str) {
        tracing::error!(%order_id, step_index, %reason, "step failed");
        self.coordinator.disarm(order_id);
        self.transition_step(order_id, step_index, StepStatus::Error);
        self.transition_run(order_id, RunState::Failed);
    }

    fn transition_step(&mut self, order_id: &OrderId, step_index: u32, to: StepStatus) {
        let Some(run) = self.runs.get_mut(order_id) else {
            return;
        };
        let Some(step) = run.definition.step(step_index) else {
            return;
        };
        let name = step.name.clone();
        let Some(from) = run.set_step_status(step_index, to) else {
            return;
        };
        tracing::debug!(%order_id, step_index, step = %name, ?from, ?to, "step transition");
        self.events
            .emit(RunEvent::step(order_id.clone(), step_index, name, from, to));
    }

    fn transition_run(&mut self, order_id: &OrderId, to: RunState) {
        let Some(run) = self.runs.get_mut(order_id) else {
            return;
        };
        let from = run.set_state(to);
        tracing::info!(%order_id, ?from, ?to, "run transition");
        self.events.emit(RunEvent::run(order_id.clone(), from, to));
    }

    fn counter_of(&self, order_id: &OrderId) -> u64 {
        self.registry
            .snapshot(order_id)
            .map(|(_, counter)| counter)
            .unwrap_or(0)
    }
}
