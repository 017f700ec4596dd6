//! Run state types
//!
//! RunningSequence is one live execution of a recipe: a stable order id,
//! per-step statuses, and a run-level state machine. It lives in the
//! engine's in-memory registry and is never persisted; a restart loses
//! in-flight runs by design.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::recipe::SequenceDefinition;

/// Stable run identifier, lowercase 8-4-4-4-12 hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Sent,
    Waiting,
    Completed,
    Error,
}

impl StepStatus {
    /// Completed or error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }

    /// Ready, sent, or waiting. At most one step per running run.
    pub fn is_active(&self) -> bool {
        matches!(self, StepStatus::Ready | StepStatus::Sent | StepStatus::Waiting)
    }
}

/// Run-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// One step row in a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_index: u32,
    pub name: String,
    pub status: StepStatus,
}

/// Observable snapshot of a run, safe to hand to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub order_id: OrderId,
    pub definition_name: String,
    pub state: RunState,
    pub current_step_index: u32,
    pub update_counter: u64,
    pub steps: Vec<StepProgress>,
}

/// One live execution instance of a recipe.
#[derive(Debug, Clone)]
pub struct RunningSequence {
    /// Stable identifier, set at start, never mutated.
    pub order_id: OrderId,
    /// The definition this run was started with. Catalog reloads do not
    /// re-resolve by name mid-run.
    pub definition: Arc<SequenceDefinition>,
    /// Placeholder values: defaults, per-run overrides, and the
    /// engine-injected keys refreshed per step.
    pub context: HashMap<String, Value>,
    /// Status per step, parallel to `definition.steps`.
    step_status: Vec<StepStatus>,
    /// 1-based index of the step currently in ready/sent/waiting.
    pub current_step_index: u32,
    /// Run-level state.
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunningSequence {
    /// Create a run with step 1 ready and everything else pending.
    pub fn new(
        order_id: OrderId,
        definition: Arc<SequenceDefinition>,
        context: HashMap<String, Value>,
    ) -> Self {
        let mut step_status = vec![StepStatus::Pending; definition.steps.len()];
        if let Some(first) = step_status.first_mut() {
            *first = StepStatus::Ready;
        }
        let now = Utc::now();
        Self {
            order_id,
            definition,
            context,
            step_status,
            current_step_index: 1,
            state: RunState::Running,
            started_at: now,
            updated_at: now,
        }
    }

    /// Status of a step by 1-based index.
    pub fn step_status(&self, step_index: u32) -> Option<StepStatus> {
        let pos = self.position_of(step_index)?;
        self.step_status.get(pos).copied()
    }

    /// Set a step's status. Returns the previous status.
    pub fn set_step_status(&mut self, step_index: u32, status: StepStatus) -> Option<StepStatus> {
        let pos = self.position_of(step_index)?;
        let slot = self.step_status.get_mut(pos)?;
        let previous = *slot;
        *slot = status;
        self.updated_at = Utc::now();
        Some(previous)
    }

    /// The unique step currently in `ready`, if any.
    pub fn ready_step(&self) -> Option<u32> {
        self.step_status
            .iter()
            .position(|s| *s == StepStatus::Ready)
            .map(|pos| self.definition.steps[pos].step_index)
    }

    /// The first `pending` step, if any.
    pub fn next_pending(&self) -> Option<u32> {
        self.step_status
            .iter()
            .position(|s| *s == StepStatus::Pending)
            .map(|pos| self.definition.steps[pos].step_index)
    }

    /// Set the run-level state. Returns the previous state.
    pub fn set_state(&mut self, state: RunState) -> RunState {
        let previous = self.state;
        self.state = state;
        self.updated_at = Utc::now();
        previous
    }

    /// Mark every non-completed step as error and the run as cancelled.
    /// Returns `(step_index, previous_status)` for each changed step so
    /// the caller can emit transition events.
    pub fn cancel(&mut self) -> Vec<(u32, StepStatus)> {
        let mut changed = Vec::new();
        for (pos, status) in self.step_status.iter_mut().enumerate() {
            if *status != StepStatus::Completed && *status != StepStatus::Error {
                changed.push((self.definition.steps[pos].step_index, *status));
                *status = StepStatus::Error;
            }
        }
        self.state = RunState::Cancelled;
        self.updated_at = Utc::now();
        changed
    }

    /// Observable snapshot. The update counter lives in the order-id
    /// registry, so the caller supplies it.
    pub fn status(&self, update_counter: u64) -> RunStatus {
        RunStatus {
            order_id: self.order_id.clone(),
            definition_name: self.definition.name.clone(),
            state: self.state,
            current_step_index: self.current_step_index,
            update_counter,
            steps: self
                .definition
                .steps
                .iter()
                .zip(self.step_status.iter())
                .map(|(step, status)| StepProgress {
                    step_index: step.step_index,
                    name: step.name.clone(),
                    status: *status,
                })
                .collect(),
        }
    }

    fn position_of(&self, step_index: u32) -> Option<usize> {
        self.definition
            .steps
            .iter()
            .position(|s| s.step_index == step_index)
    }
}
