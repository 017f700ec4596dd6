//! # apsflow Core
//!
//! Core value types and deterministic logic for the apsflow workflow
//! sequence engine.
//!
//! This crate contains:
//! - Recipe and run definitions (`SequenceDefinition` / `SequenceStep` /
//!   `RunningSequence`)
//! - The template renderer (`{{name}}` substitution over topics and
//!   payload trees)
//! - The order-id registry (stable `orderId`, monotone `orderUpdateId`)
//!
//! This crate does NOT care about:
//! - How messages reach the bus
//! - Where recipes are stored
//! - How the engine schedules waits

pub mod registry;
pub mod render;
pub mod types;

pub use registry::{OrderIdRegistry, RegistryError};
pub use render::{
    placeholder_names, render_str, render_value, RenderContext, RenderError, INJECTED_KEYS,
    KEY_ACTION_ID, KEY_ORDER_ID, KEY_ORDER_UPDATE_ID,
};
pub use types::{
    OrderId, RunState, RunStatus, RunningSequence, SequenceDefinition, SequenceStep, StepProgress,
    StepStatus, WaitIntent,
};
