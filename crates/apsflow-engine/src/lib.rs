//! # apsflow Engine
//!
//! The workflow sequence engine: runs recipes step by step, publishing
//! each step onto the factory bus and advancing on message predicates or
//! timeouts. One dispatch task owns all run state; callers talk to it
//! through the `SequenceEngine` handle.

mod coordinator;
mod engine;
mod events;

pub use coordinator::{subset_matches, MessagePredicate, WaitCoordinator, WaitFired};
pub use engine::{EngineConfig, EngineError, SequenceEngine};
pub use events::{RunEvent, RunEventBus};
