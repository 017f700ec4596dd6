//! # apsflow Bus
//!
//! The bus adapter contract for the apsflow sequence engine, plus an
//! in-process implementation.
//!
//! This crate provides:
//! - `BusAdapter` trait (publish / subscribe / inbound / last-will)
//! - `InMemoryBus` for tests and local development
//! - MQTT-style topic pattern matching for transport subscriptions

mod adapter;
mod memory;
mod topic;

pub use adapter::{BusAdapter, BusError, InboundMessage, LastWill};
pub use memory::InMemoryBus;
pub use topic::topic_matches;
