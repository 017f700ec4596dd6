//! # apsflow Config
//!
//! Unified single-file configuration for the apsflow operations layer.
//! A single `apsflow.yaml` configures the bus connection, the sequence
//! engine, and the recipe catalog.

mod loader;

pub use loader::{load_config, ConfigError, ConfigManager, ConfigWatcher};

use std::path::PathBuf;

use apsflow_bus::LastWill;
use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ApsConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

fn default_version() -> u32 {
    1
}

impl Default for ApsConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            bus: BusSettings::default(),
            engine: EngineSettings::default(),
            catalog: CatalogSettings::default(),
        }
    }
}

/// Transport connection surface observed by the engine layer.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Retained "offline" announcement published by the transport on
    /// disconnect; owned by the adapter, never by the engine.
    #[serde(default)]
    pub last_will: Option<LastWill>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            keepalive_secs: default_keepalive(),
            clean_session: true,
            username: None,
            password: None,
            tls: false,
            last_will: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "apsflow-ops".to_string()
}

fn default_keepalive() -> u16 {
    60
}

fn default_true() -> bool {
    true
}

/// Sequence engine tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Default wait applied to steps without an explicit intent, in
    /// seconds. Downstream modules ack out-of-band, so this is an
    /// advance trigger rather than a failure deadline.
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: f64,
    /// Capacity of the run-event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Capacity of the engine command channel.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_wait_secs: default_wait_secs(),
            event_capacity: default_event_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

fn default_wait_secs() -> f64 {
    5.0
}

fn default_event_capacity() -> usize {
    1024
}

fn default_command_capacity() -> usize {
    256
}

/// Recipe catalog location.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    #[serde(default = "default_recipe_dir")]
    pub recipe_dir: PathBuf,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            recipe_dir: default_recipe_dir(),
        }
    }
}

fn default_recipe_dir() -> PathBuf {
    PathBuf::from("recipes")
}
