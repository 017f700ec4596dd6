//! Configuration loading and hot-reload support.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::ApsConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("File watch error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full apsflow configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ApsConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ApsConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ApsConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.bus.host.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "bus.host must not be empty".to_string(),
        ));
    }

    if config.bus.port == 0 {
        return Err(ConfigError::Invalid("bus.port must be > 0".to_string()));
    }

    if config.bus.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "bus.client_id must not be empty".to_string(),
        ));
    }

    if config.bus.keepalive_secs == 0 {
        return Err(ConfigError::Invalid(
            "bus.keepalive_secs must be > 0".to_string(),
        ));
    }

    if let Some(will) = &config.bus.last_will {
        if will.topic.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "bus.last_will.topic must not be empty".to_string(),
            ));
        }
    }

    if !config.engine.default_wait_secs.is_finite() || config.engine.default_wait_secs <= 0.0 {
        return Err(ConfigError::Invalid(
            "engine.default_wait_secs must be a positive number".to_string(),
        ));
    }

    if config.engine.event_capacity == 0 {
        return Err(ConfigError::Invalid(
            "engine.event_capacity must be > 0".to_string(),
        ));
    }

    if config.engine.command_capacity == 0 {
        return Err(ConfigError::Invalid(
            "engine.command_capacity must be > 0".to_string(),
        ));
    }

    if config.catalog.recipe_dir.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(
            "catalog.recipe_dir must not be empty".to_string(),
        ));
    }

    Ok(())
}

/// Manages unified configuration with hot-reload support.
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<ApsConfig>>,
}

impl ConfigManager {
    /// Create a new config manager.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(ApsConfig::default())),
        }
    }

    /// Get a reference to the current config.
    pub fn config(&self) -> Arc<RwLock<ApsConfig>> {
        self.config.clone()
    }

    /// Load configuration from file.
    pub async fn load(&self) -> Result<(), ConfigError> {
        let config = load_config(&self.path)?;
        let mut current = self.config.write().await;
        *current = config;
        Ok(())
    }

    /// Start watching for config file changes.
    pub fn start_watching(self: &Arc<Self>) -> Result<ConfigWatcher, ConfigError> {
        let manager = Arc::clone(self);
        let handle = tokio::runtime::Handle::current();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        let manager = Arc::clone(&manager);
                        handle.spawn(async move {
                            if let Err(e) = manager.load().await {
                                tracing::error!("failed to reload config: {}", e);
                            } else {
                                tracing::info!("config reloaded");
                            }
                        });
                    }
                }
            })?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        Ok(ConfigWatcher { _watcher: watcher })
    }
}

/// Keeps the file watcher alive.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApsConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.bus.port, 1883);
        assert_eq!(config.engine.default_wait_secs, 5.0);
    }

    #[test]
    fn test_rejects_zero_default_wait() {
        let mut config = ApsConfig::default();
        config.engine.default_wait_secs = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_empty_last_will_topic() {
        let mut config = ApsConfig::default();
        config.bus.last_will = Some(apsflow_bus::LastWill {
            topic: "  ".to_string(),
            payload: serde_json::Value::Null,
            retain: true,
        });
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
version: 1
bus:
  host: broker.local
  port: 8883
  tls: true
  client_id: ops-1
  last_will:
    topic: ops/connection
    payload:
      connected: false
    retain: true
engine:
  default_wait_secs: 2.5
catalog:
  recipe_dir: /etc/apsflow/recipes
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.bus.host, "broker.local");
        assert_eq!(config.bus.port, 8883);
        assert!(config.bus.tls);
        assert!(config.bus.clean_session);
        assert_eq!(config.engine.default_wait_secs, 2.5);
        assert_eq!(
            config.catalog.recipe_dir,
            PathBuf::from("/etc/apsflow/recipes")
        );
        let will = config.bus.last_will.unwrap();
        assert_eq!(will.topic, "ops/connection");
        assert!(will.retain);
    }

    #[test]
    fn test_config_manager_load() {
        tokio_test::block_on(async {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "version: 1").unwrap();

            let manager = ConfigManager::new(file.path());
            manager.load().await.unwrap();

            let config = manager.config();
            let guard = config.read().await;
            assert_eq!(guard.bus.client_id, "apsflow-ops");
        });
    }
}
