//! Service configuration
//!
//! Layered: built-in defaults, then an optional config file, then
//! `SENSOR_HUB__SECTION__KEY` environment variables.

use crate::rate_limit::RateLimitConfig;
use config::{Config, ConfigError, Environment, File};
use coordinator::OrphanPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Environment variable naming the config file (without extension)
pub const CONFIG_PATH_ENV: &str = "SENSOR_HUB_CONFIG";

/// Default config file name, resolved against the working directory
pub const DEFAULT_CONFIG_PATH: &str = "sensor-hub";

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub mongo: MongoSettings,
    pub redis: RedisSettings,
    pub coordinator: CoordinatorSettings,
    pub reconcile: ReconcileSettings,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub addr: String,
    /// Max log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Identity store connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://sensors.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Device catalog connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: storage::DEFAULT_DATABASE.to_string(),
            collection: storage::DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// Live reading cache connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    /// Expire readings this long after their last write; unset keeps them
    pub reading_ttl_secs: Option<u64>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            reading_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Deadline per store call (ms)
    pub call_timeout_ms: u64,
}

impl CoordinatorSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: coordinator::DEFAULT_CALL_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Orphan reconciliation schedule
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    /// Sweep interval; unset disables the sweep
    pub interval_secs: Option<u64>,
    pub policy: OrphanPolicy,
    pub page_size: i64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: None,
            policy: OrphanPolicy::Report,
            page_size: 500,
        }
    }
}

impl Settings {
    /// Load from the file named by `SENSOR_HUB_CONFIG` (or `sensor-hub.*`) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (extension optional, file optional) and the environment
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SENSOR_HUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.mongo.database, "MongoDB_");
        assert_eq!(settings.mongo.collection, "sensors");
        assert_eq!(settings.coordinator.call_timeout(), Duration::from_secs(5));
        assert!(settings.reconcile.interval_secs.is_none());
        assert!(settings.rate_limit.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("/nonexistent/sensor-hub-test").unwrap();
        assert_eq!(settings.server.addr, "0.0.0.0:8000");
        assert_eq!(settings.redis.reading_ttl_secs, None);
    }

    #[test]
    fn test_file_overrides_partial_sections() {
        let dir = std::env::temp_dir().join(format!("sensor-hub-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hub.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[redis]\nreading_ttl_secs = 600\n\n[reconcile]\ninterval_secs = 60\npolicy = \"remove\"\n"
        )
        .unwrap();

        let settings = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.redis.reading_ttl_secs, Some(600));
        assert_eq!(settings.redis.url, "redis://127.0.0.1:6379/0");
        assert_eq!(settings.reconcile.interval_secs, Some(60));
        assert_eq!(settings.reconcile.policy, OrphanPolicy::Remove);
        assert_eq!(settings.reconcile.page_size, 500);

        std::fs::remove_dir_all(&dir).ok();
    }
}
