//! Detector configuration.
//!
//! Layers, last one wins: built-in defaults, an optional JSON file, then
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use handsign_socket::{ConnectionConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Environment variable overriding the inference endpoint.
pub const ENV_WS_URL: &str = "HANDSIGN_WS_URL";
/// Environment variable overriding the dispatch interval (milliseconds).
pub const ENV_PROCESS_INTERVAL_MS: &str = "HANDSIGN_PROCESS_INTERVAL_MS";
/// Environment variable overriding the consecutive-match threshold.
pub const ENV_CONSECUTIVE_THRESHOLD: &str = "HANDSIGN_CONSECUTIVE_THRESHOLD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub ws_url: String,
    pub process_interval_ms: u64,
    pub consecutive_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub reconnect_settle_ms: u64,
    pub restart_delay_ms: u64,
    pub prediction_ttl_ms: u64,
    /// Render the skeleton overlay on the preview surface. When false, any
    /// overlay a capture factory supplies is dropped before capture starts.
    pub draw_overlay: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            process_interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            consecutive_threshold: DEFAULT_CONSECUTIVE_THRESHOLD,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_settle_ms: DEFAULT_RECONNECT_SETTLE_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            prediction_ttl_ms: DEFAULT_PREDICTION_TTL_MS,
            draw_overlay: true,
        }
    }
}

impl DetectorConfig {
    /// Defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_WS_URL) {
            let url = url.trim();
            if !url.is_empty() {
                self.ws_url = url.to_string();
            }
        }
        if let Some(value) = lookup(ENV_PROCESS_INTERVAL_MS) {
            self.process_interval_ms = parse_env(ENV_PROCESS_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_CONSECUTIVE_THRESHOLD) {
            self.consecutive_threshold = parse_env(ENV_CONSECUTIVE_THRESHOLD, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_url.trim().is_empty() {
            return Err(ConfigError::Invalid("ws_url must not be empty".to_string()));
        }
        if self.process_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "process_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.consecutive_threshold == 0 {
            return Err(ConfigError::Invalid(
                "consecutive_threshold must be greater than zero".to_string(),
            ));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_reconnect_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            policy: ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
                retry_delay: Duration::from_millis(self.reconnect_delay_ms),
            },
            reconnect_settle: Duration::from_millis(self.reconnect_settle_ms),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn prediction_ttl(&self) -> Duration {
        Duration::from_millis(self.prediction_ttl_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.process_interval_ms, 250);
        assert_eq!(config.consecutive_threshold, 6);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ws_url": "http://ml.local:9000", "consecutive_threshold": 4}}"#).unwrap();

        let config = DetectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ws_url, "http://ml.local:9000");
        assert_eq!(config.consecutive_threshold, 4);
        assert_eq!(config.process_interval_ms, 250);
    }

    #[test]
    fn test_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            DetectorConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            DetectorConfig::from_file(Path::new("/nonexistent/handsign.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DetectorConfig::default();
        config
            .apply_env(env(&[
                (ENV_WS_URL, "https://signs.example.com"),
                (ENV_PROCESS_INTERVAL_MS, "100"),
                (ENV_CONSECUTIVE_THRESHOLD, " 3 "),
            ]))
            .unwrap();

        assert_eq!(config.ws_url, "https://signs.example.com");
        assert_eq!(config.process_interval_ms, 100);
        assert_eq!(config.consecutive_threshold, 3);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = DetectorConfig::default();
        let err = config
            .apply_env(env(&[(ENV_PROCESS_INTERVAL_MS, "fast")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                key: ENV_PROCESS_INTERVAL_MS,
                ..
            }
        ));
    }

    #[test]
    fn test_validation_rejects_zero() {
        let config = DetectorConfig {
            consecutive_threshold: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = DetectorConfig {
            process_interval_ms: 0,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_config() {
        let config = DetectorConfig::default();
        let connection = config.connection();
        assert_eq!(connection.url, DEFAULT_WS_URL);
        assert_eq!(connection.policy.max_attempts, 5);
        assert_eq!(connection.policy.retry_delay, Duration::from_millis(2000));
        assert_eq!(connection.reconnect_settle, Duration::from_millis(500));
    }
}
