//! Configuration for ExamPulse Telemetry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Main configuration for a tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Period between scheduler ticks
    #[serde(with = "duration_ms")]
    pub emission_period: Duration,

    /// No event within this long means the session is idle
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,

    /// How long raw samples stay in the rolling buffers
    #[serde(with = "duration_ms")]
    pub retention_window: Duration,

    /// How long a streamed packet waits for its ack before the fallback
    #[serde(with = "duration_ms")]
    pub ack_timeout: Duration,

    /// Trailing window for typing speed
    #[serde(with = "duration_ms")]
    pub typing_window: Duration,

    pub chars_per_word: f64,

    /// Where packets are delivered
    pub collector: CollectorEndpoint,

    /// Streaming reconnection behavior
    pub reconnect: ReconnectPolicy,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            emission_period: Duration::from_millis(3_000),
            idle_timeout: Duration::from_millis(2_000),
            retention_window: Duration::from_millis(15_000),
            ack_timeout: Duration::from_millis(3_000),
            typing_window: Duration::from_millis(15_000),
            chars_per_word: 5.0,
            collector: CollectorEndpoint::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TelemetryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exampulse-telemetry")
            .join("config.json")
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("emission_period", self.emission_period),
            ("idle_timeout", self.idle_timeout),
            ("retention_window", self.retention_window),
            ("ack_timeout", self.ack_timeout),
            ("typing_window", self.typing_window),
            ("collector.request_timeout", self.collector.request_timeout),
        ];
        for (name, value) in periods {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        let bounded = periods
            .into_iter()
            .chain([("reconnect.delay", self.reconnect.delay)]);
        for (name, value) in bounded {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {} ms",
                    MAX_DURATION.as_millis()
                )));
            }
        }

        if self.retention_window < self.emission_period {
            return Err(ConfigError::Invalid(
                "retention_window must cover at least one emission_period".to_string(),
            ));
        }
        if self.retention_window < self.typing_window {
            return Err(ConfigError::Invalid(
                "retention_window must cover the typing_window".to_string(),
            ));
        }
        if !(self.chars_per_word > 0.0) {
            return Err(ConfigError::Invalid(
                "chars_per_word must be positive".to_string(),
            ));
        }
        if self.collector.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("collector base_url is empty".to_string()));
        }
        Ok(())
    }
}

/// Remote collector location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorEndpoint {
    /// Base URL for the fallback request channel
    pub base_url: String,

    /// Path appended to `base_url` for fallback posts
    pub fallback_path: String,

    /// `host:port` of the streaming channel; no streaming when unset
    pub stream_addr: Option<String>,

    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for CollectorEndpoint {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            fallback_path: "/api/events".to_string(),
            stream_addr: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl CollectorEndpoint {
    /// Full URL of the fallback endpoint.
    pub fn fallback_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.fallback_path)
    }

    /// Health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url.trim_end_matches('/'))
    }
}

/// How the streaming connection is re-established after it drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,

    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1_000),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.emission_period, Duration::from_millis(3_000));
        assert_eq!(config.idle_timeout, Duration::from_millis(2_000));
        assert_eq!(config.retention_window, Duration::from_millis(15_000));
        assert_eq!(config.ack_timeout, Duration::from_millis(3_000));
        assert_eq!(config.chars_per_word, 5.0);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(TelemetryConfig::default()).unwrap();
        assert_eq!(json["emission_period"], 3_000);
        assert_eq!(json["collector"]["request_timeout"], 10_000);
        assert_eq!(json["reconnect"]["delay"], 1_000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"idle_timeout": 5000, "collector": {"stream_addr": "127.0.0.1:5001"}}"#)
                .unwrap();
        assert_eq!(config.idle_timeout, Duration::from_millis(5_000));
        assert_eq!(config.emission_period, Duration::from_millis(3_000));
        assert_eq!(config.collector.stream_addr.as_deref(), Some("127.0.0.1:5001"));
        assert_eq!(config.collector.fallback_path, "/api/events");
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let mut config = TelemetryConfig::default();
        config.emission_period = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = TelemetryConfig::default();
        config.retention_window = Duration::from_millis(1_000);
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.typing_window = Duration::from_millis(30_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let huge = Duration::from_millis(100_000_000_000_000_000);

        let mut config = TelemetryConfig::default();
        config.retention_window = huge;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = TelemetryConfig::default();
        config.emission_period = huge;
        config.retention_window = huge;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.reconnect.delay = MAX_DURATION + Duration::from_millis(1);
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.retention_window = MAX_DURATION;
        config.typing_window = MAX_DURATION;
        config.emission_period = MAX_DURATION;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collector_urls() {
        let endpoint = CollectorEndpoint {
            base_url: "http://127.0.0.1:8080/".to_string(),
            ..Default::default()
        };
        assert_eq!(endpoint.fallback_url(), "http://127.0.0.1:8080/api/events");
        assert_eq!(endpoint.health_url(), "http://127.0.0.1:8080/health");
    }
}
