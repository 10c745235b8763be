// Configuration for the feed session controller

use crate::frame::ReferenceFrame;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reference frame the detection service reports boxes in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: crate::frame::REFERENCE_WIDTH,
            height: crate::frame::REFERENCE_HEIGHT,
        }
    }
}

/// Feed reconnect policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed after the first failed load
    pub max_attempts: u32,
    /// Fixed delay before each reload
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
        }
    }
}

/// Detection polling cadence and bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            fetch_timeout_ms: 3000,
            fallback_timeout_ms: 3000,
        }
    }
}

/// Image feed timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Upper bound on a single frame load
    pub load_timeout_ms: u64,
    /// How often the camera registry is asked for the camera status
    pub status_poll_interval_ms: u64,
    /// Refresh interval used when a camera does not advertise a frame rate
    pub default_refresh_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 5000,
            status_poll_interval_ms: 2000,
            default_refresh_ms: 1000,
        }
    }
}

/// Base URLs of the external collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub detection_url: String,
    pub connectivity_url: String,
    pub image_url: String,
    pub registry_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            detection_url: "http://localhost:8000".to_string(),
            connectivity_url: "http://localhost:8000".to_string(),
            image_url: "http://localhost:8000".to_string(),
            registry_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub reference_frame: FrameConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub feed: FeedConfig,
    pub endpoints: EndpointConfig,
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reference_frame: FrameConfig::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            feed: FeedConfig::default(),
            endpoints: EndpointConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string, trying JSON, TOML, then YAML
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<ControllerConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<ControllerConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<ControllerConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Defaults overridden by `SHELFWATCH_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `SHELFWATCH_*` overrides from the given lookup.
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SHELFWATCH_DETECTION_URL") {
            self.endpoints.detection_url = url;
        }
        if let Some(url) = lookup("SHELFWATCH_CONNECTIVITY_URL") {
            self.endpoints.connectivity_url = url;
        }
        if let Some(url) = lookup("SHELFWATCH_IMAGE_URL") {
            self.endpoints.image_url = url;
        }
        if let Some(url) = lookup("SHELFWATCH_REGISTRY_URL") {
            self.endpoints.registry_url = url;
        }
        if let Some(level) = lookup("SHELFWATCH_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(v) = lookup("SHELFWATCH_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = v;
        }
        if let Some(v) = lookup("SHELFWATCH_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.retry.delay_ms = v;
        }
        if let Some(v) = lookup("SHELFWATCH_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poll.interval_ms = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reference_frame()?;

        if self.retry.delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "retry.delay_ms must be > 0".to_string(),
            ));
        }

        if self.poll.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll.interval_ms must be > 0".to_string(),
            ));
        }

        if self.poll.fetch_timeout_ms == 0 || self.poll.fallback_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll timeouts must be > 0".to_string(),
            ));
        }

        if self.feed.load_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "feed.load_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.feed.status_poll_interval_ms == 0 || self.feed.default_refresh_ms == 0 {
            return Err(ConfigError::ValidationError(
                "feed intervals must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reference_frame(&self) -> Result<ReferenceFrame, ConfigError> {
        ReferenceFrame::new(self.reference_frame.width, self.reference_frame.height)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.fetch_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.fallback_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.feed.load_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed.status_poll_interval_ms)
    }

    pub fn default_refresh(&self) -> Duration {
        Duration::from_millis(self.feed.default_refresh_ms)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = ControllerConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(2000));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.reference_frame().unwrap(), ReferenceFrame::HD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_area_frame() {
        let mut config = ControllerConfig::default();
        config.reference_frame.height = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_intervals() {
        let mut config = ControllerConfig::default();
        config.poll.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.retry.delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.feed.load_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config = ControllerConfig::from_str(
            r#"
            log_level = "debug"

            [retry]
            max_attempts = 5

            [endpoints]
            detection_url = "http://detector:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay_ms, 2000);
        assert_eq!(config.endpoints.detection_url, "http://detector:9000");
        assert_eq!(config.endpoints.image_url, "http://localhost:8000");
    }

    #[test]
    fn test_config_from_json() {
        let config = ControllerConfig::from_str(r#"{"poll": {"interval_ms": 500}}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\nload_timeout_ms = 750").unwrap();
        let config = ControllerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.load_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_config_from_missing_file() {
        let result = ControllerConfig::from_file("/nonexistent/shelfwatch.toml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SHELFWATCH_IMAGE_URL", "http://cams.local"),
            ("SHELFWATCH_MAX_RETRIES", "7"),
            ("SHELFWATCH_POLL_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ControllerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoints.image_url, "http://cams.local");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.poll.interval_ms, 1000);
    }
}
