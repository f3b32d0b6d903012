//! Configuration for the ESS client.
//!
//! Loads a TOML file with environment variable substitution; every section
//! falls back to sane defaults so a bare deployment only needs connection
//! URLs.
//!
//! # Example
//!
//! ```toml
//! [census]
//! service_id = "${CENSUS_SERVICE_ID}"
//! worlds = ["all"]
//!
//! [queue]
//! url = "${REDIS_URL}"
//! stream = "warpgate:alerts"
//!
//! [store]
//! url = "${MONGODB_URL}"
//! database = "warpgate"
//! collection = "alerts"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EssConfig {
    #[serde(default)]
    pub census: CensusConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Census push service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CensusConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// World ids to subscribe to, or `["all"]`
    #[serde(default = "default_worlds")]
    pub worlds: Vec<String>,
}

impl CensusConfig {
    /// Full websocket URL including environment and service id.
    pub fn url(&self) -> String {
        format!(
            "{}?environment={}&service-id={}",
            self.endpoint, self.environment, self.service_id
        )
    }
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            environment: default_environment(),
            service_id: default_service_id(),
            worlds: default_worlds(),
        }
    }
}

fn default_endpoint() -> String {
    "wss://push.nanite-systems.net/streaming".to_string()
}

fn default_environment() -> String {
    "ps2".to_string()
}

fn default_service_id() -> String {
    "s:example".to_string()
}

fn default_worlds() -> Vec<String> {
    vec!["all".to_string()]
}

/// Redis Stream (queue sink) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_stream")]
    pub stream: String,

    /// Approximate stream length cap (`XADD MAXLEN ~`), unbounded if unset
    #[serde(default)]
    pub max_len: Option<usize>,

    #[serde(default = "default_sink_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            stream: default_stream(),
            max_len: None,
            publish_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_stream() -> String {
    crate::ALERT_STREAM_NAME.to_string()
}

fn default_sink_timeout_ms() -> u64 {
    5000
}

/// MongoDB (store sink) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_mongodb_url")]
    pub url: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_sink_timeout_ms")]
    pub insert_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_mongodb_url(),
            database: default_database(),
            collection: default_collection(),
            insert_timeout_ms: default_sink_timeout_ms(),
        }
    }
}

fn default_mongodb_url() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "warpgate".to_string()
}

fn default_collection() -> String {
    "alerts".to_string()
}

/// Subscriber reconnect configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,

    /// Silence window before the subscription is considered degraded
    #[serde(default = "default_heartbeat_window_secs")]
    pub heartbeat_window_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_ms(),
            max_delay_ms: default_reconnect_max_ms(),
            heartbeat_window_secs: default_heartbeat_window_secs(),
        }
    }
}

fn default_reconnect_initial_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    60000
}

fn default_heartbeat_window_secs() -> u64 {
    60
}

/// Sink retry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> crate::dispatch::RetryPolicy {
        crate::dispatch::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    250
}

fn default_retry_max_ms() -> u64 {
    5000
}

/// Graceful shutdown configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

fn default_grace_secs() -> u64 {
    30
}

impl EssConfig {
    /// Load configuration from the default path or WARPGATE_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("WARPGATE_CONFIG").unwrap_or_else(|_| "config/warpgate.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: EssConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            endpoint = %config.census.endpoint,
            stream = %config.queue.stream,
            collection = %config.store.collection,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.census.endpoint.starts_with("ws://") && !self.census.endpoint.starts_with("wss://")
        {
            return Err(ConfigError::ValidationError(format!(
                "census endpoint must start with ws:// or wss://, got '{}'",
                self.census.endpoint
            )));
        }

        if !self.queue.url.starts_with("redis://") && !self.queue.url.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(format!(
                "queue URL must start with redis:// or rediss://, got '{}'",
                self.queue.url
            )));
        }

        if !self.store.url.starts_with("mongodb://")
            && !self.store.url.starts_with("mongodb+srv://")
        {
            return Err(ConfigError::ValidationError(format!(
                "store URL must start with mongodb:// or mongodb+srv://, got '{}'",
                self.store.url
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "reconnect.initial_delay_ms must not exceed reconnect.max_delay_ms".to_string(),
            ));
        }

        // Unsubstituted env vars in the service id are common in dev; warn,
        // Census accepts s:example with rate limits.
        if self.census.service_id.contains("${") {
            warn!(
                service_id = %self.census.service_id,
                "Census service id contains an unsubstituted environment variable"
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ESS_TEST_VAR", "substituted_value");
        let input = "url = \"${ESS_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("ESS_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${ESS_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${ESS_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = EssConfig::default();
        assert_eq!(
            config.census.endpoint,
            "wss://push.nanite-systems.net/streaming"
        );
        assert_eq!(config.census.worlds, vec!["all"]);
        assert_eq!(config.queue.url, "redis://localhost:6379");
        assert_eq!(config.queue.stream, "warpgate:alerts");
        assert_eq!(config.store.database, "warpgate");
        assert_eq!(config.store.collection, "alerts");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_census_url() {
        let config = CensusConfig {
            service_id: "s:warpgate".to_string(),
            ..CensusConfig::default()
        };
        assert_eq!(
            config.url(),
            "wss://push.nanite-systems.net/streaming?environment=ps2&service-id=s:warpgate"
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [census]
            worlds = ["17", "13"]

            [queue]
            stream = "test:alerts"
            max_len = 10000

            [retry]
            max_attempts = 5
        "#;

        let config: EssConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.census.worlds, vec!["17", "13"]);
        assert_eq!(config.queue.stream, "test:alerts");
        assert_eq!(config.queue.max_len, Some(10000));
        assert_eq!(config.retry.max_attempts, 5);
        // Unset sections keep their defaults.
        assert_eq!(config.store.collection, "alerts");
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn test_validation_bad_endpoint() {
        let toml = r#"
            [census]
            endpoint = "https://example.com"
        "#;

        let config: EssConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_attempts() {
        let toml = r#"
            [retry]
            max_attempts = 0
        "#;

        let config: EssConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_inverted_backoff_bounds() {
        let toml = r#"
            [reconnect]
            initial_delay_ms = 5000
            max_delay_ms = 1000
        "#;

        let config: EssConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [store]
            database = "warpgate_dev"

            [shutdown]
            grace_secs = 10
            "#
        )
        .unwrap();

        let config = EssConfig::load_from(file.path()).unwrap();
        assert_eq!(config.store.database, "warpgate_dev");
        assert_eq!(config.shutdown.grace_secs, 10);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EssConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.queue.stream, "warpgate:alerts");
    }

    #[test]
    fn test_retry_policy_conversion() {
        let config = RetryConfig {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 800,
        };
        let policy = config.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, std::time::Duration::from_millis(100));
        assert_eq!(policy.max_delay, std::time::Duration::from_millis(800));
    }
}
