//! Application configuration.
//!
//! Aggregates configuration for the broker, topics, readiness barrier,
//! timeout sweep, and dispatch policy into a single Config struct that can
//! be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::broker::MessagingConfig;
use crate::utils::retry::RetryConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REMIT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REMIT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REMIT_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging configuration (broker selection + connection).
    pub messaging: MessagingConfig,
    /// Topic names, partition counts, and group naming.
    pub topics: TopicsConfig,
    /// Startup readiness barrier configuration.
    pub readiness: ReadinessConfig,
    /// Periodic timeout-sweep configuration.
    pub sweep: SweepConfig,
    /// Command dispatch configuration.
    pub dispatch: DispatchConfig,
}

/// A topic name plus its operator-configured partition count.
///
/// The partition count must match the broker-side topic configuration; it
/// is what the readiness barrier compares assignments against.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: usize,
}

/// Topic configuration.
///
/// Topic names are configuration, not protocol: they must match on both
/// the publishing and the processing side of the deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Default command topic.
    pub commands: String,
    /// Result topic for failed commands.
    pub failed_results: TopicSpec,
    /// Result topic for successfully handled commands.
    pub handled_results: TopicSpec,
    /// Prefix for the per-instance result consumer groups.
    pub group_prefix: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            commands: "commands".to_string(),
            failed_results: TopicSpec {
                name: "command-results.failed".to_string(),
                partitions: 4,
            },
            handled_results: TopicSpec {
                name: "command-results.handled".to_string(),
                partitions: 4,
            },
            group_prefix: "remit-results".to_string(),
        }
    }
}

/// Readiness barrier configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum wait before startup fails, in milliseconds.
    pub max_wait_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_wait_ms: 60_000,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Timeout-sweep configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Sweep interval in milliseconds. Bounds how late a timeout can fire.
    pub interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Command dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-request timeout applied when the caller does not pass one,
    /// in milliseconds.
    pub default_timeout_ms: u64,
    /// Publish retry policy for transient broker failures.
    pub publish_retry: RetrySettings,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            publish_retry: RetrySettings::default(),
        }
    }
}

impl DispatchConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Serde-facing mirror of `RetryConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::for_publish();
        Self {
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            max_retries: retry.max_retries,
            jitter: retry.jitter,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_retries: settings.max_retries,
            jitter: settings.jitter,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `REMIT_CONFIG` environment variable (if set)
    /// 4. Environment variables with `REMIT` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
