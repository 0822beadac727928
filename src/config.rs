//! Bus configuration loaded from TOML.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity stamped into every published envelope.
    pub service_name: String,
    pub redis: RedisConfig,
    pub consumer: ConsumerConfig,
    pub retry: RetryConfig,
    pub reconnection: ReconnectionConfig,
    pub health: HealthConfig,
    pub priority: PriorityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Name this process registers under within consumer groups. Must stay
    /// stable across restarts: the startup pending drain only sees entries
    /// delivered to this exact name. Defaults to the service name.
    pub name: Option<String>,
    /// Max entries pulled per blocking read.
    pub batch_size: usize,
    /// Blocking-read timeout; bounds how long cancellation can go unobserved.
    pub block_timeout_ms: u64,
    /// Consecutive transport errors before entering reconnection.
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Base backoff; attempt n waits `base * 4^n`.
    pub base_delay_secs: f64,
    /// How often each stream's retry side-stream is scanned for due records.
    pub replay_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Stream length above which a stream is flagged.
    pub max_stream_length: u64,
    /// Per-group lag above which a stream is flagged.
    pub max_group_lag: u64,
    /// Per-group pending count above which a stream is flagged.
    pub max_group_pending: u64,
}

/// Event types routed to the `:critical` sibling stream when batch-published
/// without an explicit priority.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub critical_event_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "service_name",
            }
            .into());
        }
        if self.redis.url.is_empty() {
            return Err(ConfigError::MissingField { field: "redis.url" }.into());
        }
        if self.consumer.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "consumer.batch_size",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.retry.base_delay_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay_secs",
                reason: "must be positive".into(),
            }
            .into());
        }
        if self.reconnection.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnection.backoff_multiplier",
                reason: "must be >= 1.0".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer.block_timeout_ms)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.retry.replay_interval_secs)
    }
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "management_server".into(),
            redis: RedisConfig::default(),
            consumer: ConsumerConfig::default(),
            retry: RetryConfig::default(),
            reconnection: ReconnectionConfig::default(),
            health: HealthConfig::default(),
            priority: PriorityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".into(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: None,
            batch_size: 10,
            block_timeout_ms: 2000,
            max_consecutive_errors: 5,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            replay_interval_secs: 10,
        }
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_stream_length: 10_000,
            max_group_lag: 100,
            max_group_pending: 50,
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            critical_event_types: vec!["CRITICAL_ALERT".into(), "EMERGENCY_STOP".into()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}
