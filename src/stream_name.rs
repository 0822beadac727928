//! Stream naming convention and the platform stream catalog.
//!
//! Every production stream is named `{service}:{direction}:{purpose}` with each
//! segment drawn from a closed vocabulary. A name that violates the convention
//! is a configuration error rejected before first use, never tolerated at
//! publish time. Derived side-streams (`:retry`, `:dead`, `:critical`) are
//! internal and exempt from the three-segment rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::Priority;
use crate::error::ConfigError;

const VALID_SERVICES: &[&str] = &[
    "mgmt",
    "trading",
    "backtesting",
    "freqai",
    "system",
    "audit",
    "monitoring",
    "svc",
    "test",
];

const VALID_DIRECTIONS: &[&str] = &[
    "trading",
    "backtesting",
    "freqai",
    "mgmt",
    "events",
    "health",
    "trail",
    "other",
    "test",
];

const VALID_PURPOSES: &[&str] = &[
    "commands",
    "results",
    "status",
    "events",
    "health",
    "trail",
    "emergency",
    "alerts",
];

/// A validated `service:direction:purpose` stream name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Validate and wrap a raw stream name.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let invalid = |reason: &str| ConfigError::InvalidStreamName {
            name: raw.clone(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid("expected exactly 3 colon-separated segments"));
        }
        let (service, direction, purpose) = (parts[0], parts[1], parts[2]);
        if !VALID_SERVICES.contains(&service) {
            return Err(invalid(&format!("unknown service segment '{service}'")));
        }
        if !VALID_DIRECTIONS.contains(&direction) {
            return Err(invalid(&format!("unknown direction segment '{direction}'")));
        }
        if !VALID_PURPOSES.contains(&purpose) {
            return Err(invalid(&format!("unknown purpose segment '{purpose}'")));
        }
        Ok(StreamName(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Per-stream retry side-stream.
    pub fn retry_stream(&self) -> String {
        format!("{}:retry", self.0)
    }

    /// Per-stream dead-letter stream.
    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dead", self.0)
    }

    /// Sibling stream carrying critical-priority traffic.
    pub fn critical_stream(&self) -> String {
        format!("{}:critical", self.0)
    }

    /// Target stream for a given publish priority.
    pub fn target_for(&self, priority: Priority) -> String {
        match priority {
            Priority::Critical => self.critical_stream(),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StreamName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        StreamName::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Well-known platform streams.
///
/// Command streams flow management → service, result and status streams flow
/// service → management.
pub mod catalog {
    pub const MGMT_TRADING_COMMANDS: &str = "mgmt:trading:commands";
    pub const TRADING_MGMT_STATUS: &str = "trading:mgmt:status";
    pub const TRADING_MGMT_RESULTS: &str = "trading:mgmt:results";

    pub const MGMT_BACKTESTING_COMMANDS: &str = "mgmt:backtesting:commands";
    pub const BACKTESTING_MGMT_RESULTS: &str = "backtesting:mgmt:results";
    pub const BACKTESTING_MGMT_STATUS: &str = "backtesting:mgmt:status";

    pub const MGMT_FREQAI_COMMANDS: &str = "mgmt:freqai:commands";
    pub const FREQAI_MGMT_RESULTS: &str = "freqai:mgmt:results";
    pub const FREQAI_MGMT_STATUS: &str = "freqai:mgmt:status";

    pub const SYSTEM_EVENTS: &str = "system:events:events";
    pub const SYSTEM_HEALTH: &str = "system:health:health";
    pub const AUDIT_EVENTS: &str = "audit:trail:events";

    pub const MANAGEMENT_CONSUMERS: &str = "management_consumers";
    pub const TRADING_CONSUMERS: &str = "trading_consumers";
    pub const BACKTESTING_CONSUMERS: &str = "backtesting_consumers";
    pub const FREQAI_CONSUMERS: &str = "freqai_consumers";
    pub const MONITORING_CONSUMERS: &str = "monitoring_consumers";
    pub const AUDIT_CONSUMERS: &str = "audit_consumers";

    /// All configured streams, used by system-wide health aggregation.
    pub fn all_streams() -> Vec<&'static str> {
        vec![
            MGMT_TRADING_COMMANDS,
            TRADING_MGMT_STATUS,
            TRADING_MGMT_RESULTS,
            MGMT_BACKTESTING_COMMANDS,
            BACKTESTING_MGMT_RESULTS,
            BACKTESTING_MGMT_STATUS,
            MGMT_FREQAI_COMMANDS,
            FREQAI_MGMT_RESULTS,
            FREQAI_MGMT_STATUS,
            SYSTEM_EVENTS,
            SYSTEM_HEALTH,
            AUDIT_EVENTS,
        ]
    }

    /// Consumer group reading each stream.
    pub fn consumer_group(stream: &str) -> &'static str {
        match stream {
            MGMT_TRADING_COMMANDS => TRADING_CONSUMERS,
            MGMT_BACKTESTING_COMMANDS => BACKTESTING_CONSUMERS,
            MGMT_FREQAI_COMMANDS => FREQAI_CONSUMERS,
            TRADING_MGMT_STATUS | TRADING_MGMT_RESULTS | BACKTESTING_MGMT_RESULTS
            | BACKTESTING_MGMT_STATUS | FREQAI_MGMT_RESULTS | FREQAI_MGMT_STATUS => {
                MANAGEMENT_CONSUMERS
            }
            SYSTEM_EVENTS | SYSTEM_HEALTH => MONITORING_CONSUMERS,
            AUDIT_EVENTS => AUDIT_CONSUMERS,
            _ => "default_consumers",
        }
    }
}
