//! Message envelope and its flat string codec.
//!
//! The log store only transports flat string-keyed records, so every envelope
//! field is JSON-encoded into its own string on the way out and JSON-decoded
//! on the way in. The codec must round-trip exactly: `decode(encode(e)) == e`.
//!
//! Retry and dead-letter bookkeeping (`retry_count`, `retry_at`, …) travels in
//! the same flat record but is not part of [`Envelope`]; see [`fields`] for the
//! helpers that read and write those keys at the record level.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Delivery priority tier.
///
/// `Critical` re-routes the message to the `{stream}:critical` sibling stream
/// at publish time; the other three tiers share the main stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(DecodeError::UnknownPriority(other.to_string())),
        }
    }

    /// Numeric weight for ordering, higher is more urgent.
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Critical => 100,
            Priority::High => 75,
            Priority::Normal => 50,
            Priority::Low => 25,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of transport on the bus.
///
/// Immutable once published; identity is the log store's entry id, never a
/// field inside the envelope. The bus passes `data` through opaquely.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub source: String,
    /// Unix seconds, stamped at publish time.
    pub timestamp: f64,
    pub version: u32,
    pub priority: Priority,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        data: Map<String, Value>,
        source: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            source: source.into(),
            timestamp: unix_now(),
            version: 1,
            priority,
        }
    }

    /// Flatten into the log store's string-keyed record format.
    ///
    /// Every value is JSON-encoded, including plain strings, so the inverse
    /// is uniform JSON parsing per field.
    pub fn encode(&self) -> Vec<(String, String)> {
        let json_str = |v: &Value| serde_json::to_string(v).expect("JSON value serializes");
        vec![
            ("type".into(), json_str(&Value::String(self.event_type.clone()))),
            ("data".into(), json_str(&Value::Object(self.data.clone()))),
            ("source".into(), json_str(&Value::String(self.source.clone()))),
            ("timestamp".into(), format_f64(self.timestamp)),
            ("version".into(), self.version.to_string()),
            (
                "priority".into(),
                json_str(&Value::String(self.priority.as_str().into())),
            ),
        ]
    }

    /// Exact inverse of [`Envelope::encode`].
    ///
    /// Records written before the priority tier existed carry no `priority`
    /// key; those decode as [`Priority::Normal`]. Unknown keys (retry and
    /// dead-letter bookkeeping) are ignored here and handled at the record
    /// level by [`fields`].
    pub fn decode(record: &[(String, String)]) -> Result<Self, DecodeError> {
        let get = |field: &'static str| -> Result<&str, DecodeError> {
            record
                .iter()
                .find(|(k, _)| k == field)
                .map(|(_, v)| v.as_str())
                .ok_or(DecodeError::MissingField { field })
        };
        let json = |field: &'static str, raw: &str| -> Result<Value, DecodeError> {
            serde_json::from_str(raw).map_err(|source| DecodeError::Json {
                field: field.to_string(),
                source,
            })
        };

        let string = |field: &'static str| -> Result<String, DecodeError> {
            match json(field, get(field)?)? {
                Value::String(s) => Ok(s),
                _ => Err(DecodeError::Json {
                    field: field.to_string(),
                    source: serde::de::Error::custom("expected a JSON string"),
                }),
            }
        };

        let event_type = string("type")?;
        let data = match json("data", get("data")?)? {
            Value::Object(map) => map,
            _ => {
                return Err(DecodeError::Json {
                    field: "data".into(),
                    source: serde::de::Error::custom("expected a JSON object"),
                })
            }
        };
        let source = string("source")?;
        let timestamp = json("timestamp", get("timestamp")?)?
            .as_f64()
            .ok_or_else(|| DecodeError::Json {
                field: "timestamp".into(),
                source: serde::de::Error::custom("expected a number"),
            })?;
        let version = json("version", get("version")?)?
            .as_u64()
            .ok_or_else(|| DecodeError::Json {
                field: "version".into(),
                source: serde::de::Error::custom("expected an integer"),
            })? as u32;

        let priority = match record.iter().find(|(k, _)| k == "priority") {
            Some((_, raw)) => match json("priority", raw)? {
                Value::String(s) => Priority::parse(&s)?,
                other => return Err(DecodeError::UnknownPriority(other.to_string())),
            },
            None => Priority::Normal,
        };

        Ok(Self {
            event_type,
            data,
            source,
            timestamp,
            version,
            priority,
        })
    }
}

/// Current time as fractional unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// Serialize a float the way serde_json does, so the codec stays uniform
// (`1692700000.5` round-trips through `json("timestamp", ..)`).
fn format_f64(v: f64) -> String {
    serde_json::to_string(&Value::from(v)).expect("finite float serializes")
}

/// Record-level helpers for the retry/dead-letter bookkeeping keys that ride
/// alongside envelope fields in the flat record.
pub mod fields {
    pub const RETRY_COUNT: &str = "retry_count";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const LAST_ERROR: &str = "last_error";
    pub const RETRY_AT: &str = "retry_at";
    pub const ORIGINAL_MESSAGE_ID: &str = "original_message_id";
    pub const DEAD_LETTER_REASON: &str = "dead_letter_reason";
    pub const FAILED_AT: &str = "failed_at";
    pub const ORIGINAL_STREAM: &str = "original_stream";
    pub const SERVICE_NAME: &str = "service_name";

    /// Keys stripped when a retry record is replayed to the main stream.
    ///
    /// `retry_count` and `max_retries` deliberately stay attached: the count on
    /// the record being processed is the source of truth, and stripping it
    /// would reset a poison message to zero on every replay.
    pub const REPLAY_STRIPPED: &[&str] = &[LAST_ERROR, RETRY_AT, ORIGINAL_MESSAGE_ID];

    pub fn get<'a>(record: &'a [(String, String)], key: &str) -> Option<&'a str> {
        record.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Retry count attached to a record; absent means first attempt.
    pub fn retry_count(record: &[(String, String)]) -> u32 {
        get(record, RETRY_COUNT)
            .and_then(|v| v.trim_matches('"').parse().ok())
            .unwrap_or(0)
    }

    /// Max retries attached to a record, if any; the scheduler falls back to
    /// its configured default when absent.
    pub fn max_retries(record: &[(String, String)]) -> Option<u32> {
        get(record, MAX_RETRIES).and_then(|v| v.trim_matches('"').parse().ok())
    }

    pub fn retry_at(record: &[(String, String)]) -> Option<f64> {
        get(record, RETRY_AT).and_then(|v| v.trim_matches('"').parse().ok())
    }

    /// Replace-or-insert a key in a flat record.
    pub fn set(record: &mut Vec<(String, String)>, key: &str, value: String) {
        match record.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => record.push((key.to_string(), value)),
        }
    }

    /// Record minus the given keys, order preserved.
    pub fn without(record: &[(String, String)], keys: &[&str]) -> Vec<(String, String)> {
        record
            .iter()
            .filter(|(k, _)| !keys.contains(&k.as_str()))
            .cloned()
            .collect()
    }
}
