use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid stream name '{name}': {reason}")]
    InvalidStreamName { name: String, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// A record read from the log store could not be turned back into an envelope.
///
/// Decode failures are handler-failure-equivalent: the listener routes the
/// offending entry through retry and eventually the dead-letter stream, it
/// never crashes on one.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("missing field '{field}' in stream record")]
    MissingField { field: &'static str },

    #[error("field '{field}' is not valid JSON: {source}")]
    Json {
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown priority '{0}'")]
    UnknownPriority(String),
}

/// Transport-level failures talking to the log store.
///
/// `GroupExists` is split out so the group manager can distinguish the
/// benign BUSYGROUP response from a real fault.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("consumer group already exists")]
    GroupExists,

    #[error("no such stream or consumer group")]
    NoSuchStream,

    #[error("log store unreachable: {0}")]
    Unreachable(String),

    #[error("log store error: {0}")]
    Other(String),
}

/// Business-logic failure reported by a registered handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("no handler registered for event type '{0}'")]
    UnknownEventType(String),

    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("failed to publish to stream '{stream}': {source}")]
    Publish {
        stream: String,
        #[source]
        source: StoreError,
    },

    #[error("batch publish to '{stream}' failed at index {failed_index} ({count} published): {source}", count = .published.len())]
    PartialPublish {
        stream: String,
        /// Entry ids already appended, in input order.
        published: Vec<String>,
        failed_index: usize,
        #[source]
        source: StoreError,
    },

    #[error("no handler registered for stream '{stream}'")]
    NoHandler { stream: String },
}

pub type Result<T> = std::result::Result<T, Error>;
