//! Log store port.
//!
//! The bus talks to an ordered, append-only, consumer-group-capable log store
//! through this trait. The production implementation is [`redis::RedisLogStore`]
//! over the Redis Streams verbs; tests use the in-memory store from `testkit`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub mod redis;

pub use self::redis::RedisLogStore;

/// Store-assigned identity of a stream entry.
///
/// This is the only identity a message has; nothing inside the envelope
/// duplicates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        EntryId(s)
    }
}

/// One entry read back from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Vec<(String, String)>,
}

/// Where a group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to this group (`>`).
    New,
    /// This consumer's own pending entries, from the start (`0`). Used to
    /// drain deliveries left unacknowledged by a previous run.
    PendingStart,
}

/// Per-group facts reported by the store (XINFO GROUPS).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    /// Undelivered entry count; None when the store cannot compute it.
    pub lag: Option<u64>,
}

/// Stream-level facts reported by the store (XINFO STREAM).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub length: u64,
    pub last_id: EntryId,
}

/// Ordered-log primitive the bus is built on.
///
/// Maps one-to-one onto the Redis Streams wire verbs; append and ack are
/// atomic at the store level, so the bus needs no in-process locking around
/// stream state.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Liveness probe (PING).
    async fn ping(&self) -> Result<(), StoreError>;

    /// Append a flat record, creating the stream if absent (XADD).
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<EntryId, StoreError>;

    /// Read up to `count` entries for `(stream, group)` as `consumer`
    /// (XREADGROUP). `block` bounds how long the call may wait for new
    /// entries; `None` returns immediately.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        from: ReadFrom,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Acknowledge one entry for a group (XACK). Returns how many entries
    /// were actually removed from the pending list (0 or 1).
    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<u64, StoreError>;

    /// Create a consumer group positioned at the start of the stream,
    /// creating the stream if absent (XGROUP CREATE … MKSTREAM). Reports
    /// [`StoreError::GroupExists`] distinctly so callers can treat it as
    /// idempotent success after verification.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError>;

    /// Consumer groups on a stream (XINFO GROUPS). Missing stream reports
    /// [`StoreError::NoSuchStream`].
    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>, StoreError>;

    /// Stream facts, or `None` if the stream does not exist (XINFO STREAM).
    async fn stream_info(&self, stream: &str) -> Result<Option<StreamInfo>, StoreError>;

    /// Up to `count` entries from the start of a stream, outside any group
    /// (XRANGE - +). A missing stream may read as empty or report
    /// [`StoreError::NoSuchStream`]; callers tolerate both.
    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, StoreError>;

    /// Delete entries by id (XDEL). Returns how many were removed.
    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<u64, StoreError>;

    /// Pending-entry count for a group (XPENDING summary). Missing stream or
    /// group reads as zero.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError>;
}
