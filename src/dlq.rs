//! Dead-letter quarantine for messages that exhausted retries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::envelope::{fields, unix_now};
use crate::error::{Result, StoreError};
use crate::metrics::ThroughputCounters;
use crate::store::{EntryId, LogStore};
use crate::stream_name::StreamName;

/// Summary of a stream's dead-letter contents.
#[derive(Debug, Clone, PartialEq)]
pub struct DlqStats {
    pub total_messages: u64,
    /// Dead-letter reason → occurrence count.
    pub error_types: HashMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

/// Moves poison messages to `{stream}:dead` and keeps the group unblocked.
#[derive(Clone)]
pub struct DeadLetterRouter {
    store: Arc<dyn LogStore>,
    service_name: String,
    counters: Arc<ThroughputCounters>,
}

impl DeadLetterRouter {
    pub fn new(
        store: Arc<dyn LogStore>,
        service_name: impl Into<String>,
        counters: Arc<ThroughputCounters>,
    ) -> Self {
        Self {
            store,
            service_name: service_name.into(),
            counters,
        }
    }

    /// Quarantine one entry: append a dead-letter record with failure
    /// metadata to `{stream}:dead`, then acknowledge the original so the
    /// group never stalls on it.
    ///
    /// If the dead-letter append itself fails, the original entry is still
    /// acknowledged (emergency ack); losing observability of one failure
    /// must never block the pipeline.
    ///
    /// `source` is the stream the entry was read from; `stream` scopes the
    /// `:dead` side-stream.
    pub async fn move_to_dlq(
        &self,
        stream: &StreamName,
        source: &str,
        group: &str,
        id: &EntryId,
        record: &[(String, String)],
        reason: &str,
    ) -> Result<()> {
        let mut dead_record = record.to_vec();
        let json_str = |s: &str| serde_json::Value::String(s.to_string()).to_string();
        fields::set(&mut dead_record, fields::DEAD_LETTER_REASON, json_str(reason));
        fields::set(&mut dead_record, fields::FAILED_AT, unix_now().to_string());
        fields::set(&mut dead_record, fields::ORIGINAL_STREAM, json_str(source));
        fields::set(
            &mut dead_record,
            fields::ORIGINAL_MESSAGE_ID,
            json_str(id.as_str()),
        );
        fields::set(
            &mut dead_record,
            fields::SERVICE_NAME,
            json_str(&self.service_name),
        );

        let dead_stream = stream.dead_letter_stream();
        match self.store.append(&dead_stream, &dead_record).await {
            Ok(dead_id) => {
                self.counters.record_dead_lettered();
                warn!(
                    stream = %stream,
                    entry_id = %id,
                    dead_id = %dead_id,
                    reason,
                    "message moved to dead-letter stream"
                );
            }
            Err(err) => {
                self.counters.record_emergency_ack();
                error!(
                    stream = %stream,
                    entry_id = %id,
                    reason,
                    error = %err,
                    "EMERGENCY ACK: dead-letter append failed, acknowledging without quarantine"
                );
            }
        }

        self.store.ack(source, group, id).await?;
        self.counters.record_acked();
        Ok(())
    }

    /// Summarize `{stream}:dead`, tolerating a nonexistent stream by
    /// reporting zero counts.
    pub async fn dlq_stats(&self, stream: &StreamName) -> Result<DlqStats> {
        let dead_stream = stream.dead_letter_stream();
        // Bounded scan; operators are expected to drain DLQ streams.
        let entries = match self.store.range(&dead_stream, 10_000).await {
            Ok(entries) => entries,
            Err(StoreError::NoSuchStream) => Vec::new(),
            Err(other) => return Err(other.into()),
        };

        let mut error_types: HashMap<String, u64> = HashMap::new();
        for entry in &entries {
            let reason = fields::get(&entry.fields, fields::DEAD_LETTER_REASON)
                .map(|raw| raw.trim_matches('"').to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *error_types.entry(reason).or_insert(0) += 1;
        }

        if !entries.is_empty() {
            info!(stream = %stream, total = entries.len(), "dead-letter stats collected");
        }
        Ok(DlqStats {
            total_messages: entries.len() as u64,
            error_types,
            last_updated: Utc::now(),
        })
    }
}
