//! Retry scheduling with exponential backoff.
//!
//! Failed entries are copied to `{stream}:retry` with a `retry_at` deadline
//! and the original is acknowledged; a periodic replay task republishes due
//! records to the main stream. The retry count attached to the record being
//! processed is the source of truth — replay keeps it, so a poison message
//! marches monotonically toward the dead-letter stream.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::dlq::DeadLetterRouter;
use crate::envelope::{fields, unix_now};
use crate::error::Result;
use crate::metrics::ThroughputCounters;
use crate::store::{EntryId, LogStore};
use crate::stream_name::StreamName;

/// Schedules retries for failed entries and replays due retry records.
#[derive(Clone)]
pub struct RetryScheduler {
    store: Arc<dyn LogStore>,
    dlq: DeadLetterRouter,
    config: RetryConfig,
    counters: Arc<ThroughputCounters>,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn LogStore>,
        dlq: DeadLetterRouter,
        config: RetryConfig,
        counters: Arc<ThroughputCounters>,
    ) -> Self {
        Self {
            store,
            dlq,
            config,
            counters,
        }
    }

    /// Backoff before the next attempt: `base * 4^retry_count`.
    fn backoff_secs(&self, retry_count: u32) -> f64 {
        self.config.base_delay_secs * 4f64.powi(retry_count as i32)
    }

    /// Route one failed entry: schedule a retry if attempts remain, otherwise
    /// quarantine it. Every path ends with the original entry acknowledged.
    ///
    /// `source` is the stream the entry was actually read from (the main
    /// stream or its `:critical` sibling); `stream` scopes the `:retry` and
    /// `:dead` side-streams.
    pub async fn handle_failure(
        &self,
        stream: &StreamName,
        source: &str,
        group: &str,
        id: &EntryId,
        record: &[(String, String)],
        error: &str,
    ) -> Result<()> {
        let retry_count = fields::retry_count(record);
        let max_retries = fields::max_retries(record).unwrap_or(self.config.max_retries);

        if retry_count >= max_retries {
            return self
                .dlq
                .move_to_dlq(
                    stream,
                    source,
                    group,
                    id,
                    record,
                    &format!("max_retries_exceeded: {error}"),
                )
                .await;
        }

        let delay = self.backoff_secs(retry_count);
        let retry_at = unix_now() + delay;
        let json_str = |s: &str| serde_json::Value::String(s.to_string()).to_string();

        let mut retry_record = record.to_vec();
        fields::set(
            &mut retry_record,
            fields::RETRY_COUNT,
            (retry_count + 1).to_string(),
        );
        fields::set(&mut retry_record, fields::MAX_RETRIES, max_retries.to_string());
        fields::set(&mut retry_record, fields::LAST_ERROR, json_str(error));
        fields::set(&mut retry_record, fields::RETRY_AT, retry_at.to_string());
        fields::set(
            &mut retry_record,
            fields::ORIGINAL_MESSAGE_ID,
            json_str(id.as_str()),
        );

        match self.store.append(&stream.retry_stream(), &retry_record).await {
            Ok(retry_id) => {
                self.counters.record_retried();
                info!(
                    stream = %stream,
                    entry_id = %id,
                    retry_id = %retry_id,
                    attempt = retry_count + 1,
                    delay_secs = delay,
                    "scheduled retry"
                );
                self.store.ack(source, group, id).await?;
                self.counters.record_acked();
                Ok(())
            }
            Err(err) => {
                // The retry stream itself is unavailable; quarantine instead of
                // dropping the failure on the floor.
                warn!(
                    stream = %stream,
                    entry_id = %id,
                    error = %err,
                    "retry scheduling failed, routing to dead-letter stream"
                );
                self.dlq
                    .move_to_dlq(stream, source, group, id, record, &format!("retry_failed: {err}"))
                    .await
            }
        }
    }

    /// Republish every due record in `{stream}:retry` to the main stream and
    /// delete it from the retry stream. Records whose `retry_at` lies in the
    /// future are left untouched.
    pub async fn replay_due(&self, stream: &StreamName) -> Result<usize> {
        let retry_stream = stream.retry_stream();
        let records = match self.store.range(&retry_stream, 1_000).await {
            Ok(records) => records,
            Err(crate::error::StoreError::NoSuchStream) => return Ok(0),
            Err(other) => return Err(other.into()),
        };

        let now = unix_now();
        let mut replayed = 0;
        for record in records {
            let due = fields::retry_at(&record.fields).is_some_and(|at| at <= now);
            if !due {
                continue;
            }

            let republish = fields::without(&record.fields, fields::REPLAY_STRIPPED);
            match self.store.append(stream.as_str(), &republish).await {
                Ok(new_id) => {
                    debug!(
                        stream = %stream,
                        retry_id = %record.id,
                        new_id = %new_id,
                        "replayed retry record"
                    );
                    self.store.delete(&retry_stream, &[record.id]).await?;
                    replayed += 1;
                }
                Err(err) => {
                    // Leave the record in place; the next scan will retry it.
                    error!(
                        stream = %stream,
                        retry_id = %record.id,
                        error = %err,
                        "failed to replay retry record"
                    );
                }
            }
        }

        if replayed > 0 {
            info!(stream = %stream, replayed, "retry replay pass complete");
        }
        Ok(replayed)
    }

    /// Long-running replay loop for one stream; scans at the configured
    /// interval until the shutdown signal flips.
    pub async fn run_replay_task(
        self,
        stream: StreamName,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.replay_due(&stream).await {
                        warn!(stream = %stream, error = %err, "retry replay scan failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!(stream = %stream, "retry replay task stopping");
                        return;
                    }
                }
            }
        }
    }
}
