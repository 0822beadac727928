//! Per-(stream, group) delivery loop.
//!
//! Each listener is one long-lived task cycling `Idle → Reading → Dispatching
//! → Acking → Idle`, entering `Reconnecting` after a bounded run of transport
//! errors and `Stopped` on cancellation. A listener reads two streams: the
//! `:critical` sibling is polled first every cycle so urgent traffic overtakes
//! the backlog, then the main stream (the only read that blocks). Every
//! dispatched entry ends in exactly one of ack, retry-schedule, or
//! dead-letter; when all of those fail the entry is emergency-acked so it can
//! never stall the group.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, ReconnectionConfig};
use crate::envelope::Envelope;
use crate::error::StoreError;
use crate::handler::Handler;
use crate::metrics::ThroughputCounters;
use crate::retry::RetryScheduler;
use crate::store::{LogStore, ReadFrom, StreamEntry};
use crate::stream_name::StreamName;

/// Observable listener lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Reading,
    Dispatching,
    Acking,
    Reconnecting,
    Stopped,
}

/// Coordinates reconnection across all listener tasks.
///
/// A single mutex ensures only one task probes and backs off while the store
/// is down; the rest queue behind it and find the link already restored.
pub struct ReconnectGate {
    store: Arc<dyn LogStore>,
    config: ReconnectionConfig,
    lock: Mutex<()>,
}

impl ReconnectGate {
    pub fn new(store: Arc<dyn LogStore>, config: ReconnectionConfig) -> Self {
        Self {
            store,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Block until the store answers a ping or shutdown is signalled.
    /// Returns `false` on shutdown.
    pub async fn wait_until_healthy(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let _guard = self.lock.lock().await;

        // Another task may have already ridden out the outage.
        if self.store.ping().await.is_ok() {
            return true;
        }

        let mut delay_ms = self.config.initial_delay_ms;
        loop {
            tokio::select! {
                _ = sleep(Duration::from_millis(delay_ms)) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
            match self.store.ping().await {
                Ok(()) => {
                    info!("log store connection restored");
                    return true;
                }
                Err(err) => {
                    warn!(error = %err, next_delay_ms = delay_ms, "log store still unreachable");
                    delay_ms = ((delay_ms as f64 * self.config.backoff_multiplier) as u64)
                        .min(self.config.max_delay_ms);
                }
            }
        }
    }
}

/// One delivery loop for `(stream, group)`, covering the main stream and its
/// `:critical` sibling.
pub struct Listener {
    store: Arc<dyn LogStore>,
    stream: StreamName,
    /// Streams read each cycle, most urgent first. The last one is the main
    /// stream and the only one read with a blocking timeout.
    read_streams: Vec<String>,
    group: String,
    consumer: String,
    handler: Arc<dyn Handler>,
    scheduler: RetryScheduler,
    config: ConsumerConfig,
    gate: Arc<ReconnectGate>,
    counters: Arc<ThroughputCounters>,
    state_tx: watch::Sender<ListenerState>,
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn LogStore>,
        stream: StreamName,
        group: String,
        consumer: String,
        handler: Arc<dyn Handler>,
        scheduler: RetryScheduler,
        config: ConsumerConfig,
        gate: Arc<ReconnectGate>,
        counters: Arc<ThroughputCounters>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Idle);
        let read_streams = vec![stream.critical_stream(), stream.as_str().to_string()];
        Self {
            store,
            stream,
            read_streams,
            group,
            consumer,
            handler,
            scheduler,
            config,
            gate,
            counters,
            state_tx,
        }
    }

    /// Observe state transitions, e.g. from tests or a diagnostics surface.
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ListenerState) {
        self.state_tx.send_replace(state);
    }

    /// Run until the shutdown signal flips. Cancellation is cooperative: it
    /// takes effect between iterations or after the bounded block-read times
    /// out, never mid-dispatch.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(stream = %self.stream, group = %self.group, consumer = %self.consumer, "listener starting");

        // Entries delivered to this consumer before a crash sit in the
        // pending lists; drain them before touching new traffic.
        self.drain_pending(&mut shutdown).await;

        let mut consecutive_errors: u32 = 0;
        'outer: loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ListenerState::Reading);

            let mut dispatched = 0usize;
            let mut errored = false;

            for (index, source) in self.read_streams.iter().enumerate() {
                // Only the final (main) read blocks, and only when nothing
                // urgent came through this cycle.
                let block = if index + 1 == self.read_streams.len() && dispatched == 0 {
                    Some(Duration::from_millis(self.config.block_timeout_ms))
                } else {
                    None
                };

                let read = tokio::select! {
                    result = self.store.read_group(
                        source,
                        &self.group,
                        &self.consumer,
                        self.config.batch_size,
                        block,
                        ReadFrom::New,
                    ) => result,
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break 'outer;
                        }
                        continue;
                    }
                };

                match read {
                    Ok(entries) => {
                        for entry in entries {
                            self.dispatch(source, entry).await;
                            dispatched += 1;
                        }
                    }
                    Err(StoreError::NoSuchStream) => {
                        // Group or stream vanished underneath us; recreate and go on.
                        warn!(stream = %source, group = %self.group, "group missing, recreating");
                        match self.store.create_group(source, &self.group).await {
                            Ok(()) | Err(StoreError::GroupExists) => {}
                            Err(err) => {
                                errored = true;
                                warn!(stream = %source, error = %err, "failed to recreate group");
                            }
                        }
                    }
                    Err(err) => {
                        errored = true;
                        consecutive_errors += 1;
                        if consecutive_errors >= self.config.max_consecutive_errors {
                            error!(
                                stream = %source,
                                group = %self.group,
                                consecutive_errors,
                                error = %err,
                                "transport error threshold reached, reconnecting"
                            );
                            self.set_state(ListenerState::Reconnecting);
                            if !self.gate.wait_until_healthy(&mut shutdown).await {
                                break 'outer;
                            }
                            consecutive_errors = 0;
                        } else {
                            warn!(
                                stream = %source,
                                group = %self.group,
                                consecutive_errors,
                                error = %err,
                                "transport error reading stream"
                            );
                        }
                    }
                }
            }

            if !errored {
                consecutive_errors = 0;
            }
            self.set_state(ListenerState::Idle);
            // A cycle that moved nothing may not have crossed an await (empty
            // instant reads, fast transport errors); yield so other tasks on
            // the thread make progress.
            if dispatched == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.set_state(ListenerState::Stopped);
        info!(stream = %self.stream, group = %self.group, "listener stopped");
    }

    /// Re-deliver this consumer's unacknowledged entries from the start of
    /// its pending lists, applying the normal success/failure handling.
    async fn drain_pending(&self, shutdown: &mut watch::Receiver<bool>) {
        for source in &self.read_streams {
            loop {
                if *shutdown.borrow() {
                    return;
                }
                let entries = match self
                    .store
                    .read_group(
                        source,
                        &self.group,
                        &self.consumer,
                        self.config.batch_size,
                        None,
                        ReadFrom::PendingStart,
                    )
                    .await
                {
                    Ok(entries) => entries,
                    Err(StoreError::NoSuchStream) => break,
                    Err(err) => {
                        warn!(stream = %source, error = %err, "failed to read pending entries");
                        break;
                    }
                };
                if entries.is_empty() {
                    break;
                }
                info!(
                    stream = %source,
                    group = %self.group,
                    count = entries.len(),
                    "draining pending entries from previous run"
                );
                for entry in entries {
                    self.dispatch(source, entry).await;
                }
            }
        }
    }

    /// Decode, invoke the handler, and settle the entry. Never returns an
    /// error: every failure path below ends in retry-schedule, dead-letter,
    /// or emergency ack.
    async fn dispatch(&self, source: &str, entry: StreamEntry) {
        self.set_state(ListenerState::Dispatching);
        self.counters.record_consumed(1);

        match Envelope::decode(&entry.fields) {
            Ok(envelope) => {
                let event_type = envelope.event_type.clone();
                match self.handler.handle(envelope).await {
                    Ok(()) => {
                        self.set_state(ListenerState::Acking);
                        match self.store.ack(source, &self.group, &entry.id).await {
                            Ok(_) => {
                                self.counters.record_acked();
                                debug!(stream = %source, entry_id = %entry.id, event_type, "acked");
                            }
                            Err(err) => {
                                // The entry stays pending and will be drained
                                // on the next start; at-least-once holds.
                                warn!(
                                    stream = %source,
                                    entry_id = %entry.id,
                                    error = %err,
                                    "ack failed, entry remains pending"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        debug!(
                            stream = %source,
                            entry_id = %entry.id,
                            event_type,
                            error = %err,
                            "handler failed"
                        );
                        self.settle_failure(source, &entry, &err.to_string()).await;
                    }
                }
            }
            Err(err) => {
                warn!(stream = %source, entry_id = %entry.id, error = %err, "undecodable record");
                self.settle_failure(source, &entry, &format!("decode_error: {err}"))
                    .await;
            }
        }
    }

    /// Hand a failed entry to the retry scheduler; if even that path fails,
    /// emergency-ack so the group keeps moving.
    async fn settle_failure(&self, source: &str, entry: &StreamEntry, reason: &str) {
        if let Err(err) = self
            .scheduler
            .handle_failure(&self.stream, source, &self.group, &entry.id, &entry.fields, reason)
            .await
        {
            self.counters.record_emergency_ack();
            error!(
                stream = %source,
                entry_id = %entry.id,
                reason,
                error = %err,
                "EMERGENCY ACK: retry and dead-letter both unavailable"
            );
            if let Err(ack_err) = self.store.ack(source, &self.group, &entry.id).await {
                error!(
                    stream = %source,
                    entry_id = %entry.id,
                    error = %ack_err,
                    "emergency ack failed, entry remains pending"
                );
            }
        }
    }
}
