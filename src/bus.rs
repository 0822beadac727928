//! The event bus: publish, subscribe, batch operations, lifecycle.
//!
//! One bus instance is constructed at process start and passed by reference
//! to everything that needs it; `shutdown()` is an explicit call, not a drop
//! side effect. All tasks share the injected [`LogStore`].

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dlq::DeadLetterRouter;
use crate::envelope::{Envelope, Priority};
use crate::error::{Error, Result};
use crate::groups::GroupManager;
use crate::handler::Handler;
use crate::health::HealthCollector;
use crate::listener::{Listener, ListenerState, ReconnectGate};
use crate::metrics::ThroughputCounters;
use crate::retry::RetryScheduler;
use crate::store::{EntryId, LogStore, ReadFrom, RedisLogStore, StreamEntry};
use crate::stream_name::StreamName;

/// Reliable log-based publish/subscribe bus.
pub struct EventBus {
    store: Arc<dyn LogStore>,
    config: Config,
    counters: Arc<ThroughputCounters>,
    gate: Arc<ReconnectGate>,
    groups: GroupManager,
    scheduler: RetryScheduler,
    dlq: DeadLetterRouter,
    /// Handler registered per stream, resolved once at subscribe time.
    handlers: DashMap<String, Arc<dyn Handler>>,
    /// Listener state receivers keyed by (stream, group).
    listener_states: DashMap<(String, String), watch::Receiver<ListenerState>>,
    /// Streams that already have a replay task.
    replay_streams: DashMap<String, ()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EventBus {
    /// Build a bus over an already-connected store.
    pub fn new(store: Arc<dyn LogStore>, config: Config) -> Self {
        let counters = Arc::new(ThroughputCounters::default());
        let gate = Arc::new(ReconnectGate::new(
            store.clone(),
            config.reconnection.clone(),
        ));
        let dlq = DeadLetterRouter::new(store.clone(), config.service_name.clone(), counters.clone());
        let scheduler = RetryScheduler::new(
            store.clone(),
            dlq.clone(),
            config.retry.clone(),
            counters.clone(),
        );
        let groups = GroupManager::new(store.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            counters,
            gate,
            groups,
            scheduler,
            dlq,
            handlers: DashMap::new(),
            listener_states: DashMap::new(),
            replay_streams: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Connect to Redis and build a bus over it.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let store = RedisLogStore::connect(&config.redis.url).await?;
        info!(service = %config.service_name, "event bus connected");
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Consumer name this process registers under within its groups. Stable
    /// across restarts, so a restarted process drains the pending entries its
    /// predecessor left behind.
    fn consumer_name(&self) -> String {
        self.config
            .consumer
            .name
            .clone()
            .unwrap_or_else(|| self.config.service_name.clone())
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish one event. Critical priority re-routes to the `:critical`
    /// sibling stream; the other tiers share the main stream.
    pub async fn publish(
        &self,
        stream: &StreamName,
        data: Map<String, Value>,
        event_type: &str,
        priority: Priority,
    ) -> Result<EntryId> {
        let envelope = Envelope::new(event_type, data, &self.config.service_name, priority);
        let target = stream.target_for(priority);
        let id = self
            .store
            .append(&target, &envelope.encode())
            .await
            .map_err(|source| Error::Publish {
                stream: target.clone(),
                source,
            })?;
        self.counters.record_published(1);
        debug!(stream = %target, entry_id = %id, event_type, %priority, "published");
        Ok(id)
    }

    /// Publish a burst of `(data, event_type)` events, one entry id per input
    /// in input order. Event types configured as critical route to the
    /// `:critical` sibling; the rest stay on the main stream. On failure the
    /// error reports every id already appended.
    pub async fn publish_batch(
        &self,
        stream: &StreamName,
        events: Vec<(Map<String, Value>, String)>,
    ) -> Result<Vec<EntryId>> {
        let mut ids = Vec::with_capacity(events.len());
        for (index, (data, event_type)) in events.into_iter().enumerate() {
            let priority = self.classify(&event_type);
            let envelope = Envelope::new(&event_type, data, &self.config.service_name, priority);
            let target = stream.target_for(priority);
            match self.store.append(&target, &envelope.encode()).await {
                Ok(id) => ids.push(id),
                Err(source) => {
                    return Err(Error::PartialPublish {
                        stream: stream.to_string(),
                        published: ids.into_iter().map(|id| id.0).collect(),
                        failed_index: index,
                        source,
                    })
                }
            }
        }
        self.counters.record_published(ids.len() as u64);
        debug!(stream = %stream, count = ids.len(), "batch published");
        Ok(ids)
    }

    fn classify(&self, event_type: &str) -> Priority {
        if self
            .config
            .priority
            .critical_event_types
            .iter()
            .any(|t| t == event_type)
        {
            Priority::Critical
        } else {
            Priority::Normal
        }
    }

    // ------------------------------------------------------------------
    // Subscribing
    // ------------------------------------------------------------------

    /// Register `handler` for `stream` and start a listener task for
    /// `(stream, group)` covering the stream and its `:critical` sibling,
    /// plus a retry-replay task for the stream if one is not already running.
    pub async fn subscribe(
        &self,
        stream: StreamName,
        group: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        self.groups.ensure_group(stream.as_str(), group).await?;
        self.groups
            .ensure_group(&stream.critical_stream(), group)
            .await?;
        self.handlers.insert(stream.to_string(), handler.clone());

        let listener = Listener::new(
            self.store.clone(),
            stream.clone(),
            group.to_string(),
            self.consumer_name(),
            handler,
            self.scheduler.clone(),
            self.config.consumer.clone(),
            self.gate.clone(),
            self.counters.clone(),
        );
        self.listener_states
            .insert((stream.to_string(), group.to_string()), listener.state());

        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.lock().push(tokio::spawn(listener.run(shutdown)));

        if self.replay_streams.insert(stream.to_string(), ()).is_none() {
            let replay = self.scheduler.clone();
            let interval = self.config.replay_interval();
            let shutdown = self.shutdown_tx.subscribe();
            let replay_stream = stream.clone();
            self.tasks
                .lock()
                .push(tokio::spawn(replay.run_replay_task(
                    replay_stream,
                    interval,
                    shutdown,
                )));
        }

        info!(stream = %stream, group, "subscribed");
        Ok(())
    }

    /// Observe a listener's state transitions.
    pub fn listener_state(
        &self,
        stream: &StreamName,
        group: &str,
    ) -> Option<watch::Receiver<ListenerState>> {
        self.listener_states
            .get(&(stream.to_string(), group.to_string()))
            .map(|r| r.clone())
    }

    // ------------------------------------------------------------------
    // Batch operations
    // ------------------------------------------------------------------

    /// Read up to `count` undelivered entries for `(stream, group)` without
    /// blocking.
    pub async fn read_batch(
        &self,
        stream: &StreamName,
        group: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let entries = self
            .store
            .read_group(
                stream.as_str(),
                group,
                &self.consumer_name(),
                count,
                None,
                ReadFrom::New,
            )
            .await?;
        self.counters.record_consumed(entries.len() as u64);
        Ok(entries)
    }

    /// Apply the stream's registered handler to each entry and acknowledge
    /// each independently; a failure routes that entry through the retry
    /// scheduler without blocking the rest.
    pub async fn process_batch(
        &self,
        stream: &StreamName,
        group: &str,
        entries: Vec<StreamEntry>,
    ) -> Result<usize> {
        let handler = self
            .handlers
            .get(stream.as_str())
            .map(|h| h.clone())
            .ok_or_else(|| Error::NoHandler {
                stream: stream.to_string(),
            })?;

        let mut succeeded = 0;
        for entry in entries {
            let outcome = match Envelope::decode(&entry.fields) {
                Ok(envelope) => handler.handle(envelope).await.map_err(|e| e.to_string()),
                Err(err) => Err(format!("decode_error: {err}")),
            };
            match outcome {
                Ok(()) => {
                    self.store.ack(stream.as_str(), group, &entry.id).await?;
                    self.counters.record_acked();
                    succeeded += 1;
                }
                Err(reason) => {
                    warn!(stream = %stream, entry_id = %entry.id, reason, "batch entry failed");
                    self.scheduler
                        .handle_failure(stream, stream.as_str(), group, &entry.id, &entry.fields, &reason)
                        .await?;
                }
            }
        }
        Ok(succeeded)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn group_manager(&self) -> &GroupManager {
        &self.groups
    }

    pub fn dead_letter(&self) -> &DeadLetterRouter {
        &self.dlq
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn health(&self) -> HealthCollector {
        HealthCollector::new(
            self.store.clone(),
            self.config.health.clone(),
            self.counters.clone(),
        )
    }

    pub fn counters(&self) -> &ThroughputCounters {
        &self.counters
    }

    /// Liveness of the underlying store connection.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await.map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Signal every listener and replay task to stop, then wait for them.
    /// Cancellation is cooperative: tasks finish their current dispatch
    /// before exiting.
    pub async fn shutdown(&self) {
        info!(service = %self.config.service_name, "event bus shutting down");
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "bus task panicked during shutdown");
            }
        }
        info!(service = %self.config.service_name, "event bus stopped");
    }
}
