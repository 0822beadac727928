//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use botbus::bus::EventBus;
use botbus::config::Config;
use botbus::stream_name::StreamName;
use botbus::testkit::MemoryLogStore;

/// Config tuned for fast tests: short block reads and reconnect delays.
/// Replay is driven manually, so the background replay task is parked on a
/// long interval where it cannot interfere.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.service_name = "test_service".into();
    config.consumer.block_timeout_ms = 20;
    config.retry.base_delay_secs = 0.005;
    config.retry.replay_interval_secs = 3600;
    config.reconnection.initial_delay_ms = 5;
    config.reconnection.max_delay_ms = 40;
    config
}

/// A bus over a fresh in-memory store, with a handle on the store for
/// inspection and failure injection.
pub fn mem_bus(config: Config) -> (MemoryLogStore, EventBus) {
    let store = MemoryLogStore::new();
    let bus = EventBus::new(Arc::new(store.clone()), config);
    (store, bus)
}

pub fn commands_stream() -> StreamName {
    StreamName::parse("svc:other:commands").unwrap()
}

pub fn payload(key: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.into(), value.into());
    map
}

/// The consumer name the bus registers under, for seeding pending entries.
pub fn bus_consumer(config: &Config) -> String {
    config
        .consumer
        .name
        .clone()
        .unwrap_or_else(|| config.service_name.clone())
}

/// Poll until `predicate` holds or the deadline passes; returns whether it
/// held.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
