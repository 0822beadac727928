//! Botbus - Reliable Redis Streams message bus for service orchestration.
//!
//! A log-based publish/subscribe substrate for the trading-bot management
//! platform: consumer-group fan-out with at-least-once delivery, exponential
//! backoff retry through per-stream side-streams, dead-letter quarantine for
//! poison messages, priority-tiered delivery, and health/lag monitoring.
//!
//! # Architecture
//!
//! - [`store`] - The ordered-log port (`LogStore`) and its Redis Streams
//!   implementation; everything above it is store-agnostic.
//! - [`envelope`] - The message envelope and its flat string codec.
//! - [`bus`] - `EventBus`: publish, subscribe, batch operations, lifecycle.
//! - [`listener`] - Per-(stream, group) delivery loop with reconnection.
//! - [`retry`] - Exponential-backoff retry scheduling and replay.
//! - [`dlq`] - Dead-letter quarantine and forensics.
//! - [`health`] - Stream and system health snapshots.
//!
//! Delivery flow: publish → stream → listener → handler → ack, with failures
//! detouring through `{stream}:retry` (replayed after backoff) and finally
//! `{stream}:dead` once retries exhaust. Critical-priority traffic rides the
//! `{stream}:critical` sibling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use botbus::bus::EventBus;
//! use botbus::config::Config;
//! use botbus::envelope::Priority;
//! use botbus::handler::Router;
//! use botbus::stream_name::StreamName;
//!
//! # async fn run() -> botbus::error::Result<()> {
//! let bus = EventBus::connect(Config::default()).await?;
//! let commands = StreamName::parse("mgmt:trading:commands")?;
//!
//! let router = Router::new().route_fn("START_BOT", |envelope| async move {
//!     println!("starting bot: {:?}", envelope.data.get("bot_name"));
//!     Ok(())
//! });
//! bus.subscribe(commands.clone(), "trading_consumers", Arc::new(router)).await?;
//!
//! bus.publish(&commands, Default::default(), "START_BOT", Priority::Normal).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod groups;
pub mod handler;
pub mod health;
pub mod listener;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod stream_name;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
