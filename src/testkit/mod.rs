//! Test doubles for exercising the bus without a Redis server.
//!
//! - [`store::MemoryLogStore`] — in-memory log store with faithful stream,
//!   consumer-group and pending-list semantics plus scripted failure
//!   injection.
//! - [`handler`] — counting and flaky handlers with shared atomic counters.

pub mod handler;
pub mod store;

pub use handler::{CountingHandler, FailNTimesHandler, FailingHandler};
pub use store::MemoryLogStore;
