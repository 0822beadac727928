//! Counting and flaky [`Handler`] implementations for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::envelope::Envelope;
use crate::error::HandlerError;
use crate::handler::Handler;

/// Records every envelope it receives and always succeeds.
#[derive(Default)]
pub struct CountingHandler {
    calls: AtomicU32,
    seen: Mutex<Vec<Envelope>>,
}

impl CountingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Envelope> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(envelope);
        Ok(())
    }
}

/// Always fails with the given message.
pub struct FailingHandler {
    calls: AtomicU32,
    message: String,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            message: message.into(),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _envelope: Envelope) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::failed(self.message.clone()))
    }
}

/// Fails the first `n` calls, then succeeds.
pub struct FailNTimesHandler {
    calls: AtomicU32,
    failures: u32,
}

impl FailNTimesHandler {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailNTimesHandler {
    async fn handle(&self, _envelope: Envelope) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(HandlerError::failed(format!("transient failure {call}")))
        } else {
            Ok(())
        }
    }
}
