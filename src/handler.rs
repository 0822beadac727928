//! Handler seam and the event-type router.
//!
//! Handlers are supplied by the surrounding application (the management
//! backend, the trading-gateway proxy, …) and receive a decoded [`Envelope`];
//! the bus never looks inside `data`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::HandlerError;

/// Processes one delivered envelope.
///
/// Returning `Err` routes the entry through the retry scheduler; the bus
/// acknowledges only after `Ok`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

type BoxedHandlerFn = Box<
    dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Adapter so plain async closures can be registered as handlers.
pub struct FnHandler(BoxedHandlerFn);

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        FnHandler(Box::new(move |envelope| Box::pin(f(envelope))))
    }
}

#[async_trait]
impl Handler for FnHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        (self.0)(envelope).await
    }
}

/// Explicit event-type → handler mapping, resolved at registration time.
///
/// Replaces reflective method-name dispatch: an event type with no registered
/// handler fails predictably with [`HandlerError::UnknownEventType`] and takes
/// the ordinary retry/dead-letter path.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Handler>>,
    /// Handler for event types with no explicit route, if any.
    fallback: Option<Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type. Later registrations for the
    /// same type replace earlier ones.
    pub fn route(mut self, event_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.routes.insert(event_type.into(), handler);
        self
    }

    /// Register an async closure for one event type.
    pub fn route_fn<F, Fut>(self, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.route(event_type, Arc::new(FnHandler::new(f)))
    }

    /// Handler invoked for event types with no explicit route.
    pub fn fallback(mut self, handler: Arc<dyn Handler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        match self.routes.get(&envelope.event_type) {
            Some(handler) => handler.handle(envelope).await,
            None => match &self.fallback {
                Some(handler) => handler.handle(envelope).await,
                None => Err(HandlerError::UnknownEventType(envelope.event_type)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::envelope::Priority;

    fn envelope(event_type: &str) -> Envelope {
        Envelope::new(event_type, Map::new(), "test", Priority::Normal)
    }

    #[tokio::test]
    async fn routes_by_event_type() {
        let started = Arc::new(AtomicU32::new(0));
        let counter = started.clone();
        let router = Router::new().route_fn("START_BOT", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        router.handle(envelope("START_BOT")).await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_event_type_fails_predictably() {
        let router = Router::new().route_fn("START_BOT", |_| async { Ok(()) });
        let err = router.handle(envelope("SELF_DESTRUCT")).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnknownEventType(t) if t == "SELF_DESTRUCT"));
    }

    #[tokio::test]
    async fn fallback_catches_unrouted_types() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new()
            .route_fn("START_BOT", |_| async { Ok(()) })
            .fallback(Arc::new(FnHandler::new(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })));

        router.handle(envelope("STATUS_UPDATE")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
