//! Event router / handler registry
//!
//! Maps an `event_type` to the handler that owns it. Payloads stay untyped
//! JSON until they reach a handler; typed handlers registered with
//! [`EventRouter::on`] decode into their [`DomainEvent`] type here and
//! nowhere earlier.

use async_trait::async_trait;
use event_bus::{DomainEvent, EventEnvelope};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Why a handler did not complete
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload does not have the shape the handler expects
    #[error("payload does not match {event_type}: {source}")]
    Decode {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope<Value>) -> Result<(), HandlerError>;
}

struct TypedHandler<E, F> {
    f: F,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, F, Fut> EventHandler for TypedHandler<E, F>
where
    E: DomainEvent,
    F: Fn(EventEnvelope<E>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: &EventEnvelope<Value>) -> Result<(), HandlerError> {
        let payload: E =
            serde_json::from_value(event.payload.clone()).map_err(|source| HandlerError::Decode {
                event_type: event.event_type.clone(),
                source,
            })?;

        let typed = EventEnvelope::new(event.event_id, event.event_type.clone(), payload)
            .with_occurred_at(event.occurred_at);

        (self.f)(typed).await?;
        Ok(())
    }
}

/// Registry of handlers keyed by event type
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type, replacing any previous one
    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let event_type = event_type.into();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            warn!(event_type = %event_type, "Replacing existing event handler");
        }
        self
    }

    /// Register a typed handler for `E::EVENT_TYPE`
    ///
    /// ```rust
    /// use event_bus::events::QuizDeleted;
    /// use event_consumer::EventRouter;
    ///
    /// let router = EventRouter::new().on::<QuizDeleted, _, _>(|event| async move {
    ///     println!("quiz {} deleted", event.payload.quiz_id);
    ///     Ok(())
    /// });
    /// assert!(router.handler_for("QuizDeleted").is_some());
    /// ```
    pub fn on<E, F, Fut>(self, f: F) -> Self
    where
        E: DomainEvent,
        F: Fn(EventEnvelope<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = TypedHandler {
            f,
            _event: PhantomData,
        };
        self.register(E::EVENT_TYPE, Arc::new(handler))
    }

    pub fn handler_for(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
