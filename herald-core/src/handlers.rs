//! Subscriber-side handler registry.
//!
//! Handlers are registered against a route (a channel, an event type, or
//! everything) and run sequentially, in registration order, for every
//! matching event. A handler that returns an error or panics does not
//! affect the other handlers of the same event.

use crate::entities::event::Event;
use crate::publisher::PublishError;
use async_trait::async_trait;
use compact_str::CompactString;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<PublishError> for HandlerError {
    fn from(value: PublishError) -> Self {
        Self::Failed(format!("publish failed: {value}"))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Failed(format!("invalid payload: {value}"))
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name; recorded with every failure of this handler.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Handler built from a closure. See [`handler_fn`].
pub struct FnHandler<F> {
    name: CompactString,
    f: F,
}

/// Adapt an async closure into an [`EventHandler`].
///
/// ```ignore
/// registry.on_channel("discord:message", handler_fn("parser", |event| async move {
///     parse(&event.payload)?;
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<CompactString>, f: F) -> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Channel(CompactString),
    EventType(CompactString),
    All,
}

impl Route {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Route::Channel(channel) => *channel == event.channel,
            Route::EventType(event_type) => *event_type == event.event_type,
            Route::All => true,
        }
    }
}

/// A handler that did not complete successfully.
#[derive(Debug)]
pub struct DispatchFailure {
    pub handler: String,
    pub error: HandlerError,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: Vec<(Route, Arc<dyn EventHandler>)>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(route, h)| (route, h.name())))
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_channel(
        mut self,
        channel: impl Into<CompactString>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.register(Route::Channel(channel.into()), Arc::new(handler));
        self
    }

    pub fn on_event_type(
        mut self,
        event_type: impl Into<CompactString>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.register(Route::EventType(event_type.into()), Arc::new(handler));
        self
    }

    pub fn on_all(mut self, handler: impl EventHandler + 'static) -> Self {
        self.register(Route::All, Arc::new(handler));
        self
    }

    pub fn register(&mut self, route: Route, handler: Arc<dyn EventHandler>) {
        self.routes.push((route, handler));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn handlers_for<'a>(
        &'a self,
        event: &'a Event,
    ) -> impl Iterator<Item = &'a Arc<dyn EventHandler>> + 'a {
        self.routes
            .iter()
            .filter(move |(route, _)| route.matches(event))
            .map(|(_, handler)| handler)
    }

    /// Run every matching handler to completion, one after another.
    pub async fn dispatch(&self, event: &Event) -> Vec<DispatchFailure> {
        let mut failures = Vec::new();
        for handler in self.handlers_for(event) {
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
            };
            tracing::warn!(
                event_id = event.id,
                handler = handler.name(),
                error = %error,
                "Event handler failed"
            );
            failures.push(DispatchFailure {
                handler: handler.name().to_string(),
                error,
            });
        }
        failures
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    fn event(channel: &str, event_type: &str) -> Event {
        Event {
            id: 1,
            channel: channel.into(),
            event_type: event_type.into(),
            source: "test".into(),
            correlation_id: None,
            payload: serde_json::json!({}),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_routes() {
        let e = event("discord:message", "discord.message.received");
        assert!(Route::Channel("discord:message".into()).matches(&e));
        assert!(!Route::Channel("parsing:setup".into()).matches(&e));
        assert!(Route::EventType("discord.message.received".into()).matches(&e));
        assert!(Route::All.matches(&e));
    }

    #[tokio::test]
    async fn test_dispatch_runs_matching_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let seen = seen.clone();
            handler_fn(name, move |_| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(name);
                    Ok(())
                }
            })
        };
        let registry = HandlerRegistry::new()
            .on_channel("discord:message", record("by-channel"))
            .on_channel("parsing:setup", record("other-channel"))
            .on_event_type("discord.message.received", record("by-type"))
            .on_all(record("all"));

        let failures = registry
            .dispatch(&event("discord:message", "discord.message.received"))
            .await;
        assert!(failures.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["by-channel", "by-type", "all"]);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();
        let registry = HandlerRegistry::new()
            .on_all(handler_fn("fails", |_| async {
                Err(HandlerError::new("bad payload"))
            }))
            .on_all(handler_fn("panics", |e: Event| async move {
                if e.id > 0 {
                    panic!("boom");
                }
                Ok(())
            }))
            .on_all(handler_fn("ok", move |_| {
                let ran = ran_clone.clone();
                async move {
                    *ran.lock().unwrap() = true;
                    Ok(())
                }
            }));

        let failures = registry.dispatch(&event("a", "b")).await;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].handler, "fails");
        assert!(matches!(failures[0].error, HandlerError::Failed(_)));
        assert_eq!(failures[1].handler, "panics");
        assert!(matches!(&failures[1].error, HandlerError::Panicked(m) if m == "boom"));
        assert!(*ran.lock().unwrap());
    }
}
