//! Per-connection event dispatch.
//!
//! Each connection owns an [`EventDispatcher`] mapping event names to an
//! ordered list of handlers. Triggering an event runs every handler in
//! registration order; a handler that fails or panics is logged and the
//! remaining handlers still run.

use crate::hub::HubError;
use crate::socket::Socket;
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

/// Errors a handler may report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event payload did not have the expected shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A hub operation performed by the handler failed.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Result type returned by event handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// A registered event handler.
///
/// Handlers receive the connection they are registered on, so they never need
/// to capture it (which would keep the connection alive through its own
/// handler table).
pub type EventHandler = Arc<dyn Fn(&Socket, &Value) -> HandlerResult + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Socket, &Value) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Event name -> ordered handler list.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: DashMap<String, Vec<EventHandler>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for an event.
    ///
    /// Registering the same handler twice makes it run twice.
    pub fn on(&self, event: impl Into<String>, handler: EventHandler) {
        self.handlers.entry(event.into()).or_default().push(handler);
    }

    /// Number of handlers registered for an event.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |list| list.len())
    }

    /// Names of all events with at least one handler.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Run every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers that completed without a fault. The
    /// handler list is snapshotted first, so handlers may register more
    /// handlers; those run from the next trigger on.
    pub fn trigger(&self, socket: &Socket, event: &str, data: &Value) -> usize {
        let handlers = match self.handlers.get(event) {
            Some(list) => list.clone(),
            None => {
                trace!(connection = %socket.id(), event = %event, "No handlers for event");
                return 0;
            }
        };

        let mut completed = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(socket, data))) {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => {
                    warn!(
                        connection = %socket.id(),
                        event = %event,
                        handler = index,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(panic) => {
                    warn!(
                        connection = %socket.id(),
                        event = %event,
                        handler = index,
                        panic = %panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }

        trace!(
            connection = %socket.id(),
            event = %event,
            handlers = handlers.len(),
            completed,
            "Dispatched event"
        );

        completed
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.events())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;
    use beacon_transport::{ConnectionId, MemoryTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn socket() -> Socket {
        Socket::detached(ConnectionId::from("conn-1"), MemoryTransport::new())
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let socket = socket();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            dispatcher.on(
                "tick",
                handler(move |_, _| {
                    order.lock().unwrap().push(n);
                    Ok(())
                }),
            );
        }

        assert_eq!(dispatcher.trigger(&socket, "tick", &json!(null)), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_handler_runs_twice() {
        let dispatcher = EventDispatcher::new();
        let socket = socket();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let count: EventHandler = handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.on("tick", count.clone());
        dispatcher.on("tick", count);

        dispatcher.trigger(&socket, "tick", &json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_faulty_handlers_are_isolated() {
        let dispatcher = EventDispatcher::new();
        let socket = socket();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.on(
            "tick",
            handler(|_, _| Err(HandlerError::Other("boom".into()))),
        );
        dispatcher.on("tick", handler(|_, _| panic!("handler exploded")));
        let counter = calls.clone();
        dispatcher.on(
            "tick",
            handler(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        assert_eq!(dispatcher.trigger(&socket, "tick", &json!(null)), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Later events still dispatch.
        assert_eq!(dispatcher.trigger(&socket, "tick", &json!(null)), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_event_is_noop() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.trigger(&socket(), "nothing", &json!(null)), 0);
    }

    #[test]
    fn test_handler_receives_payload() {
        let dispatcher = EventDispatcher::new();
        let socket = socket();
        let seen = Arc::new(Mutex::new(None));

        let sink = seen.clone();
        dispatcher.on(
            "chat",
            handler(move |socket, data| {
                *sink.lock().unwrap() = Some((socket.id().to_string(), data.clone()));
                Ok(())
            }),
        );

        dispatcher.trigger(&socket, "chat", &json!({"text": "hi"}));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(("conn-1".to_string(), json!({"text": "hi"})))
        );
    }

    #[test]
    fn test_registration_during_dispatch() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let socket = socket();

        let inner = dispatcher.clone();
        dispatcher.on(
            "grow",
            handler(move |_, _| {
                inner.on("grow", handler(|_, _| Ok(())));
                Ok(())
            }),
        );

        assert_eq!(dispatcher.trigger(&socket, "grow", &json!(null)), 1);
        assert_eq!(dispatcher.handler_count("grow"), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
