//! Event Bus - publish/subscribe hub keyed by event kind
//!
//! Handlers run synchronously on the dispatching task, in registration order.
//! Handlers that do slow work (HTTP delivery) spawn it and return at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::types::{Event, EventKind};

/// A registered event handler
pub type Handler = Arc<dyn Fn(&Event) -> eyre::Result<()> + Send + Sync>;

/// Central event bus
///
/// Every clear starts a new generation; handlers registered before the clear
/// never see events dispatched after it.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
    generation: AtomicU64,
}

impl EventBus {
    /// Create an empty event bus
    pub fn new() -> Self {
        debug!("EventBus::new: creating event bus");
        Self::default()
    }

    /// Append a handler for an event kind
    pub fn register<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) -> eyre::Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = handlers.entry(kind).or_default();
        entry.push(Arc::new(handler));
        debug!(%kind, count = entry.len(), generation = self.generation(), "EventBus::register");
    }

    /// Invoke every handler registered for the event's kind
    ///
    /// Handlers run in registration order; a failing handler is logged and
    /// does not stop the ones after it. Returns the number of handlers run.
    pub fn dispatch(&self, event: &Event) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may register or clear without deadlocking
        let handlers: Vec<Handler> = {
            let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            map.get(&kind).cloned().unwrap_or_default()
        };

        debug!(%kind, handlers = handlers.len(), "EventBus::dispatch");
        for (index, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(event) {
                warn!(%kind, handler = index, error = %e, "Event handler failed");
            }
        }
        handlers.len()
    }

    /// Remove every registration for every kind
    pub fn clear_all(&self) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.clear();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "EventBus::clear_all");
    }

    /// Number of handlers registered for a kind
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Number of clears since creation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GitRef, RepositoryChange};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn change_event(name: &str) -> Event {
        Event::RepositoryChange(RepositoryChange {
            name: name.to_string(),
            url: format!("https://example.com/{name}.git"),
            changes: vec![GitRef::new("main", "h1")],
        })
    }

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::new();
        assert_eq!(bus.handler_count(EventKind::RepositoryChange), 0);
        assert_eq!(bus.generation(), 0);
    }

    #[test]
    fn test_dispatch_runs_handlers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = order.clone();
            bus.register(EventKind::RepositoryChange, move |_| {
                order.lock().unwrap().push(id);
                Ok(())
            });
        }

        assert_eq!(bus.dispatch(&change_event("app")), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.register(EventKind::RepositoryChange, |_| Err(eyre::eyre!("boom")));
        let counter = calls.clone();
        bus.register(EventKind::RepositoryChange, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.dispatch(&change_event("app"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_receives_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bus.register(EventKind::RepositoryChange, move |event| {
            *sink.lock().unwrap() = Some(event.clone());
            Ok(())
        });

        bus.dispatch(&change_event("app"));

        assert_eq!(*seen.lock().unwrap(), Some(change_event("app")));
    }

    #[test]
    fn test_clear_all_drops_every_handler() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bus.register(EventKind::RepositoryChange, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.clear_all();

        assert_eq!(bus.dispatch(&change_event("app")), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.generation(), 1);
    }

    #[test]
    fn test_dispatch_without_handlers() {
        let bus = EventBus::new();
        // This should not panic even with no handlers
        assert_eq!(bus.dispatch(&change_event("app")), 0);
    }

    #[test]
    fn test_handler_may_clear_bus_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.register(EventKind::RepositoryChange, move |_| {
            inner.clear_all();
            Ok(())
        });

        assert_eq!(bus.dispatch(&change_event("app")), 1);
        assert_eq!(bus.handler_count(EventKind::RepositoryChange), 0);
    }
}
