//! Connection state and lifecycle hooks shared by the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Connection state for the websocket
///
/// A failed attempt does not have a state of its own: the error handlers run
/// and the attempt then counts as a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Reconnect after an unrequested close
    pub enabled: bool,
    /// Fixed delay before each new attempt
    pub retry_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Lifecycle events a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Open,
    Error,
    Close,
}

/// Payload passed to lifecycle handlers. Error events carry the socket
/// error message.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Error(String),
    Close,
}

impl TransportEvent {
    pub fn lifecycle(&self) -> LifecycleEvent {
        match self {
            TransportEvent::Open => LifecycleEvent::Open,
            TransportEvent::Error(_) => LifecycleEvent::Error,
            TransportEvent::Close => LifecycleEvent::Close,
        }
    }
}

pub type LifecycleHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Token returned by handler registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handlers per lifecycle event, invoked in registration order.
#[derive(Default)]
pub(crate) struct LifecycleHandlers {
    next_id: u64,
    handlers: HashMap<LifecycleEvent, Vec<(HandlerId, LifecycleHandler)>>,
}

impl LifecycleHandlers {
    pub(crate) fn register(
        &mut self,
        event: LifecycleEvent,
        handler: LifecycleHandler,
    ) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.entry(event).or_default().push((id, handler));
        id
    }

    pub(crate) fn unregister(&mut self, event: LifecycleEvent, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    fn snapshot(&self, event: LifecycleEvent) -> Vec<LifecycleHandler> {
        self.handlers
            .get(&event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }
}

/// Invoke every handler registered for the event. The lock is released
/// before calling out so handlers may register or unregister freely.
pub(crate) fn fire(handlers: &Mutex<LifecycleHandlers>, event: TransportEvent) {
    let snapshot = handlers.lock().snapshot(event.lifecycle());
    for handler in snapshot {
        handler(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn all_handlers_for_an_event_are_invoked() {
        let handlers = Mutex::new(LifecycleHandlers::default());
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            handlers.lock().register(
                LifecycleEvent::Open,
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        fire(&handlers, TransportEvent::Open);
        fire(&handlers, TransportEvent::Close);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unregistered_handler_is_not_invoked() {
        let handlers = Mutex::new(LifecycleHandlers::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = handlers.lock().register(
            LifecycleEvent::Error,
            Arc::new(move |event| {
                assert_eq!(event, &TransportEvent::Error("boom".to_string()));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        fire(&handlers, TransportEvent::Error("boom".to_string()));
        assert!(handlers.lock().unregister(LifecycleEvent::Error, id));
        assert!(!handlers.lock().unregister(LifecycleEvent::Error, id));
        fire(&handlers, TransportEvent::Error("boom".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
