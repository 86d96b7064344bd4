//! Domain events infrastructure
//!
//! Components publish notifications through an [`EventEmitter`]: an explicit
//! per-event-name observer list. Listener lists are snapshotted before
//! invocation, so a listener may register or remove listeners (including
//! itself) while it runs.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events carried by an emitter expose a stable name used for dispatch
pub trait NamedEvent: Send + Sync {
    fn name(&self) -> &'static str;
}

/// Handle returned by [`EventEmitter::on`], used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            listener: self.listener.clone(),
        }
    }
}

/// Observer registry keyed by event name
pub struct EventEmitter<E> {
    listeners: Mutex<HashMap<String, Vec<Registration<E>>>>,
    next_id: AtomicU64,
}

impl<E: NamedEvent> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for every emission of `name`
    pub fn on<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name, false, Arc::new(listener))
    }

    /// Register a listener that fires at most once
    pub fn once<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(name, true, Arc::new(listener))
    }

    /// Remove a listener; returns false if it was already gone
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let mut removed = false;
        for list in listeners.values_mut() {
            let before = list.len();
            list.retain(|r| r.id != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Deliver an event to the listeners registered for its name
    pub fn emit(&self, event: E) {
        let snapshot: Vec<Registration<E>> = {
            let mut listeners = self.listeners.lock();
            match listeners.get_mut(event.name()) {
                Some(list) => {
                    let snapshot = list.clone();
                    list.retain(|r| !r.once);
                    snapshot
                }
                None => return,
            }
        };

        for registration in snapshot {
            (registration.listener)(&event);
        }
    }

    /// Number of listeners registered for `name`
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map_or(0, Vec::len)
    }

    fn register(&self, name: &str, once: bool, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Registration { id, once, listener });
        id
    }
}

impl<E: NamedEvent> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    enum TestEvent {
        Ping,
        Pong,
    }

    impl NamedEvent for TestEvent {
        fn name(&self) -> &'static str {
            match self {
                TestEvent::Ping => "ping",
                TestEvent::Pong => "pong",
            }
        }
    }

    #[test]
    fn test_emit_reaches_named_listeners_only() {
        let emitter = EventEmitter::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = pings.clone();
        emitter.on("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(TestEvent::Ping);
        emitter.emit(TestEvent::Pong);
        emitter.emit(TestEvent::Ping);

        assert_eq!(pings.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        emitter.once("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(TestEvent::Ping);
        emitter.emit(TestEvent::Ping);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count("ping"), 0);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = EventEmitter::<TestEvent>::new();
        let id = emitter.on("pong", |_| {});
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.listener_count("pong"), 0);
    }

    #[test]
    fn test_listener_may_modify_registry_during_dispatch() {
        let emitter = Arc::new(EventEmitter::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = emitter.clone();
        let counter = hits.clone();
        emitter.on("ping", move |_| {
            let counter = counter.clone();
            inner.on("ping", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The listener added during dispatch only sees the next emission.
        emitter.emit(TestEvent::Ping);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        emitter.emit(TestEvent::Ping);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
