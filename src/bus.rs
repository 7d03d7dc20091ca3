//! Session Event Bus (C5): a per-session, synchronous, in-process pub/sub
//! keyed by event type, adapted from this codebase's global agent event
//! bus down to one instance per session — delivery is still lock-free on
//! the read path and listeners may (un)register from inside a handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::event::SessionEvent;

type ListenerFn = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

pub struct SessionBus {
    listeners: RwLock<HashMap<String, Vec<(u64, ListenerFn)>>>,
    next_id: AtomicU64,
    destroyed: AtomicBool,
}

impl SessionBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Registers `listener` for `event_type`. Returns a handle usable with
    /// [`Self::unsubscribe`].
    pub fn subscribe(&self, event_type: impl Into<String>, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap()
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Registers `listener` for every event type.
    pub fn subscribe_all(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> u64 {
        self.subscribe(WILDCARD, listener)
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut listeners = self.listeners.write().unwrap();
        for bucket in listeners.values_mut() {
            bucket.retain(|(lid, _)| *lid != id);
        }
    }

    /// Delivers `event` synchronously to every listener currently
    /// registered for its type plus every wildcard listener. A listener
    /// that panics is caught and logged; it does not stop delivery to the
    /// rest, and it does not propagate to the caller. No-op once
    /// [`Self::destroy`] has run.
    pub fn emit(&self, event: SessionEvent) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let targeted: Vec<ListenerFn> = {
            let listeners = self.listeners.read().unwrap();
            let mut out = Vec::new();
            if let Some(bucket) = listeners.get(&event.kind) {
                out.extend(bucket.iter().map(|(_, f)| f.clone()));
            }
            if let Some(bucket) = listeners.get(WILDCARD) {
                out.extend(bucket.iter().map(|(_, f)| f.clone()));
            }
            out
        };
        for listener in targeted {
            let event_ref = &event;
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event_ref)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                tracing::error!(event_type = %event.kind, %message, "session bus listener panicked");
            }
        }
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.read().unwrap().get(event_type).map(Vec::len).unwrap_or(0)
    }

    /// Tears the bus down; subsequent `emit` calls are no-ops.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.listeners.write().unwrap().clear();
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

const WILDCARD: &str = "*";

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_delivers_only_to_matching_type() {
        let bus = SessionBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let rx = received.clone();
        bus.subscribe("block:start", move |e| rx.lock().unwrap().push(e.kind.clone()));
        bus.emit(SessionEvent::new("block:start", serde_json::json!({})));
        bus.emit(SessionEvent::new("block:complete", serde_json::json!({})));
        assert_eq!(*received.lock().unwrap(), vec!["block:start".to_string()]);
    }

    #[test]
    fn subscribe_all_receives_every_type() {
        let bus = SessionBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(SessionEvent::new("a", serde_json::json!({})));
        bus.emit(SessionEvent::new("b", serde_json::json!({})));
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = SessionBus::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        let id = bus.subscribe("x", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.unsubscribe(id);
        bus.emit(SessionEvent::new("x", serde_json::json!({})));
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn destroy_makes_subsequent_emits_noops() {
        let bus = SessionBus::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        bus.subscribe("x", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.destroy();
        bus.emit(SessionEvent::new("x", serde_json::json!({})));
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn listener_count_reflects_subscriptions() {
        let bus = SessionBus::new();
        assert_eq!(bus.listener_count("x"), 0);
        let id_a = bus.subscribe("x", |_| {});
        let _id_b = bus.subscribe("x", |_| {});
        assert_eq!(bus.listener_count("x"), 2);
        bus.unsubscribe(id_a);
        assert_eq!(bus.listener_count("x"), 1);
    }

    #[test]
    fn a_panicking_listener_does_not_stop_delivery_to_others() {
        let bus = SessionBus::new();
        let called = Arc::new(AtomicUsize::new(0));
        bus.subscribe("x", |_| panic!("boom"));
        let c = called.clone();
        bus.subscribe("x", move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(SessionEvent::new("x", serde_json::json!({})));
        assert_eq!(called.load(Ordering::Relaxed), 1);
    }
}
