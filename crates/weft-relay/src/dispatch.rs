// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process-local event dispatch: string type → handler list, plus a
//! wildcard entry that fires in addition to type-specific handlers.
//!
//! Handler panics are isolated: one misbehaving handler is logged and the
//! rest still run.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use weft_proto::Event;

/// Wildcard entry firing for every event type.
pub const WILDCARD: &str = "*";

/// Shared event callback.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Handle returned by [`Handlers::add`]; pass it back to remove the
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerToken {
    event_type: String,
    id: u64,
}

/// The dispatch table.
#[derive(Default)]
pub struct Handlers {
    next_id: AtomicU64,
    by_type: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
}

impl Handlers {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to an event type (or [`WILDCARD`]).
    pub fn add(&self, event_type: &str, handler: impl Fn(Event) + Send + Sync + 'static) -> HandlerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_type
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        HandlerToken {
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Remove a previously added handler; false when already gone.
    pub fn remove(&self, token: &HandlerToken) -> bool {
        let mut by_type = self.by_type.lock();
        let Some(handlers) = by_type.get_mut(&token.event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != token.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            by_type.remove(&token.event_type);
        }
        removed
    }

    /// Fire the handlers for an event: exact-type first, wildcard after.
    pub fn fire(&self, event: &Event) {
        let handlers: Vec<EventHandler> = {
            let by_type = self.by_type.lock();
            let mut list = Vec::new();
            if let Some(exact) = by_type.get(&event.payload.event_type) {
                list.extend(exact.iter().map(|(_, h)| Arc::clone(h)));
            }
            if let Some(any) = by_type.get(WILDCARD) {
                list.extend(any.iter().map(|(_, h)| Arc::clone(h)));
            }
            list
        };
        for handler in handlers {
            let cloned = event.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(cloned))).is_err() {
                warn!(event_type = %event.payload.event_type, "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use weft_proto::{Boundary, EventPayload, EventWrapper};

    fn event(event_type: &str) -> Event {
        Event {
            payload: EventPayload {
                event_type: event_type.into(),
                data: json!({}),
            },
            wrapper: EventWrapper::new("source", "r1", Boundary::Intra),
            hash: String::new(),
        }
    }

    #[test]
    fn exact_and_wildcard_both_fire() {
        let handlers = Handlers::new();
        let exact = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        let exact_count = Arc::clone(&exact);
        handlers.add("message.new", move |_| {
            exact_count.fetch_add(1, Ordering::Relaxed);
        });
        let any_count = Arc::clone(&any);
        handlers.add(WILDCARD, move |_| {
            any_count.fetch_add(1, Ordering::Relaxed);
        });

        handlers.fire(&event("message.new"));
        handlers.fire(&event("other.kind"));

        assert_eq!(exact.load(Ordering::Relaxed), 1);
        assert_eq!(any.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn remove_unsubscribes() {
        let handlers = Handlers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let token = handlers.add("message.new", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        handlers.fire(&event("message.new"));
        assert!(handlers.remove(&token));
        assert!(!handlers.remove(&token));
        handlers.fire(&event("message.new"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn a_panicking_handler_does_not_starve_the_rest() {
        let handlers = Handlers::new();
        handlers.add("message.new", |_| panic!("boom"));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        handlers.add("message.new", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        handlers.fire(&event("message.new"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
