// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SDN watch subscriptions: who gets which finalized traces.

use parking_lot::RwLock;
use weft_proto::{new_id, now_ms, Event, WatchFilter, WatchSubscription};

/// Registry of live watch subscriptions.
#[derive(Default)]
pub struct WatchRegistry {
    subs: RwLock<Vec<WatchSubscription>>,
}

impl WatchRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subscription owned by `session_id`.
    pub fn add(&self, filters: WatchFilter, session_id: &str) -> WatchSubscription {
        let sub = WatchSubscription {
            id: new_id(),
            filters,
            session_id: session_id.to_string(),
            created_at: now_ms(),
        };
        self.subs.write().push(sub.clone());
        sub
    }

    /// Remove a subscription; only its owning session may do so.
    pub fn remove(&self, subscription_id: &str, session_id: &str) -> bool {
        let mut subs = self.subs.write();
        let before = subs.len();
        subs.retain(|s| !(s.id == subscription_id && s.session_id == session_id));
        subs.len() != before
    }

    /// Drop every subscription owned by a session (session close).
    pub fn remove_session(&self, session_id: &str) -> usize {
        let mut subs = self.subs.write();
        let before = subs.len();
        subs.retain(|s| s.session_id != session_id);
        before - subs.len()
    }

    /// Subscriptions whose filters match the event.
    pub fn matching(&self, event: &Event) -> Vec<WatchSubscription> {
        self.subs
            .read()
            .iter()
            .filter(|s| s.filters.matches(event))
            .cloned()
            .collect()
    }

    /// All live subscriptions.
    pub fn list(&self) -> Vec<WatchSubscription> {
        self.subs.read().clone()
    }
}
