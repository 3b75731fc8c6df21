// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded in-memory stores for routed events and their traces.
//!
//! Both stores evict oldest-by-insertion once full; readers only ever see
//! complete entries.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use weft_proto::{Event, Trace, TraceStatus};

/// Ring buffer of recently routed events.
pub struct EventHistory {
    capacity: usize,
    events: RwLock<VecDeque<Event>>,
}

impl EventHistory {
    /// Ring of the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Append an event, evicting the oldest when full.
    pub fn record(&self, event: Event) {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.events.read().iter().rev().take(limit).cloned().collect()
    }

    /// Events of one run in submission order, up to the `limit` most
    /// recent.
    pub fn for_run(&self, run_id: &str, limit: usize) -> Vec<Event> {
        let events = self.events.read();
        let mut hits: Vec<Event> = events
            .iter()
            .rev()
            .filter(|e| e.wrapper.run_id == run_id)
            .take(limit)
            .cloned()
            .collect();
        hits.reverse();
        hits
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

/// Routing outcome counters across the retained traces.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceStats {
    /// Traces that reached at least one target.
    pub delivered: u64,
    /// Traces dropped before or during delivery.
    pub dropped: u64,
    /// Traces that failed integrity or internally.
    pub errors: u64,
    /// Traces still in flight.
    pub pending: u64,
}

struct TraceState {
    by_id: HashMap<String, Trace>,
    order: VecDeque<String>,
}

/// Insertion-ordered trace store with oldest-first eviction.
pub struct TraceStore {
    capacity: usize,
    state: RwLock<TraceState>,
}

impl TraceStore {
    /// Store retaining up to `capacity` traces (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(TraceState {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Insert a finalized trace, evicting the oldest beyond capacity.
    pub fn record(&self, trace: Trace) {
        let mut state = self.state.write();
        if !state.by_id.contains_key(&trace.event_id) {
            state.order.push_back(trace.event_id.clone());
        }
        state.by_id.insert(trace.event_id.clone(), trace);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.by_id.remove(&oldest);
            }
        }
    }

    /// Trace of one event.
    pub fn get(&self, event_id: &str) -> Option<Trace> {
        self.state.read().by_id.get(event_id).cloned()
    }

    /// Traces of one run in finalization order.
    pub fn for_run(&self, run_id: &str) -> Vec<Trace> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Outcome counts across retained traces.
    pub fn stats(&self) -> TraceStats {
        let state = self.state.read();
        let mut stats = TraceStats::default();
        for trace in state.by_id.values() {
            match trace.status {
                TraceStatus::Delivered => stats.delivered += 1,
                TraceStatus::Dropped => stats.dropped += 1,
                TraceStatus::Error => stats.errors += 1,
                TraceStatus::Pending => stats.pending += 1,
            }
        }
        stats
    }

    /// Number of retained traces.
    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    /// True when no trace is retained.
    pub fn is_empty(&self) -> bool {
        self.state.read().order.is_empty()
    }
}
