// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process-wide routing counters, snapshot-able for `/api/metrics`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use weft_proto::Boundary;

/// Routing and delivery counters. Cheap to bump from any thread.
#[derive(Default)]
pub struct Telemetry {
    events_routed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    hash_failures: AtomicU64,
    delivery_failed: AtomicU64,
    // reason buckets keyed "type|boundary|reason"
    drops: RwLock<BTreeMap<String, u64>>,
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Events that entered the router.
    pub events_routed: u64,
    /// Traces finalized as delivered.
    pub delivered: u64,
    /// Traces finalized as dropped.
    pub dropped: u64,
    /// Traces finalized as error.
    pub errors: u64,
    /// Integrity verification failures.
    pub hash_failures: u64,
    /// Per-target delivery failures (including session-queue overflow).
    pub delivery_failed: u64,
    /// Drop reasons bucketed by `eventType|boundary|reason`.
    pub drops: BTreeMap<String, u64>,
}

impl Telemetry {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// An event entered the pipeline.
    pub fn event_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// A trace finalized as delivered.
    pub fn event_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A trace finalized as error.
    pub fn event_errored(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Integrity verification failed (security signal).
    pub fn hash_failure(&self) {
        self.hash_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A single target could not be delivered to.
    pub fn delivery_failure(&self) {
        self.delivery_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A trace finalized as dropped, bucketed by type/boundary/reason.
    pub fn event_dropped(&self, event_type: &str, boundary: Boundary, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let key = format!("{event_type}|{}|{reason}", boundary.as_str());
        *self.drops.write().entry(key).or_insert(0) += 1;
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            events_routed: self.events_routed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hash_failures: self.hash_failures.load(Ordering::Relaxed),
            delivery_failed: self.delivery_failed.load(Ordering::Relaxed),
            drops: self.drops.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_buckets_accumulate() {
        let t = Telemetry::new();
        t.event_routed();
        t.event_dropped("message.new", Boundary::Intra, "no valid targets");
        t.event_dropped("message.new", Boundary::Intra, "no valid targets");
        t.event_dropped("message.new", Boundary::Extra, "external blocked");
        let snap = t.snapshot();
        assert_eq!(snap.events_routed, 1);
        assert_eq!(snap.dropped, 3);
        assert_eq!(snap.drops["message.new|intra|no valid targets"], 2);
        assert_eq!(snap.drops["message.new|extra|external blocked"], 1);
    }
}
