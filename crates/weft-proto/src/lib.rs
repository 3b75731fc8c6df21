// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared schema for the weft event fabric.
//!
//! Pure data: the event ABI (`{payload, wrapper, hash}`), the directory
//! model (nodes, contracts, bridges), policies, traces, watch
//! subscriptions, principals, and the session wire frames. The integrity
//! commitment is a keyed BLAKE3 over a canonical JSON encoding so any
//! reimplementation interoperates byte-for-byte.

pub mod canonical;
pub mod integrity;
mod model;
pub mod wire;

pub use model::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix milliseconds.
///
/// All timestamps in the fabric (registration, heartbeats, event wrappers,
/// trace hops) are unix-epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Generate a fresh opaque identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
