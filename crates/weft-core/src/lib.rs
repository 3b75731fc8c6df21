// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core of the weft event fabric.
//!
//! In-memory, single-instance, multi-threaded: the [`registry::Registry`]
//! directory, the [`policy::PolicyEngine`], bounded [`history`] stores,
//! the [`watch::WatchRegistry`], [`telemetry`] counters, and the
//! [`router::Router`] pipeline that ties them together. Delivery and
//! watcher push go through the [`router::DeliveryPort`] seam so the
//! front-end (or a test harness) owns the transport.

pub mod history;
pub mod policy;
pub mod registry;
pub mod router;
pub mod telemetry;
pub mod watch;

/// Fabric-level failure surfaced to callers (sessions, HTTP handlers).
///
/// Routing outcomes are *not* errors; they are traces. This type covers
/// the validation-shaped failures visible before routing starts.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FabricError {
    /// Referenced node does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),
    /// Contract creation referenced a source that does not exist.
    #[error("contract source not found: {0}")]
    SourceNotFound(String),
    /// Referenced contract does not exist.
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    /// Referenced bridge does not exist.
    #[error("unknown bridge: {0}")]
    UnknownBridge(String),
    /// Referenced policy does not exist.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
    /// Malformed input.
    #[error("invalid input: {0}")]
    Invalid(String),
}
