// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The routing pipeline: integrity → source validation → target
//! resolution → policy → delivery → trace → watcher notification.
//!
//! The router never errors out of [`Router::route`]; every failure mode
//! becomes a trace outcome. Transport is behind [`DeliveryPort`] so the
//! front-end owns sessions and HTTP, and tests run against an in-memory
//! port. Events from the same source hold a per-source async mutex across
//! the whole pipeline, which gives per-source finalization order without
//! serializing unrelated sources.

use crate::history::{EventHistory, TraceStore};
use crate::policy::{Evaluation, PolicyEngine};
use crate::registry::Registry;
use crate::telemetry::Telemetry;
use crate::watch::WatchRegistry;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use weft_proto::{
    integrity, now_ms, Event, HopAction, LogLevel, PolicyAction, Trace, TraceHop, TraceStatus,
};

/// Transport seam the router delivers through.
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    /// Enqueue an `event:received` push to a live session. Enqueue success
    /// is delivery success; backpressure is the session's problem.
    async fn deliver_session(&self, session_id: &str, event: &Event) -> bool;

    /// POST the event to a node's HTTP endpoint. 2xx is success.
    async fn deliver_endpoint(&self, endpoint: &str, event: &Event) -> Result<(), String>;

    /// Push a finalized `{event, trace}` pair to a watching session.
    async fn notify_watcher(&self, session_id: &str, event: &Event, trace: &Trace);
}

/// Everything the router needs, owned elsewhere.
pub struct RouterParts {
    /// Shared network secret for integrity verification.
    pub secret: String,
    /// The directory.
    pub registry: Arc<Registry>,
    /// The policy store.
    pub policies: Arc<PolicyEngine>,
    /// Recent-event ring.
    pub history: Arc<EventHistory>,
    /// Trace store.
    pub traces: Arc<TraceStore>,
    /// Watch subscriptions.
    pub watches: Arc<WatchRegistry>,
    /// Counters.
    pub telemetry: Arc<Telemetry>,
    /// Transport implementation.
    pub port: Arc<dyn DeliveryPort>,
}

/// The router.
pub struct Router {
    secret: String,
    registry: Arc<Registry>,
    policies: Arc<PolicyEngine>,
    history: Arc<EventHistory>,
    traces: Arc<TraceStore>,
    watches: Arc<WatchRegistry>,
    telemetry: Arc<Telemetry>,
    port: Arc<dyn DeliveryPort>,
    source_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Dry-run result for `POST /api/sdn/simulate`: what routing *would* do,
/// with no delivery, no trace, no watcher traffic.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    /// Whether the integrity hash verifies.
    pub valid_hash: bool,
    /// Whether the source is registered.
    pub source_known: bool,
    /// Resolved targets (after any policy route override).
    pub targets: Vec<String>,
    /// Policy evaluation outcome.
    pub evaluation: Evaluation,
    /// Whether at least one target would be attempted.
    pub would_deliver: bool,
    /// Why routing would stop, when it would.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Router {
    /// Assemble a router from its parts.
    pub fn new(parts: RouterParts) -> Self {
        Self {
            secret: parts.secret,
            registry: parts.registry,
            policies: parts.policies,
            history: parts.history,
            traces: parts.traces,
            watches: parts.watches,
            telemetry: parts.telemetry,
            port: parts.port,
            source_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn source_lock(&self, source: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.source_locks.lock();
        locks
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Route one event to completion and return its finalized trace.
    pub async fn route(&self, event: Event) -> Trace {
        let lock = self.source_lock(&event.wrapper.source);
        let _ordering = lock.lock().await;

        self.telemetry.event_routed();
        let started = Instant::now();
        let mut event = event;
        let mut trace = Trace {
            event_id: event.wrapper.id.clone(),
            run_id: event.wrapper.run_id.clone(),
            path: Vec::new(),
            total_duration_ms: 0,
            status: TraceStatus::Pending,
            error: None,
        };

        self.pipeline(&mut event, &mut trace).await;
        self.finalize(&event, &mut trace, started).await;
        trace
    }

    async fn pipeline(&self, event: &mut Event, trace: &mut Trace) {
        // Integrity: non-retryable, nothing else runs.
        if !integrity::verify(event, &self.secret) {
            warn!(event = %event.wrapper.id, source = %event.wrapper.source, "invalid event hash");
            self.telemetry.hash_failure();
            trace.status = TraceStatus::Error;
            trace.error = Some("invalid hash".into());
            return;
        }

        // Source must be registered.
        if self.registry.get_node(&event.wrapper.source).is_none() {
            trace.status = TraceStatus::Error;
            trace.error = Some("source not found".into());
            return;
        }

        // Target resolution: entity, explicit target, or contract fan-out.
        let mut targets: Vec<String> = if let Some(entity) = &event.wrapper.target_entity_id {
            match self.registry.get_node_by_entity(entity) {
                Some(node) => vec![node.id],
                None => {
                    trace.status = TraceStatus::Dropped;
                    trace.error = Some("target entity not connected".into());
                    return;
                }
            }
        } else if let Some(target) = &event.wrapper.target {
            vec![target.clone()]
        } else {
            self.registry.resolve_targets(
                &event.wrapper.source,
                &event.payload.event_type,
                event.wrapper.boundary,
            )
        };
        if targets.is_empty() {
            trace.status = TraceStatus::Dropped;
            trace.error = Some("no valid targets".into());
            return;
        }

        // Policy.
        let evaluation = self.policies.evaluate(event);
        match &evaluation.action {
            PolicyAction::Deny { reason } => {
                trace.path.push(TraceHop {
                    node: event.wrapper.source.clone(),
                    timestamp: now_ms(),
                    duration_ms: 0,
                    policy_id: evaluation.policy_id.clone(),
                    action: HopAction::Drop,
                });
                trace.status = TraceStatus::Dropped;
                trace.error = Some(reason.clone().unwrap_or_else(|| "denied by policy".into()));
                return;
            }
            PolicyAction::Route { to } => {
                debug!(event = %event.wrapper.id, to = %to, "policy route override");
                targets = vec![to.clone()];
            }
            PolicyAction::Transform { .. } => {
                // Pass-through that annotates the trace; mapping semantics
                // are an extension point.
                trace.path.push(TraceHop {
                    node: event.wrapper.source.clone(),
                    timestamp: now_ms(),
                    duration_ms: 0,
                    policy_id: evaluation.policy_id.clone(),
                    action: HopAction::Transform,
                });
            }
            PolicyAction::Log { level } => {
                let id = &event.wrapper.id;
                let event_type = &event.payload.event_type;
                let boundary = event.wrapper.boundary.as_str();
                match level {
                    LogLevel::Debug => debug!(event = %id, %event_type, boundary, "policy log"),
                    LogLevel::Info => info!(event = %id, %event_type, boundary, "policy log"),
                    LogLevel::Warn => warn!(event = %id, %event_type, boundary, "policy log"),
                    LogLevel::Error => error!(event = %id, %event_type, boundary, "policy log"),
                }
            }
            PolicyAction::Allow => {}
        }

        // Delivery loop: every target is attempted; failures are hops, not
        // aborts.
        for target in targets {
            let hop_started = Instant::now();
            let Some(node) = self.registry.get_node(&target) else {
                self.telemetry.delivery_failure();
                trace.path.push(TraceHop {
                    node: target,
                    timestamp: now_ms(),
                    duration_ms: 0,
                    policy_id: evaluation.policy_id.clone(),
                    action: HopAction::Drop,
                });
                continue;
            };

            // Authoritative traversal record, before the attempt.
            event.wrapper.path.push(target.clone());

            let outcome = if let Some(session_id) = &node.session_id {
                if self.port.deliver_session(session_id, event).await {
                    Ok(())
                } else {
                    Err("session gone".to_string())
                }
            } else if let Some(endpoint) = &node.endpoint {
                self.port.deliver_endpoint(endpoint, event).await
            } else {
                Err("no session or endpoint".to_string())
            };

            let action = match outcome {
                Ok(()) => HopAction::Deliver,
                Err(reason) => {
                    warn!(event = %event.wrapper.id, target = %target, %reason, "delivery failed");
                    self.telemetry.delivery_failure();
                    HopAction::Drop
                }
            };
            trace.path.push(TraceHop {
                node: target,
                timestamp: now_ms(),
                duration_ms: hop_started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
                policy_id: evaluation.policy_id.clone(),
                action,
            });
        }
    }

    async fn finalize(&self, event: &Event, trace: &mut Trace, started: Instant) {
        if trace.status == TraceStatus::Pending {
            let any_delivered = trace.path.iter().any(|h| h.action == HopAction::Deliver);
            if any_delivered {
                trace.status = TraceStatus::Delivered;
            } else {
                trace.status = TraceStatus::Dropped;
                trace.error = Some("delivery failed".into());
            }
        }
        trace.total_duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        match trace.status {
            TraceStatus::Delivered => self.telemetry.event_delivered(),
            TraceStatus::Error => self.telemetry.event_errored(),
            TraceStatus::Dropped => self.telemetry.event_dropped(
                &event.payload.event_type,
                event.wrapper.boundary,
                trace.error.as_deref().unwrap_or("dropped"),
            ),
            TraceStatus::Pending => {}
        }

        self.history.record(event.clone());
        self.traces.record(trace.clone());

        for sub in self.watches.matching(event) {
            self.port.notify_watcher(&sub.session_id, event, trace).await;
        }
    }

    /// Dry-run: resolve and evaluate without delivering or recording.
    pub fn simulate(&self, event: &Event) -> SimulationReport {
        let valid_hash = integrity::verify(event, &self.secret);
        let source_known = self.registry.get_node(&event.wrapper.source).is_some();
        if !valid_hash || !source_known {
            return SimulationReport {
                valid_hash,
                source_known,
                targets: vec![],
                evaluation: self.policies.evaluate(event),
                would_deliver: false,
                reason: Some(if valid_hash {
                    "source not found".into()
                } else {
                    "invalid hash".into()
                }),
            };
        }

        let mut targets: Vec<String> = if let Some(entity) = &event.wrapper.target_entity_id {
            self.registry
                .get_node_by_entity(entity)
                .map(|n| vec![n.id])
                .unwrap_or_default()
        } else if let Some(target) = &event.wrapper.target {
            vec![target.clone()]
        } else {
            self.registry.resolve_targets(
                &event.wrapper.source,
                &event.payload.event_type,
                event.wrapper.boundary,
            )
        };

        let evaluation = self.policies.evaluate(event);
        let mut reason = None;
        match &evaluation.action {
            PolicyAction::Deny { reason: why } => {
                targets.clear();
                reason = Some(why.clone().unwrap_or_else(|| "denied by policy".into()));
            }
            PolicyAction::Route { to } => targets = vec![to.clone()],
            _ => {}
        }
        if targets.is_empty() && reason.is_none() {
            reason = Some("no valid targets".into());
        }

        SimulationReport {
            valid_hash,
            source_known,
            would_deliver: !targets.is_empty(),
            targets,
            evaluation,
            reason,
        }
    }
}
