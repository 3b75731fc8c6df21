// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared daemon state: the single owned state object handed to every
//! handler (no ambient globals).

use crate::auth::Introspector;
use crate::config::Config;
use crate::delivery::FabricPort;
use crate::session::Sessions;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_core::history::{EventHistory, TraceStore};
use weft_core::policy::PolicyEngine;
use weft_core::registry::{AutoContractRule, Registry};
use weft_core::router::{DeliveryPort, Router, RouterParts};
use weft_core::telemetry::Telemetry;
use weft_core::watch::WatchRegistry;
use weft_proto::now_ms;

/// Everything a handler can reach, behind one `Arc`.
pub struct AppState {
    /// Parsed configuration.
    pub config: Config,
    /// Effective network secret.
    pub secret: String,
    /// The directory.
    pub registry: Arc<Registry>,
    /// Policy store.
    pub policies: Arc<PolicyEngine>,
    /// Recent events.
    pub history: Arc<EventHistory>,
    /// Trace store.
    pub traces: Arc<TraceStore>,
    /// Watch subscriptions.
    pub watches: Arc<WatchRegistry>,
    /// Counters.
    pub telemetry: Arc<Telemetry>,
    /// Live sessions and their outboxes.
    pub sessions: Arc<Sessions>,
    /// The routing pipeline.
    pub router: Arc<Router>,
    /// Identity introspection client.
    pub introspector: Introspector,
    /// Daemon start time (unix ms), for metrics.
    pub started_at_unix_ms: u64,
    /// Monotonic start instant, for uptime.
    pub start_instant: Instant,
}

impl AppState {
    /// Wire up stores, sessions, delivery, and the router from config.
    pub fn build(config: Config) -> Result<Arc<Self>> {
        let secret = config.resolve_secret()?;
        let telemetry = Arc::new(Telemetry::new());
        let registry = Arc::new(Registry::new(
            config.node_timeout_secs.saturating_mul(1000),
            AutoContractRule::standard(),
        ));
        let policies = Arc::new(PolicyEngine::new());
        policies.seed_defaults();
        let history = Arc::new(EventHistory::new(config.max_event_history));
        let traces = Arc::new(TraceStore::new(config.max_trace_history));
        let watches = Arc::new(WatchRegistry::new());
        let sessions = Arc::new(Sessions::new(Arc::clone(&telemetry)));
        let port = Arc::new(FabricPort::new(
            Arc::clone(&sessions),
            Duration::from_secs(config.delivery_timeout_secs),
        )?);
        let router = Arc::new(Router::new(RouterParts {
            secret: secret.clone(),
            registry: Arc::clone(&registry),
            policies: Arc::clone(&policies),
            history: Arc::clone(&history),
            traces: Arc::clone(&traces),
            watches: Arc::clone(&watches),
            telemetry: Arc::clone(&telemetry),
            port: port as Arc<dyn DeliveryPort>,
        }));
        let introspector = Introspector::new(
            config.identity_url.clone(),
            config.service_key.clone(),
        )?;

        Ok(Arc::new(Self {
            config,
            secret,
            registry,
            policies,
            history,
            traces,
            watches,
            telemetry,
            sessions,
            router,
            introspector,
            started_at_unix_ms: now_ms(),
            start_instant: Instant::now(),
        }))
    }
}
