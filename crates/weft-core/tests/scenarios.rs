// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end routing drills against an in-memory delivery port.

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use weft_core::history::{EventHistory, TraceStore};
use weft_core::policy::{NewPolicy, PolicyEngine};
use weft_core::registry::{RegisterNode, Registry};
use weft_core::router::{DeliveryPort, Router, RouterParts};
use weft_core::telemetry::Telemetry;
use weft_core::watch::WatchRegistry;
use weft_proto::{
    integrity, Boundary, Event, EventPayload, EventWrapper, HopAction, NodeType, PolicyAction,
    PolicyCondition, PolicyField, PolicyOperator, Trace, TraceStatus, WatchFilter,
};

const SECRET: &str = "scenario-secret";

#[derive(Default)]
struct MemoryPort {
    live_sessions: HashSet<String>,
    session_deliveries: Mutex<Vec<(String, String)>>,
    endpoint_deliveries: Mutex<Vec<(String, String)>>,
    watcher_pushes: Mutex<Vec<(String, Trace)>>,
}

#[async_trait]
impl DeliveryPort for MemoryPort {
    async fn deliver_session(&self, session_id: &str, event: &Event) -> bool {
        // Yield so concurrently routed events genuinely interleave.
        tokio::task::yield_now().await;
        if !self.live_sessions.contains(session_id) {
            return false;
        }
        self.session_deliveries
            .lock()
            .push((session_id.to_string(), event.wrapper.id.clone()));
        true
    }

    async fn deliver_endpoint(&self, endpoint: &str, event: &Event) -> Result<(), String> {
        tokio::task::yield_now().await;
        self.endpoint_deliveries
            .lock()
            .push((endpoint.to_string(), event.wrapper.id.clone()));
        Ok(())
    }

    async fn notify_watcher(&self, session_id: &str, _event: &Event, trace: &Trace) {
        self.watcher_pushes
            .lock()
            .push((session_id.to_string(), trace.clone()));
    }
}

struct Fabric {
    registry: Arc<Registry>,
    policies: Arc<PolicyEngine>,
    traces: Arc<TraceStore>,
    watches: Arc<WatchRegistry>,
    telemetry: Arc<Telemetry>,
    port: Arc<MemoryPort>,
    router: Arc<Router>,
}

fn fabric_with(port: MemoryPort, trace_capacity: usize) -> Fabric {
    let registry = Arc::new(Registry::new(90_000, vec![]));
    let policies = Arc::new(PolicyEngine::new());
    policies.seed_defaults();
    let history = Arc::new(EventHistory::new(1000));
    let traces = Arc::new(TraceStore::new(trace_capacity));
    let watches = Arc::new(WatchRegistry::new());
    let telemetry = Arc::new(Telemetry::new());
    let port = Arc::new(port);
    let router = Arc::new(Router::new(RouterParts {
        secret: SECRET.into(),
        registry: Arc::clone(&registry),
        policies: Arc::clone(&policies),
        history: Arc::clone(&history),
        traces: Arc::clone(&traces),
        watches: Arc::clone(&watches),
        telemetry: Arc::clone(&telemetry),
        port: Arc::clone(&port) as Arc<dyn DeliveryPort>,
    }));
    Fabric {
        registry,
        policies,
        traces,
        watches,
        telemetry,
        port,
        router,
    }
}

fn service(id: &str, session: Option<&str>, endpoint: Option<&str>) -> RegisterNode {
    RegisterNode {
        id: id.into(),
        name: id.into(),
        node_type: NodeType::Service,
        capabilities: vec![],
        endpoint: endpoint.map(Into::into),
        session_id: session.map(Into::into),
        entity_id: None,
        metadata: None,
    }
}

fn sealed(
    source: &str,
    run_id: &str,
    event_type: &str,
    data: serde_json::Value,
    boundary: Boundary,
    target: Option<&str>,
) -> Event {
    let mut wrapper = EventWrapper::new(source, run_id, boundary);
    wrapper.target = target.map(Into::into);
    integrity::seal(
        EventPayload {
            event_type: event_type.into(),
            data,
        },
        wrapper,
        SECRET,
    )
}

/// Scenario A: intra fan-out via contract delivers to the one covered node.
#[tokio::test]
async fn scenario_a_intra_fanout_via_contract() {
    let mut port = MemoryPort::default();
    port.live_sessions.insert("sess-assistants".into());
    let f = fabric_with(port, 100);
    f.registry.register_node(service("messaging", None, None));
    f.registry
        .register_node(service("assistants", Some("sess-assistants"), None));
    f.registry
        .create_contract(
            "messaging",
            "assistants",
            vec!["message.new".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

    let event = sealed(
        "messaging",
        "r1",
        "message.new",
        json!({"conversationId": "c1"}),
        Boundary::Intra,
        None,
    );
    let trace = f.router.route(event).await;

    assert_eq!(trace.status, TraceStatus::Delivered);
    let delivers: Vec<&str> = trace
        .path
        .iter()
        .filter(|h| h.action == HopAction::Deliver)
        .map(|h| h.node.as_str())
        .collect();
    assert_eq!(delivers, vec!["assistants"]);
    assert_eq!(f.port.session_deliveries.lock().len(), 1);
}

/// Scenario B: a deny policy drops with its reason and no delivery.
#[tokio::test]
async fn scenario_b_policy_deny() {
    let f = fabric_with(MemoryPort::default(), 100);
    f.registry.register_node(service("integrations", None, None));
    f.registry
        .register_node(service("logging", None, Some("http://logging/events")));
    let policy = f.policies.create(NewPolicy {
        name: "block-extra".into(),
        priority: 200,
        conditions: vec![PolicyCondition {
            field: PolicyField::Boundary,
            operator: PolicyOperator::Eq,
            value: "extra".into(),
        }],
        action: PolicyAction::Deny {
            reason: Some("external blocked".into()),
        },
        enabled: true,
    });

    let event = sealed(
        "integrations",
        "r-ext",
        "sync.push",
        json!({}),
        Boundary::Extra,
        Some("logging"),
    );
    let trace = f.router.route(event).await;

    assert_eq!(trace.status, TraceStatus::Dropped);
    assert_eq!(trace.error.as_deref(), Some("external blocked"));
    assert_eq!(trace.path.len(), 1);
    assert_eq!(trace.path[0].action, HopAction::Drop);
    assert_eq!(trace.path[0].policy_id.as_deref(), Some(policy.id.as_str()));
    assert!(f.port.endpoint_deliveries.lock().is_empty());
}

/// Scenario C: mutating committed data without recomputing the hash is an
/// integrity error before any policy runs.
#[tokio::test]
async fn scenario_c_integrity_failure() {
    let f = fabric_with(MemoryPort::default(), 100);
    f.registry.register_node(service("messaging", None, None));
    // A deny-everything policy that must NOT fire.
    f.policies.create(NewPolicy {
        name: "tripwire".into(),
        priority: 1000,
        conditions: vec![],
        action: PolicyAction::Deny {
            reason: Some("tripwire".into()),
        },
        enabled: true,
    });

    let mut event = sealed(
        "messaging",
        "r1",
        "message.new",
        json!({"foo": 1}),
        Boundary::Intra,
        None,
    );
    event.payload.data["foo"] = json!(2);
    let trace = f.router.route(event).await;

    assert_eq!(trace.status, TraceStatus::Error);
    assert_eq!(trace.error.as_deref(), Some("invalid hash"));
    assert!(trace.path.is_empty());
    assert_eq!(f.telemetry.snapshot().hash_failures, 1);
}

/// Scenario D: entity routing with a cleared binding drops.
#[tokio::test]
async fn scenario_d_disconnected_entity() {
    let f = fabric_with(MemoryPort::default(), 100);
    f.registry.register_node(service("messaging", None, None));
    f.registry.register_node(service("asst1", None, None));
    f.registry.bind_entity("asst1", "ent_X").unwrap();
    f.registry.unbind_entity("asst1").unwrap();

    let mut event = sealed(
        "messaging",
        "r1",
        "message.new",
        json!({}),
        Boundary::Intra,
        None,
    );
    event.wrapper.target_entity_id = Some("ent_X".into());
    let trace = f.router.route(event).await;

    assert_eq!(trace.status, TraceStatus::Dropped);
    assert!(trace
        .error
        .as_deref()
        .is_some_and(|e| e.contains("target entity not connected")));
}

/// Scenario E: wildcard contract broadcast reaches everyone but the source.
#[tokio::test]
async fn scenario_e_wildcard_broadcast() {
    let f = fabric_with(MemoryPort::default(), 100);
    for id in ["assistants", "messaging", "logging", "integrations"] {
        f.registry
            .register_node(service(id, None, Some(&format!("http://{id}/events"))));
    }
    f.registry
        .create_contract(
            "assistants",
            "*",
            vec!["assistant.intent.claim".into()],
            vec![Boundary::Intra, Boundary::Inter],
            None,
        )
        .unwrap();

    let event = sealed(
        "assistants",
        "r1",
        "assistant.intent.claim",
        json!({"conversationId": "c1"}),
        Boundary::Intra,
        None,
    );
    let trace = f.router.route(event).await;

    assert_eq!(trace.status, TraceStatus::Delivered);
    let mut targets: Vec<&str> = trace.path.iter().map(|h| h.node.as_str()).collect();
    targets.sort_unstable();
    assert_eq!(targets, vec!["integrations", "logging", "messaging"]);
    assert!(trace.path.iter().all(|h| h.node != "assistants"));
}

/// Property 9: per-source traces finalize in submission order even when the
/// pipelines interleave at await points.
#[tokio::test]
async fn per_source_ordering_is_preserved() {
    let mut port = MemoryPort::default();
    port.live_sessions.insert("sess-a".into());
    let f = fabric_with(port, 100);
    f.registry.register_node(service("messaging", None, None));
    f.registry
        .register_node(service("assistants", Some("sess-a"), None));
    f.registry
        .create_contract(
            "messaging",
            "assistants",
            vec!["*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();

    let mut expected = Vec::new();
    let mut futures = Vec::new();
    for i in 0..16 {
        let event = sealed(
            "messaging",
            "run-order",
            "message.new",
            json!({"n": i}),
            Boundary::Intra,
            None,
        );
        expected.push(event.wrapper.id.clone());
        futures.push(f.router.route(event));
    }
    // join_all polls in creation order: the first pipeline takes the
    // per-source lock, the rest queue behind it fairly.
    let _ = join_all(futures).await;

    let finalized: Vec<String> = f
        .traces
        .for_run("run-order")
        .into_iter()
        .map(|t| t.event_id)
        .collect();
    assert_eq!(finalized, expected);
}

/// Property 7: the trace store never exceeds its capacity and evicts
/// oldest first.
#[tokio::test]
async fn trace_capacity_is_bounded() {
    let f = fabric_with(MemoryPort::default(), 5);
    f.registry.register_node(service("messaging", None, None));

    let mut ids = Vec::new();
    for i in 0..12 {
        let event = sealed(
            "messaging",
            "r",
            "message.new",
            json!({"n": i}),
            Boundary::Intra,
            None,
        );
        ids.push(event.wrapper.id.clone());
        f.router.route(event).await;
    }

    assert_eq!(f.traces.len(), 5);
    for old in &ids[..7] {
        assert!(f.traces.get(old).is_none());
    }
    for new in &ids[7..] {
        assert!(f.traces.get(new).is_some());
    }
}

/// Property 8: watchers see exactly the traces their filters select, in
/// finalization order.
#[tokio::test]
async fn watcher_stream_is_filtered_and_ordered() {
    let mut port = MemoryPort::default();
    port.live_sessions.insert("sess-a".into());
    let f = fabric_with(port, 100);
    f.registry.register_node(service("messaging", None, None));
    f.registry
        .register_node(service("assistants", Some("sess-a"), None));
    f.registry
        .create_contract(
            "messaging",
            "assistants",
            vec!["*".into()],
            vec![Boundary::Intra],
            None,
        )
        .unwrap();
    f.watches.add(
        WatchFilter {
            run_id: Some("r1".into()),
            ..WatchFilter::default()
        },
        "sdn-session",
    );

    let mut r1_ids = Vec::new();
    for (run, n) in [("r1", 1), ("r2", 2), ("r1", 3)] {
        let event = sealed(
            "messaging",
            run,
            "message.new",
            json!({"n": n}),
            Boundary::Intra,
            None,
        );
        if run == "r1" {
            r1_ids.push(event.wrapper.id.clone());
        }
        f.router.route(event).await;
    }

    let pushes = f.port.watcher_pushes.lock();
    let seen: Vec<String> = pushes.iter().map(|(_, t)| t.event_id.clone()).collect();
    assert_eq!(seen, r1_ids);
    assert!(pushes.iter().all(|(s, t)| s == "sdn-session" && t.run_id == "r1"));
}
