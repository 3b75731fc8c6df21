// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request/response surface for non-persistent clients, mirroring the
//! session verbs' authorization model.
//!
//! Routing outcomes are never HTTP errors: submission returns 202 with the
//! trace, and callers read `trace.status`/`trace.error`. 4xx is reserved
//! for validation and auth failures visible before routing.

use crate::session::run_session;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use weft_core::history::TraceStats;
use weft_core::policy::{Evaluation, NewPolicy, PolicyUpdate};
use weft_core::registry::RegisterNode;
use weft_core::router::SimulationReport;
use weft_core::telemetry::TelemetrySnapshot;
use weft_core::FabricError;
use weft_proto::wire::{ContractCreateBody, NodeRegisterBody};
use weft_proto::{
    entitlements, Boundary, Bridge, BridgeType, Contract, Event, EventPayload, EventWrapper, Node,
    NodeType, Principal, Trace,
};

/// Error shape for the HTTP surface: status + message body.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication required")
    }

    fn forbidden(required: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            format!("missing entitlement: {required}"),
        )
    }

    fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, what)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<FabricError> for ApiError {
    fn from(err: FabricError) -> Self {
        match &err {
            FabricError::UnknownNode(_)
            | FabricError::UnknownContract(_)
            | FabricError::UnknownBridge(_)
            | FabricError::UnknownPolicy(_)
            | FabricError::SourceNotFound(_) => Self::not_found(err.to_string()),
            FabricError::Invalid(_) => Self::bad_request(err.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

async fn principal_of(state: &AppState, headers: &HeaderMap) -> Principal {
    state.introspector.principal_from_headers(headers).await
}

fn require_authenticated(principal: &Principal) -> ApiResult<()> {
    if principal.is_authenticated() {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}

/// Entitlement gate: anonymous is 401, a user lacking the entitlement is
/// 403, agents and super-admins pass.
fn require_entitlement(principal: &Principal, name: &str) -> ApiResult<()> {
    match principal {
        Principal::Anonymous => Err(ApiError::unauthorized()),
        _ if principal.has_entitlement(name) => Ok(()),
        _ => Err(ApiError::forbidden(name)),
    }
}

fn parse_node_type(value: &str) -> Option<NodeType> {
    match value {
        "service" => Some(NodeType::Service),
        "assistant" => Some(NodeType::Assistant),
        "sandbox" => Some(NodeType::Sandbox),
        "bridge" => Some(NodeType::Bridge),
        "client" => Some(NodeType::Client),
        _ => None,
    }
}

/// Build the daemon's full route table.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        // Registry
        .route("/api/registry/nodes", post(create_node).get(list_nodes))
        .route("/api/registry/nodes/capability/{cap}", get(nodes_by_capability))
        .route("/api/registry/nodes/type/{node_type}", get(nodes_by_type))
        .route("/api/registry/nodes/{id}", get(get_node).delete(delete_node))
        .route("/api/registry/nodes/{id}/heartbeat", post(heartbeat_node))
        .route(
            "/api/registry/contracts",
            post(create_contract).get(list_contracts),
        )
        .route("/api/registry/contracts/{id}", delete(delete_contract))
        .route(
            "/api/registry/bridges",
            post(create_bridge).get(list_bridges),
        )
        .route(
            "/api/registry/bridges/{id}",
            patch(patch_bridge).delete(delete_bridge),
        )
        // Events
        .route("/api/events", post(submit_event).get(list_events))
        .route("/api/events/stats", get(event_stats))
        .route("/api/events/hash", post(hash_event))
        .route("/api/events/traces/{run_id}", get(traces_for_run))
        .route("/api/events/{id}/trace", get(trace_for_event))
        // Policies
        .route("/api/policies", post(create_policy).get(list_policies))
        .route("/api/policies/test", post(test_policy))
        .route(
            "/api/policies/{id}",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
        // SDN
        .route("/api/sdn/topology", get(sdn_topology))
        .route("/api/sdn/summary", get(sdn_summary))
        .route("/api/sdn/trace/{event_id}", get(sdn_trace))
        .route("/api/sdn/traces/{run_id}", get(sdn_traces))
        .route("/api/sdn/flow/{run_id}", get(sdn_flow))
        .route("/api/sdn/simulate", post(sdn_simulate))
        .route("/api/sdn/graph", get(sdn_graph))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    started_at_unix_ms: u64,
    uptime_ms: u64,
    active_sessions: usize,
    watch_subscriptions: usize,
    telemetry: TelemetrySnapshot,
    traces: TraceStats,
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_ms: u64 = state
        .start_instant
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store, max-age=0"),
    );
    (
        headers,
        Json(MetricsResponse {
            started_at_unix_ms: state.started_at_unix_ms,
            uptime_ms,
            active_sessions: state.sessions.len(),
            watch_subscriptions: state.watches.list().len(),
            telemetry: state.telemetry.snapshot(),
            traces: state.traces.stats(),
        }),
    )
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config.cors_origins.is_empty() {
        return true;
    }
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| state.config.cors_origins.iter().any(|o| o == origin))
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state, &headers) {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<missing>");
        warn!(origin = %origin, "origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| run_session(socket, state))
}

// ── Registry ───────────────────────────────────────────────────────

async fn create_node(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NodeRegisterBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    let mut capabilities = body.capabilities;
    if body.node_type == NodeType::Assistant {
        let Principal::Agent(agent) = &principal else {
            return Err(ApiError::unauthorized());
        };
        if agent.agent_id != body.id {
            return Err(ApiError::forbidden("assistant node id must equal the agent id"));
        }
        for capability in &agent.capabilities {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }
    }
    // Registration over HTTP must not clobber a live session attachment.
    let session_id = state.registry.get_node(&body.id).and_then(|n| n.session_id);
    let (node, first) = state.registry.register_node(RegisterNode {
        id: body.id,
        name: body.name,
        node_type: body.node_type,
        capabilities,
        endpoint: body.endpoint,
        session_id,
        entity_id: body.entity_id,
        metadata: body.metadata,
    });
    if first {
        state
            .sessions
            .broadcast(weft_proto::wire::ServerMessage::NodeJoined { node: node.clone() });
    }
    Ok((StatusCode::CREATED, Json(node)))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<Node>> {
    Json(state.registry.list_nodes())
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Node>> {
    state
        .registry
        .get_node(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown node: {id}")))
}

async fn delete_node(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    let node = state.registry.unregister_node(&id)?;
    state
        .sessions
        .broadcast(weft_proto::wire::ServerMessage::NodeLeft { node_id: node.id });
    Ok(Json(json!({ "ok": true })))
}

async fn heartbeat_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.registry.heartbeat(&id) {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::not_found(format!("unknown node: {id}")))
    }
}

async fn nodes_by_capability(
    State(state): State<Arc<AppState>>,
    Path(cap): Path<String>,
) -> Json<Vec<Node>> {
    Json(state.registry.nodes_by_capability(&cap))
}

async fn nodes_by_type(
    State(state): State<Arc<AppState>>,
    Path(node_type): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    let node_type = parse_node_type(&node_type)
        .ok_or_else(|| ApiError::bad_request(format!("unknown node type: {node_type}")))?;
    Ok(Json(state.registry.nodes_by_type(node_type)))
}

#[derive(Deserialize)]
struct ContractsQuery {
    #[serde(rename = "nodeId")]
    node_id: Option<String>,
}

async fn create_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ContractCreateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::CONTRACTS_WRITE)?;
    let contract = state.registry.create_contract(
        &body.from,
        &body.to,
        body.allowed_event_types,
        body.boundaries,
        body.expires_at,
    )?;
    Ok((StatusCode::CREATED, Json(contract)))
}

async fn list_contracts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContractsQuery>,
) -> Json<Vec<Contract>> {
    match query.node_id {
        Some(node_id) => Json(state.registry.list_contracts_for(&node_id)),
        None => Json(state.registry.list_contracts()),
    }
}

async fn delete_contract(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::CONTRACTS_WRITE)?;
    state.registry.delete_contract(&id)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeCreateBody {
    name: String,
    #[serde(rename = "type")]
    bridge_type: BridgeType,
    endpoint: String,
    #[serde(default)]
    event_types: Vec<String>,
}

async fn create_bridge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<BridgeCreateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    let bridge = state.registry.register_bridge(
        body.name,
        body.bridge_type,
        body.endpoint,
        body.event_types,
    );
    Ok((StatusCode::CREATED, Json(bridge)))
}

async fn list_bridges(State(state): State<Arc<AppState>>) -> Json<Vec<Bridge>> {
    Json(state.registry.list_bridges())
}

#[derive(Deserialize)]
struct BridgePatch {
    active: bool,
}

async fn patch_bridge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<BridgePatch>, JsonRejection>,
) -> ApiResult<Json<Bridge>> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    Ok(Json(state.registry.set_bridge_active(&id, body.active)?))
}

async fn delete_bridge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    state.registry.delete_bridge(&id)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Events ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    event_id: String,
    trace: Trace,
}

async fn submit_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Event>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let event = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    if event.wrapper.path.first() != Some(&event.wrapper.source) {
        return Err(ApiError::bad_request("wrapper.path must start at the source"));
    }
    let event_id = event.wrapper.id.clone();
    let trace = state.router.route(event).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse { event_id, trace }),
    ))
}

#[derive(Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
    #[serde(rename = "runId")]
    run_id: Option<String>,
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    let limit = query.limit.unwrap_or(100);
    match query.run_id {
        Some(run_id) => Ok(Json(state.history.for_run(&run_id, limit))),
        None => Ok(Json(state.history.recent(limit))),
    }
}

async fn trace_for_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Trace>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    state
        .traces
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no trace for event: {id}")))
}

async fn traces_for_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Vec<Trace>>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    Ok(Json(state.traces.for_run(&run_id)))
}

#[derive(Deserialize)]
struct HashRequest {
    payload: EventPayload,
    wrapper: EventWrapper,
}

async fn hash_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<HashRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    let hash = weft_proto::integrity::event_hash(&body.payload, &body.wrapper, &state.secret);
    Ok(Json(json!({ "hash": hash })))
}

async fn event_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<TraceStats>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    Ok(Json(state.traces.stats()))
}

// ── Policies ───────────────────────────────────────────────────────

fn require_policy_write(principal: &Principal) -> ApiResult<()> {
    require_entitlement(principal, entitlements::POLICIES_WRITE)
}

async fn create_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NewPolicy>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_policy_write(&principal)?;
    Ok((StatusCode::CREATED, Json(state.policies.create(body))))
}

async fn list_policies(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<weft_proto::Policy>>> {
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    Ok(Json(state.policies.list()))
}

async fn get_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<weft_proto::Policy>> {
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    state
        .policies
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown policy: {id}")))
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<PolicyUpdate>, JsonRejection>,
) -> ApiResult<Json<weft_proto::Policy>> {
    let body = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_policy_write(&principal)?;
    Ok(Json(state.policies.update(&id, body)?))
}

async fn delete_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = principal_of(&state, &headers).await;
    require_policy_write(&principal)?;
    state.policies.delete(&id)?;
    Ok(Json(json!({ "ok": true })))
}

async fn test_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Event>, JsonRejection>,
) -> ApiResult<Json<Evaluation>> {
    let event = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_authenticated(&principal)?;
    Ok(Json(state.policies.evaluate(&event)))
}

// ── SDN ────────────────────────────────────────────────────────────

async fn sdn_topology(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<weft_proto::TopologySnapshot>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::TOPOLOGY_READ)?;
    Ok(Json(state.registry.topology()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SdnSummary {
    nodes: usize,
    contracts: usize,
    bridges: usize,
    sessions: usize,
    watches: usize,
    traces: TraceStats,
}

async fn sdn_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SdnSummary>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::TOPOLOGY_READ)?;
    let topology = state.registry.topology();
    Ok(Json(SdnSummary {
        nodes: topology.nodes.len(),
        contracts: topology.contracts.len(),
        bridges: topology.bridges.len(),
        sessions: state.sessions.len(),
        watches: state.watches.list().len(),
        traces: state.traces.stats(),
    }))
}

async fn sdn_trace(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> ApiResult<Json<Trace>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    state
        .traces
        .get(&event_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no trace for event: {event_id}")))
}

async fn sdn_traces(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Vec<Trace>>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    Ok(Json(state.traces.for_run(&run_id)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunFlow {
    run_id: String,
    events: Vec<Event>,
    traces: Vec<Trace>,
}

async fn sdn_flow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunFlow>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    Ok(Json(RunFlow {
        events: state.history.for_run(&run_id, usize::MAX),
        traces: state.traces.for_run(&run_id),
        run_id,
    }))
}

async fn sdn_simulate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Event>, JsonRejection>,
) -> ApiResult<Json<SimulationReport>> {
    let event = parse_json(payload)?;
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::EVENTS_READ)?;
    Ok(Json(state.router.simulate(&event)))
}

#[derive(Serialize)]
struct GraphNode {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphEdge {
    from: String,
    to: String,
    contract_id: String,
    allowed_event_types: Vec<String>,
    boundaries: Vec<Boundary>,
}

#[derive(Serialize)]
struct SdnGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

async fn sdn_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<SdnGraph>> {
    let principal = principal_of(&state, &headers).await;
    require_entitlement(&principal, entitlements::TOPOLOGY_READ)?;
    let topology = state.registry.topology();
    let mut nodes: Vec<GraphNode> = topology
        .nodes
        .iter()
        .map(|n| GraphNode {
            id: n.id.clone(),
            node_type: n.node_type,
            name: n.name.clone(),
        })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let edges = topology
        .contracts
        .iter()
        .map(|c| GraphEdge {
            from: c.from.clone(),
            to: c.to.clone(),
            contract_id: c.id.clone(),
            allowed_event_types: c.allowed_event_types.clone(),
            boundaries: c.boundaries.clone(),
        })
        .collect();
    Ok(Json(SdnGraph { nodes, edges }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_parsing_covers_the_closed_set() {
        assert_eq!(parse_node_type("service"), Some(NodeType::Service));
        assert_eq!(parse_node_type("assistant"), Some(NodeType::Assistant));
        assert_eq!(parse_node_type("sandbox"), Some(NodeType::Sandbox));
        assert_eq!(parse_node_type("bridge"), Some(NodeType::Bridge));
        assert_eq!(parse_node_type("client"), Some(NodeType::Client));
        assert_eq!(parse_node_type("robot"), None);
    }

    #[test]
    fn entitlement_gate_distinguishes_401_and_403() {
        let anon = Principal::Anonymous;
        let err = require_entitlement(&anon, entitlements::EVENTS_READ).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let user = Principal::User(weft_proto::UserPrincipal {
            id: "u".into(),
            email: "u@example.com".into(),
            name: "u".into(),
            entitlements: vec![],
            roles: vec![],
            orgs: vec![],
            is_super_admin: false,
        });
        let err = require_entitlement(&user, entitlements::EVENTS_READ).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let admin = Principal::User(weft_proto::UserPrincipal {
            id: "a".into(),
            email: "a@example.com".into(),
            name: "a".into(),
            entitlements: vec![],
            roles: vec![],
            orgs: vec![],
            is_super_admin: true,
        });
        assert!(require_entitlement(&admin, entitlements::EVENTS_READ).is_ok());
    }
}
