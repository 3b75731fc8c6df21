// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core data model shared by the fabric service and the relay client.
//!
//! Everything here is plain serde data with closed enums; nodes and
//! contracts reference each other by id string only (arena model, no
//! pointers), so cascading removal is a table walk rather than a graph
//! traversal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trust-domain classification of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Within a cooperating group of nodes.
    Intra,
    /// Across groups inside the platform.
    Inter,
    /// Crossing the external trust boundary.
    Extra,
}

impl Boundary {
    /// Stable lowercase name, as it appears on the wire and in policy
    /// condition values.
    pub fn as_str(self) -> &'static str {
        match self {
            Boundary::Intra => "intra",
            Boundary::Inter => "inter",
            Boundary::Extra => "extra",
        }
    }
}

/// Kind of a registered participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A backend tenant service (messaging store, gateway, ...).
    Service,
    /// An assistant persona; registration is bound to its agent identity.
    Assistant,
    /// An isolated execution sandbox.
    Sandbox,
    /// An external connector.
    Bridge,
    /// An end-user client.
    Client,
}

impl NodeType {
    /// Stable lowercase name matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Service => "service",
            NodeType::Assistant => "assistant",
            NodeType::Sandbox => "sandbox",
            NodeType::Bridge => "bridge",
            NodeType::Client => "client",
        }
    }
}

/// Transport kind of a registered bridge connector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BridgeType {
    /// Plain HTTP webhook.
    Webhook,
    /// Persistent WebSocket.
    Websocket,
    /// gRPC endpoint.
    Grpc,
    /// Anything else.
    Custom,
}

/// A registered participant in the fabric; the unit of addressing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable node id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Participant kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Advertised capability strings.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// HTTP endpoint for delivery when no session is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Live fabric session currently attached to this node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// First registration time (unix ms); preserved across re-registration.
    pub registered_at: u64,
    /// Last heartbeat time (unix ms); staleness is judged against this.
    pub last_heartbeat: u64,
    /// Entity currently bound to this node (bijective).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// When the entity binding was made (unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_bound_at: Option<u64>,
    /// Free-form registration metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Node {
    /// True when the node has at least one way to receive events.
    pub fn reachable(&self) -> bool {
        self.session_id.is_some() || self.endpoint.is_some()
    }
}

/// A unidirectional permission from `from` to `to` (or the wildcard `*`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Contract id.
    pub id: String,
    /// Source node id; must exist at creation time.
    pub from: String,
    /// Target node id, or `*` for every registered node except the source.
    pub to: String,
    /// Event-type patterns: exact, `*`, or `prefix.*`.
    pub allowed_event_types: Vec<String>,
    /// Boundaries under which this contract applies.
    pub boundaries: Vec<Boundary>,
    /// Creation time (unix ms).
    pub created_at: u64,
    /// Expiry (unix ms); expired contracts are evicted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Contract {
    /// Whether this contract authorizes `event_type` under `boundary`.
    pub fn permits(&self, event_type: &str, boundary: Boundary) -> bool {
        self.boundaries.contains(&boundary)
            && self
                .allowed_event_types
                .iter()
                .any(|p| event_type_matches(p, event_type))
    }
}

/// Event-type pattern match.
///
/// `*` matches anything; `prefix.*` matches types under the prefix
/// (`message.*` matches `message.new` but not `message`); anything else is
/// exact equality.
pub fn event_type_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type.len() > prefix.len() + 1
            && event_type.starts_with(prefix)
            && event_type.as_bytes()[prefix.len()] == b'.';
    }
    pattern == event_type
}

/// A registered external connector, discovered by event type for outbound
/// routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bridge {
    /// Bridge id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Transport kind.
    #[serde(rename = "type")]
    pub bridge_type: BridgeType,
    /// Where the bridge listens.
    pub endpoint: String,
    /// Event-type patterns the bridge accepts.
    pub event_types: Vec<String>,
    /// Inactive bridges are skipped during discovery.
    pub active: bool,
}

/// The application half of an event: a type string plus opaque data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    /// Dotted event type (e.g. `message.new`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload data; committed by the integrity hash.
    pub data: Value,
}

/// Routing metadata attached to every event.
///
/// `path` is the authoritative traversal record and is the one field the
/// integrity hash does not commit (it mutates during routing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventWrapper {
    /// Fresh unique event id.
    pub id: String,
    /// Caller-supplied correlation id.
    pub run_id: String,
    /// Submission time (unix ms).
    pub timestamp: u64,
    /// Authoring node id; always `path[0]`.
    pub source: String,
    /// Explicit target node id; restricts delivery when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Id of the event that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<String>,
    /// Ordered node ids the event has traversed, starting at the source.
    pub path: Vec<String>,
    /// Trust-domain classification.
    pub boundary: Boundary,
    /// Entity identity of the source, if bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity_id: Option<String>,
    /// Entity identity to resolve the target through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_id: Option<String>,
}

impl EventWrapper {
    /// New wrapper for an event authored by `source` under `run_id`, with a
    /// fresh id, the current timestamp, and `path = [source]`.
    pub fn new(source: impl Into<String>, run_id: impl Into<String>, boundary: Boundary) -> Self {
        let source = source.into();
        Self {
            id: crate::new_id(),
            run_id: run_id.into(),
            timestamp: crate::now_ms(),
            source: source.clone(),
            target: None,
            caused_by: None,
            path: vec![source],
            boundary,
            source_entity_id: None,
            target_entity_id: None,
        }
    }
}

/// The unit of transport: payload + wrapper + integrity hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Application payload.
    pub payload: EventPayload,
    /// Routing metadata.
    pub wrapper: EventWrapper,
    /// Keyed BLAKE3 over the committed fields, lowercase hex.
    pub hash: String,
}

/// Field a policy condition inspects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PolicyField {
    /// `wrapper.source`.
    Source,
    /// `wrapper.target`, or the empty string when absent.
    Target,
    /// `payload.type`.
    EventType,
    /// `wrapper.boundary` as its lowercase name.
    Boundary,
    /// `wrapper.runId`.
    RunId,
}

/// Comparison operator of a policy condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PolicyOperator {
    /// String equality.
    Eq,
    /// String inequality.
    Neq,
    /// Substring match.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Regular-expression match; an invalid pattern fails the condition.
    Regex,
}

/// A single AND-ed condition inside a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCondition {
    /// Field to extract from the event.
    pub field: PolicyField,
    /// How to compare.
    pub operator: PolicyOperator,
    /// Right-hand side of the comparison.
    pub value: String,
}

/// Severity for the `log` policy action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug-level note.
    Debug,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// What a matching policy does to an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PolicyAction {
    /// Let the event through.
    Allow,
    /// Drop the event.
    Deny {
        /// Reason recorded in the trace; defaults to "denied by policy".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Override target resolution with a single node.
    Route {
        /// Replacement target node id.
        to: String,
    },
    /// Annotate the trace and pass through (mapping semantics are an
    /// extension point).
    Transform {
        /// Opaque transformation mapping.
        mapping: Value,
    },
    /// Log the event and continue.
    Log {
        /// Severity to log at.
        level: LogLevel,
    },
}

/// A prioritized routing rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Higher evaluates first; ties resolve by creation order.
    pub priority: i64,
    /// All conditions must match (AND).
    pub conditions: Vec<PolicyCondition>,
    /// Action applied when the conditions match.
    pub action: PolicyAction,
    /// Disabled policies are skipped.
    pub enabled: bool,
    /// Creation time (unix ms).
    pub created_at: u64,
}

/// Outcome of one event's trip through the router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// At least one target received the event.
    Delivered,
    /// No target received it (policy deny, no targets, delivery failure).
    Dropped,
    /// Routing in progress.
    Pending,
    /// Integrity or internal failure before routing completed.
    Error,
}

/// What happened at one hop of the trace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HopAction {
    /// Passed along toward a target.
    Forward,
    /// Delivered to this node.
    Deliver,
    /// Dropped at this node.
    Drop,
    /// Transformed by policy at this node.
    Transform,
}

/// One hop in a trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceHop {
    /// Node the hop concerns.
    pub node: String,
    /// When the hop was recorded (unix ms).
    pub timestamp: u64,
    /// Time spent on this hop.
    pub duration_ms: u64,
    /// Policy involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// What happened.
    pub action: HopAction,
}

/// The canonical record of how one event was routed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Event this trace belongs to.
    pub event_id: String,
    /// Correlation id copied from the wrapper.
    pub run_id: String,
    /// Hops in the order the router attempted them.
    pub path: Vec<TraceHop>,
    /// Wall time of the whole pipeline.
    pub total_duration_ms: u64,
    /// Final outcome.
    pub status: TraceStatus,
    /// Reason for drop/error outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter of an SDN watch subscription; unset fields are wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchFilter {
    /// Match `wrapper.runId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Match `wrapper.source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Match `payload.type` exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl WatchFilter {
    /// True when every set field matches the event (AND; unset = wildcard).
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(run_id) = &self.run_id {
            if *run_id != event.wrapper.run_id {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if *source != event.wrapper.source {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if *event_type != event.payload.event_type {
                return false;
            }
        }
        true
    }
}

/// A live SDN trace subscription owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchSubscription {
    /// Subscription id.
    pub id: String,
    /// Trace filter.
    pub filters: WatchFilter,
    /// Owning session.
    pub session_id: String,
    /// Creation time (unix ms).
    pub created_at: u64,
}

/// Consistent point-in-time view of the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    /// All registered nodes.
    pub nodes: Vec<Node>,
    /// All live contracts.
    pub contracts: Vec<Contract>,
    /// All registered bridges.
    pub bridges: Vec<Bridge>,
    /// Snapshot time (unix ms).
    pub timestamp: u64,
}

/// Entitlement names checked against user principals.
pub mod entitlements {
    /// Required to create contracts.
    pub const CONTRACTS_WRITE: &str = "contracts.write";
    /// Required to watch SDN traces.
    pub const EVENTS_READ: &str = "events.read";
    /// Required to read topology snapshots.
    pub const TOPOLOGY_READ: &str = "topology.read";
    /// Required for policy mutation over HTTP.
    pub const POLICIES_WRITE: &str = "policies.write";
}

/// An authenticated agent (service-level trust).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPrincipal {
    /// Principal id.
    pub id: String,
    /// Agent identity; assistant nodes must register under this id.
    pub agent_id: String,
    /// Display name.
    pub name: String,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Capabilities granted to the agent; unioned into node registration.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// An authenticated human user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserPrincipal {
    /// Principal id.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Entitlement names (see [`entitlements`]).
    #[serde(default)]
    pub entitlements: Vec<String>,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Organization memberships.
    #[serde(default)]
    pub orgs: Vec<String>,
    /// Super-admins bypass entitlement checks.
    #[serde(default)]
    pub is_super_admin: bool,
}

/// The identity behind a session or HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    /// Service-level trust; bypasses entitlement checks.
    Agent(AgentPrincipal),
    /// A human user subject to entitlement checks.
    User(UserPrincipal),
    /// No valid token presented; permitted only on non-SDN traffic.
    Anonymous,
}

impl Principal {
    /// True for agents and users; false for anonymous.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Principal::Anonymous)
    }

    /// True when the principal carries service-level trust (agents, and
    /// super-admin users).
    pub fn is_privileged(&self) -> bool {
        match self {
            Principal::Agent(_) => true,
            Principal::User(u) => u.is_super_admin,
            Principal::Anonymous => false,
        }
    }

    /// Entitlement check: agents bypass, super-admins bypass, users need
    /// the named entitlement, anonymous never passes.
    pub fn has_entitlement(&self, name: &str) -> bool {
        match self {
            Principal::Agent(_) => true,
            Principal::User(u) => u.is_super_admin || u.entitlements.iter().any(|e| e == name),
            Principal::Anonymous => false,
        }
    }
}
