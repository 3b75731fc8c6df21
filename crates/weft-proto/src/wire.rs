// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session wire frames.
//!
//! Persistent sessions exchange JSON text frames. Client frames carry a
//! `seq` the server echoes in its `ack`; server pushes (`event:received`,
//! `sdn:event`, topology fan-out) have no `seq`. Unknown ops are answered
//! with a failed ack; the session stays open.

use crate::{
    Boundary, Contract, Event, Node, NodeType, Principal, Trace, TopologySnapshot, WatchFilter,
    WatchSubscription,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire codec failure.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Frame was not valid JSON for the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A client → service request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    /// Request sequence number, echoed by the ack.
    pub seq: u64,
    /// The request itself.
    #[serde(flatten)]
    pub msg: ClientMessage,
}

/// Handshake body: authenticate the session (token optional; sessions
/// stay anonymous without one).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelloBody {
    /// Bearer token introspected against the identity service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Client implementation version.
    #[serde(default)]
    pub client_version: u32,
}

/// `node:register` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegisterBody {
    /// Declared node id; assistants must declare their agent id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Participant kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Capabilities; unioned with the principal's for assistants.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// HTTP delivery endpoint for when the session is detached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Entity identity to bind to this node (bijective; rebinding moves
    /// it). Cleared when the session closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `contract:create` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContractCreateBody {
    /// Source node id (must exist).
    pub from: String,
    /// Target node id or `*`.
    pub to: String,
    /// Event-type patterns.
    pub allowed_event_types: Vec<String>,
    /// Boundaries the contract covers.
    pub boundaries: Vec<Boundary>,
    /// Optional expiry (unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// Requests a client may issue over a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "body")]
pub enum ClientMessage {
    /// Authentication handshake.
    #[serde(rename = "hello")]
    Hello(HelloBody),
    /// Register or update the node tied to this session.
    #[serde(rename = "node:register")]
    NodeRegister(NodeRegisterBody),
    /// Refresh a node's heartbeat.
    #[serde(rename = "node:heartbeat")]
    NodeHeartbeat {
        /// Node to refresh; must be owned by the session.
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// Remove the node; the session stays open.
    #[serde(rename = "node:unregister")]
    NodeUnregister {
        /// Node to remove.
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// Submit an event for routing.
    #[serde(rename = "event:send")]
    EventSend {
        /// The sealed event.
        event: Event,
    },
    /// Create a contract.
    #[serde(rename = "contract:create")]
    ContractCreate(ContractCreateBody),
    /// Create an SDN watch subscription.
    #[serde(rename = "sdn:watch")]
    SdnWatch {
        /// Trace filter; unset fields are wildcards.
        #[serde(default)]
        filters: WatchFilter,
    },
    /// Remove a watch subscription owned by this session.
    #[serde(rename = "sdn:unwatch")]
    SdnUnwatch {
        /// Subscription to remove.
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
    },
    /// Ask for a registry snapshot.
    #[serde(rename = "sdn:topology")]
    SdnTopology,
}

impl ClientMessage {
    /// Canonical op string for this request.
    pub fn op_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "hello",
            ClientMessage::NodeRegister(_) => "node:register",
            ClientMessage::NodeHeartbeat { .. } => "node:heartbeat",
            ClientMessage::NodeUnregister { .. } => "node:unregister",
            ClientMessage::EventSend { .. } => "event:send",
            ClientMessage::ContractCreate(_) => "contract:create",
            ClientMessage::SdnWatch { .. } => "sdn:watch",
            ClientMessage::SdnUnwatch { .. } => "sdn:unwatch",
            ClientMessage::SdnTopology => "sdn:topology",
        }
    }
}

/// Response envelope echoed for every client frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckBody {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Failure reason when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Verb-specific payload when `ok` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AckBody {
    /// Successful ack with a typed payload.
    pub fn ok<T: Serialize>(data: &T) -> Self {
        Self {
            ok: true,
            error: None,
            data: serde_json::to_value(data).ok(),
        }
    }

    /// Successful ack with no payload.
    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            error: None,
            data: None,
        }
    }

    /// Failed ack.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            data: None,
        }
    }
}

/// A service → client frame: the ack for a request (with its `seq`) or an
/// unsolicited push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerFrame {
    /// Sequence of the request this answers; absent on pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// The message.
    #[serde(flatten)]
    pub msg: ServerMessage,
}

impl ServerFrame {
    /// Ack for request `seq`.
    pub fn ack(seq: u64, body: AckBody) -> Self {
        Self {
            seq: Some(seq),
            msg: ServerMessage::Ack(body),
        }
    }

    /// Unsolicited push.
    pub fn push(msg: ServerMessage) -> Self {
        Self { seq: None, msg }
    }
}

/// Messages the service sends to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "body")]
pub enum ServerMessage {
    /// Response to a client frame.
    #[serde(rename = "ack")]
    Ack(AckBody),
    /// An event was delivered to this session's node.
    #[serde(rename = "event:received")]
    EventReceived {
        /// The delivered event.
        event: Event,
    },
    /// A finalized trace matched one of this session's watch filters.
    #[serde(rename = "sdn:event")]
    SdnEvent {
        /// The routed event.
        event: Event,
        /// Its finalized trace.
        trace: Trace,
    },
    /// A node registered.
    #[serde(rename = "network:node:joined")]
    NodeJoined {
        /// The new node.
        node: Node,
    },
    /// A node was unregistered or reaped.
    #[serde(rename = "network:node:left")]
    NodeLeft {
        /// Id of the departed node.
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A node's session detached (the node itself remains).
    #[serde(rename = "network:node:disconnected")]
    NodeDisconnected {
        /// Id of the detached node.
        #[serde(rename = "nodeId")]
        node_id: String,
    },
}

impl ServerMessage {
    /// Canonical op string for this message.
    pub fn op_name(&self) -> &'static str {
        match self {
            ServerMessage::Ack(_) => "ack",
            ServerMessage::EventReceived { .. } => "event:received",
            ServerMessage::SdnEvent { .. } => "sdn:event",
            ServerMessage::NodeJoined { .. } => "network:node:joined",
            ServerMessage::NodeLeft { .. } => "network:node:left",
            ServerMessage::NodeDisconnected { .. } => "network:node:disconnected",
        }
    }
}

/// `hello` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    /// Server-assigned session id.
    pub session_id: String,
    /// Principal resolved from the token (anonymous when absent/invalid).
    pub principal: Principal,
}

/// `node:register` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterAck {
    /// The registered node as the registry now sees it.
    pub node: Node,
}

/// `event:send` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventAck {
    /// Id of the routed event.
    pub event_id: String,
    /// The finalized trace; callers inspect `status`/`error`.
    pub trace: Trace,
}

/// `contract:create` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractAck {
    /// The created (or deduplicated pre-existing) contract.
    pub contract: Contract,
}

/// `sdn:watch` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchAck {
    /// The live subscription.
    pub subscription: WatchSubscription,
}

/// `sdn:topology` ack payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyAck {
    /// Consistent registry snapshot.
    pub topology: TopologySnapshot,
}

/// Encode a client frame as a JSON text frame.
pub fn encode_client(frame: &ClientFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a client frame from a JSON text frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a server frame as a JSON text frame.
pub fn encode_server(frame: &ServerFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a server frame from a JSON text frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}
