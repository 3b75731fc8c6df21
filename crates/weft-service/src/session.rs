// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent WebSocket sessions: one reader task per connection, a
//! bounded outbox drained by a writer task, and the verb dispatch that
//! enforces the permission matrix.
//!
//! The outbox drops oldest on overflow (counted as a delivery failure)
//! rather than blocking the router on a slow consumer.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};
use weft_core::registry::RegisterNode;
use weft_core::telemetry::Telemetry;
use weft_proto::wire::{
    decode_client, encode_server, AckBody, ClientMessage, ContractAck, ContractCreateBody,
    EventAck, HelloAck, HelloBody, NodeRegisterBody, RegisterAck, ServerFrame, ServerMessage,
    TopologyAck, WatchAck,
};
use weft_proto::{entitlements, new_id, Event, NodeType, Principal, WatchFilter};

/// Outbound frames queued per session.
const OUTBOX_CAPACITY: usize = 256;

/// Bounded, drop-oldest outbound queue for one session.
pub struct Outbox {
    queue: Mutex<VecDeque<ServerFrame>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
    telemetry: Arc<Telemetry>,
}

impl Outbox {
    fn new(capacity: usize, telemetry: Arc<Telemetry>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
            telemetry,
        }
    }

    /// Enqueue a frame; overflow evicts the oldest queued frame and counts
    /// a delivery failure. False once the session closed.
    pub fn push(&self, frame: ServerFrame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.telemetry.delivery_failure();
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Next frame, waiting if the queue is empty; `None` after close once
    /// the queue drains.
    pub async fn next(&self) -> Option<ServerFrame> {
        loop {
            if let Some(frame) = self.queue.lock().pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the outbox; queued frames still drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// Live session registry: session id → outbox.
pub struct Sessions {
    telemetry: Arc<Telemetry>,
    inner: RwLock<HashMap<String, Arc<Outbox>>>,
}

impl Sessions {
    /// Empty registry.
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and hand back its outbox.
    pub fn register(&self, session_id: &str) -> Arc<Outbox> {
        let outbox = Arc::new(Outbox::new(OUTBOX_CAPACITY, Arc::clone(&self.telemetry)));
        self.inner
            .write()
            .insert(session_id.to_string(), Arc::clone(&outbox));
        outbox
    }

    /// Drop a session.
    pub fn remove(&self, session_id: &str) {
        if let Some(outbox) = self.inner.write().remove(session_id) {
            outbox.close();
        }
    }

    /// Enqueue a frame to one session; false when it is gone or closed.
    pub fn push_to(&self, session_id: &str, frame: ServerFrame) -> bool {
        let outbox = self.inner.read().get(session_id).cloned();
        match outbox {
            Some(outbox) => outbox.push(frame),
            None => false,
        }
    }

    /// Fan a push out to every live session.
    pub fn broadcast(&self, msg: ServerMessage) {
        let outboxes: Vec<Arc<Outbox>> = self.inner.read().values().cloned().collect();
        for outbox in outboxes {
            let _ = outbox.push(ServerFrame::push(msg.clone()));
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no session is connected.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Per-session mutable state owned by the reader task.
pub struct SessionCtx {
    /// Server-assigned session id.
    pub id: String,
    /// Principal established by `hello` (anonymous until then).
    pub principal: Principal,
    /// Node attached by `node:register`.
    pub node_id: Option<String>,
    state: Arc<AppState>,
}

impl SessionCtx {
    /// Fresh anonymous session context.
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            id: new_id(),
            principal: Principal::Anonymous,
            node_id: None,
            state,
        }
    }

    /// Handle one inbound request and produce its ack.
    pub async fn dispatch(&mut self, msg: ClientMessage) -> AckBody {
        match msg {
            ClientMessage::Hello(body) => self.hello(body).await,
            ClientMessage::NodeRegister(body) => self.node_register(body),
            ClientMessage::NodeHeartbeat { node_id } => self.node_heartbeat(&node_id),
            ClientMessage::NodeUnregister { node_id } => self.node_unregister(&node_id),
            ClientMessage::EventSend { event } => self.event_send(event).await,
            ClientMessage::ContractCreate(body) => self.contract_create(body),
            ClientMessage::SdnWatch { filters } => self.sdn_watch(filters),
            ClientMessage::SdnUnwatch { subscription_id } => self.sdn_unwatch(&subscription_id),
            ClientMessage::SdnTopology => self.sdn_topology(),
        }
    }

    async fn hello(&mut self, body: HelloBody) -> AckBody {
        self.principal = match &body.token {
            Some(token) => self.state.introspector.introspect(token).await,
            None => Principal::Anonymous,
        };
        AckBody::ok(&HelloAck {
            session_id: self.id.clone(),
            principal: self.principal.clone(),
        })
    }

    fn node_register(&mut self, body: NodeRegisterBody) -> AckBody {
        let mut capabilities = body.capabilities;
        if body.node_type == NodeType::Assistant {
            let Principal::Agent(agent) = &self.principal else {
                return AckBody::err("assistant registration requires an agent principal");
            };
            if agent.agent_id != body.id {
                return AckBody::err("assistant node id must equal the agent id");
            }
            for capability in &agent.capabilities {
                if !capabilities.contains(capability) {
                    capabilities.push(capability.clone());
                }
            }
        }
        let (node, first) = self.state.registry.register_node(RegisterNode {
            id: body.id,
            name: body.name,
            node_type: body.node_type,
            capabilities,
            endpoint: body.endpoint,
            session_id: Some(self.id.clone()),
            entity_id: body.entity_id,
            metadata: body.metadata,
        });
        self.node_id = Some(node.id.clone());
        if first {
            self.state
                .sessions
                .broadcast(ServerMessage::NodeJoined { node: node.clone() });
        }
        AckBody::ok(&RegisterAck { node })
    }

    fn owns(&self, node_id: &str) -> bool {
        self.node_id.as_deref() == Some(node_id)
    }

    fn node_heartbeat(&self, node_id: &str) -> AckBody {
        if !self.owns(node_id) && !self.principal.is_privileged() {
            return AckBody::err("heartbeat requires the session's own node");
        }
        if self.state.registry.heartbeat(node_id) {
            AckBody::ok_empty()
        } else {
            AckBody::err(format!("unknown node: {node_id}"))
        }
    }

    fn node_unregister(&mut self, node_id: &str) -> AckBody {
        if !self.principal.is_authenticated() {
            return AckBody::err("authentication required");
        }
        if !self.owns(node_id) && !self.principal.is_privileged() {
            return AckBody::err("unregister requires the session's own node");
        }
        match self.state.registry.unregister_node(node_id) {
            Ok(node) => {
                if self.owns(&node.id) {
                    self.node_id = None;
                }
                self.state
                    .sessions
                    .broadcast(ServerMessage::NodeLeft { node_id: node.id });
                AckBody::ok_empty()
            }
            Err(err) => AckBody::err(err.to_string()),
        }
    }

    async fn event_send(&self, event: Event) -> AckBody {
        if !self.principal.is_authenticated() {
            return AckBody::err("authentication required");
        }
        if event.wrapper.path.first() != Some(&event.wrapper.source) {
            return AckBody::err("wrapper.path must start at the source");
        }
        if !self.owns(&event.wrapper.source) && !self.principal.is_privileged() {
            return AckBody::err("event source must be the session's node");
        }
        let event_id = event.wrapper.id.clone();
        let trace = self.state.router.route(event).await;
        AckBody::ok(&EventAck { event_id, trace })
    }

    fn contract_create(&self, body: ContractCreateBody) -> AckBody {
        match &self.principal {
            Principal::Anonymous => return AckBody::err("authentication required"),
            Principal::User(_) if !self.principal.has_entitlement(entitlements::CONTRACTS_WRITE) => {
                return AckBody::err(format!(
                    "missing entitlement: {}",
                    entitlements::CONTRACTS_WRITE
                ));
            }
            _ => {}
        }
        match self.state.registry.create_contract(
            &body.from,
            &body.to,
            body.allowed_event_types,
            body.boundaries,
            body.expires_at,
        ) {
            Ok(contract) => AckBody::ok(&ContractAck { contract }),
            Err(err) => AckBody::err(err.to_string()),
        }
    }

    fn sdn_watch(&self, filters: WatchFilter) -> AckBody {
        match &self.principal {
            Principal::Anonymous => return AckBody::err("authentication required"),
            Principal::User(_) if !self.principal.has_entitlement(entitlements::EVENTS_READ) => {
                return AckBody::err(format!(
                    "missing entitlement: {}",
                    entitlements::EVENTS_READ
                ));
            }
            _ => {}
        }
        let subscription = self.state.watches.add(filters, &self.id);
        AckBody::ok(&WatchAck { subscription })
    }

    fn sdn_unwatch(&self, subscription_id: &str) -> AckBody {
        if self.state.watches.remove(subscription_id, &self.id) {
            AckBody::ok_empty()
        } else {
            AckBody::err(format!("unknown subscription: {subscription_id}"))
        }
    }

    fn sdn_topology(&self) -> AckBody {
        match &self.principal {
            Principal::Anonymous => return AckBody::err("authentication required"),
            Principal::User(_) if !self.principal.has_entitlement(entitlements::TOPOLOGY_READ) => {
                return AckBody::err(format!(
                    "missing entitlement: {}",
                    entitlements::TOPOLOGY_READ
                ));
            }
            _ => {}
        }
        AckBody::ok(&TopologyAck {
            topology: self.state.registry.topology(),
        })
    }

    /// Session teardown: detach the node (it survives for reconnection;
    /// staleness reaps abandoned ones), clear its entity binding, drop
    /// owned watches, tell everyone.
    pub fn on_close(&mut self) {
        if let Some(node_id) = self.node_id.take() {
            let _ = self.state.registry.update_session(&node_id, None);
            let _ = self.state.registry.unbind_entity(&node_id);
            self.state
                .sessions
                .broadcast(ServerMessage::NodeDisconnected { node_id });
        }
        let dropped = self.state.watches.remove_session(&self.id);
        if dropped > 0 {
            debug!(session = %self.id, dropped, "watch subscriptions dropped");
        }
    }
}

/// Drive one WebSocket connection to completion.
pub async fn run_session(socket: WebSocket, state: Arc<AppState>) {
    use futures_util::{SinkExt, StreamExt};

    let mut ctx = SessionCtx::new(state.clone());
    let session_id = ctx.id.clone();
    let outbox = state.sessions.register(&session_id);
    debug!(session = %session_id, "session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the outbox into the socket.
    let writer_outbox = Arc::clone(&outbox);
    let writer = tokio::spawn(async move {
        while let Some(frame) = writer_outbox.next().await {
            let Ok(text) = encode_server(&frame) else {
                continue;
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match decode_client(text.as_str()) {
                Ok(frame) => {
                    let ack = ctx.dispatch(frame.msg).await;
                    let _ = outbox.push(ServerFrame::ack(frame.seq, ack));
                }
                Err(err) => {
                    let _ = outbox.push(ServerFrame::ack(
                        0,
                        AckBody::err(format!("malformed frame: {err}")),
                    ));
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(session = %session_id, "ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(session = %session_id, %err, "socket error");
                break;
            }
        }
    }

    ctx.on_close();
    state.sessions.remove(&session_id);
    outbox.close();
    let _ = writer.await;
    debug!(session = %session_id, "session closed");
}
