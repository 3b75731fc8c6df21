// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Relay: the participant-side client of the weft event fabric.
//!
//! A relay opens a persistent session, authenticates, registers its node,
//! heartbeats in the background, and then speaks events: [`Relay::send`]
//! to emit, [`Relay::on`] to subscribe process-local handlers (with a `*`
//! wildcard), [`Relay::watch`] for the SDN trace stream, and the
//! turn-taking helpers built on ordinary `assistant.*` events. The
//! connection driver reconnects with bounded exponential backoff and
//! resumes registration and watches.

pub mod claims;
mod dispatch;
mod driver;

pub use claims::{ClaimBook, ClaimOutcome, ClaimRecord};
pub use dispatch::{EventHandler, HandlerToken, WILDCARD};

use claims::{parse_claim, CLAIM_EVENT, DEFER_EVENT, OBSERVE_EVENT, RESPOND_EVENT};
use dispatch::Handlers;
use driver::Command;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use weft_proto::wire::{
    AckBody, ClientMessage, ContractAck, ContractCreateBody, EventAck, TopologyAck, WatchAck,
};
use weft_proto::{
    integrity, new_id, now_ms, Boundary, Contract, Event, EventPayload, EventWrapper, Node,
    NodeType, TopologySnapshot, Trace, WatchFilter,
};

/// Client failure modes.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// No live session (and reconnection has not restored one).
    #[error("not connected")]
    Disconnected,
    /// The server did not ack in time.
    #[error("request timed out")]
    Timeout,
    /// The server refused the request.
    #[error("server error: {0}")]
    Server(String),
    /// The server answered with an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Connection settings for a participant.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket URL of the fabric (e.g. `ws://127.0.0.1:8787/ws`).
    pub url: String,
    /// Stable node id to register as.
    pub node_id: String,
    /// Human-readable node name.
    pub node_name: String,
    /// Participant kind.
    pub node_type: NodeType,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// HTTP endpoint for deliveries while the session is detached.
    pub endpoint: Option<String>,
    /// Entity identity to bind at registration (cleared on disconnect).
    pub entity_id: Option<String>,
    /// Bearer token for the handshake; absent means anonymous.
    pub auth_token: Option<String>,
    /// Shared network secret for sealing event hashes.
    pub network_secret: String,
    /// Heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Per-request ack timeout.
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Config with stock defaults (30 s heartbeats, 10 s request timeout).
    pub fn new(
        url: impl Into<String>,
        node_id: impl Into<String>,
        node_type: NodeType,
        network_secret: impl Into<String>,
    ) -> Self {
        let node_id = node_id.into();
        Self {
            url: url.into(),
            node_name: node_id.clone(),
            node_id,
            node_type,
            capabilities: Vec::new(),
            endpoint: None,
            entity_id: None,
            auth_token: None,
            network_secret: network_secret.into(),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Optional fields of [`Relay::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    /// Explicit target node.
    pub target: Option<String>,
    /// Causal predecessor event id.
    pub caused_by: Option<String>,
    /// Boundary; defaults to intra.
    pub boundary: Option<Boundary>,
    /// Source entity identity.
    pub source_entity_id: Option<String>,
    /// Route to whichever node holds this entity.
    pub target_entity_id: Option<String>,
}

/// What [`Relay::send`] returns: the event id and its finalized trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// Routed event id.
    pub event_id: String,
    /// Finalized trace; inspect `status` and `error`.
    pub trace: Trace,
}

/// SDN watch callback.
pub type WatchHandler = Arc<dyn Fn(Event, Trace) + Send + Sync>;

/// A topology change pushed to every session.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyEvent {
    /// A node registered.
    Joined(Node),
    /// A node was unregistered or reaped.
    Left(String),
    /// A node's session detached (the node itself remains).
    Disconnected(String),
}

/// Topology change callback.
pub type TopologyHandler = Arc<dyn Fn(TopologyEvent) + Send + Sync>;

struct WatchEntry {
    filters: WatchFilter,
    handler: WatchHandler,
    server_id: Option<String>,
}

/// State shared between the public API and the connection driver.
pub(crate) struct RelayShared {
    pub(crate) cfg: RelayConfig,
    handlers: Handlers,
    watches: Mutex<HashMap<String, WatchEntry>>,
    topology_handlers: Mutex<Vec<TopologyHandler>>,
    claims: ClaimBook,
}

impl RelayShared {
    pub(crate) fn ingest_event(&self, event: Event) {
        self.handlers.fire(&event);
    }

    pub(crate) fn ingest_topology(&self, change: TopologyEvent) {
        let handlers: Vec<TopologyHandler> = self.topology_handlers.lock().clone();
        for handler in handlers {
            let change = change.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(change))).is_err() {
                warn!("topology handler panicked");
            }
        }
    }

    pub(crate) fn ingest_sdn(&self, event: &Event, trace: &Trace) {
        let handlers: Vec<WatchHandler> = {
            let watches = self.watches.lock();
            watches
                .values()
                .filter(|entry| entry.filters.matches(event))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };
        for handler in handlers {
            let (event, trace) = (event.clone(), trace.clone());
            if catch_unwind(AssertUnwindSafe(|| handler(event, trace))).is_err() {
                warn!("watch handler panicked");
            }
        }
    }

    pub(crate) fn watch_filters(&self) -> Vec<(String, WatchFilter)> {
        self.watches
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.filters.clone()))
            .collect()
    }

    pub(crate) fn set_watch_server_id(&self, client_id: &str, server_id: String) {
        if let Some(entry) = self.watches.lock().get_mut(client_id) {
            entry.server_id = Some(server_id);
        }
    }
}

/// A live connection to the fabric.
pub struct Relay {
    shared: Arc<RelayShared>,
    cmd_tx: mpsc::Sender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Open a session: connect, handshake (with `auth_token` when set),
    /// register the node, and start the heartbeat loop. Resolves once the
    /// server confirms registration.
    pub async fn connect(cfg: RelayConfig) -> Result<Self, RelayError> {
        let heartbeat_interval = cfg.heartbeat_interval;
        let node_id = cfg.node_id.clone();
        let shared = Arc::new(RelayShared {
            cfg,
            handlers: Handlers::new(),
            watches: Mutex::new(HashMap::new()),
            topology_handlers: Mutex::new(Vec::new()),
            claims: ClaimBook::new(),
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(driver::drive(Arc::clone(&shared), cmd_rx, ready_tx));
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(RelayError::Disconnected),
        }

        // Heartbeat loop: runs until the driver goes away.
        let heartbeat_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (reply, ack) = oneshot::channel();
                let cmd = Command::Request {
                    msg: ClientMessage::NodeHeartbeat {
                        node_id: node_id.clone(),
                    },
                    reply,
                };
                if heartbeat_tx.send(cmd).await.is_err() {
                    break;
                }
                if let Ok(Err(err)) = ack.await {
                    debug!(%err, "heartbeat failed");
                }
            }
        });

        Ok(Self {
            shared,
            cmd_tx,
            driver: Mutex::new(Some(driver)),
        })
    }

    async fn request(&self, msg: ClientMessage) -> Result<AckBody, RelayError> {
        let (reply, ack) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request { msg, reply })
            .await
            .map_err(|_| RelayError::Disconnected)?;
        match tokio::time::timeout(self.shared.cfg.request_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::Disconnected),
            Err(_) => Err(RelayError::Timeout),
        }
    }

    fn expect_data<T: DeserializeOwned>(ack: AckBody) -> Result<T, RelayError> {
        if !ack.ok {
            return Err(RelayError::Server(
                ack.error.unwrap_or_else(|| "request refused".into()),
            ));
        }
        let data = ack
            .data
            .ok_or_else(|| RelayError::Protocol("ack carried no data".into()))?;
        serde_json::from_value(data).map_err(|err| RelayError::Protocol(err.to_string()))
    }

    fn expect_ok(ack: AckBody) -> Result<(), RelayError> {
        if ack.ok {
            Ok(())
        } else {
            Err(RelayError::Server(
                ack.error.unwrap_or_else(|| "request refused".into()),
            ))
        }
    }

    /// Emit an event authored by this node and return its routing receipt.
    pub async fn send(
        &self,
        payload: EventPayload,
        run_id: &str,
        opts: SendOpts,
    ) -> Result<SendReceipt, RelayError> {
        let mut wrapper = EventWrapper::new(
            self.shared.cfg.node_id.clone(),
            run_id,
            opts.boundary.unwrap_or(Boundary::Intra),
        );
        wrapper.target = opts.target;
        wrapper.caused_by = opts.caused_by;
        wrapper.source_entity_id = opts.source_entity_id;
        wrapper.target_entity_id = opts.target_entity_id;
        let event = integrity::seal(payload, wrapper, &self.shared.cfg.network_secret);
        let ack = self.request(ClientMessage::EventSend { event }).await?;
        let ack: EventAck = Self::expect_data(ack)?;
        Ok(SendReceipt {
            event_id: ack.event_id,
            trace: ack.trace,
        })
    }

    /// Subscribe a process-local handler for an event type (or
    /// [`WILDCARD`]). Wildcard handlers fire in addition to exact ones;
    /// handler panics are isolated. Returns the token to unsubscribe with.
    pub fn on(
        &self,
        event_type: &str,
        handler: impl Fn(Event) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.shared.handlers.add(event_type, handler)
    }

    /// Remove a handler added with [`Relay::on`].
    pub fn off(&self, token: &HandlerToken) -> bool {
        self.shared.handlers.remove(token)
    }

    /// Subscribe to topology change pushes (join / leave / disconnect).
    pub fn on_topology(&self, handler: impl Fn(TopologyEvent) + Send + Sync + 'static) {
        self.shared.topology_handlers.lock().push(Arc::new(handler));
    }

    /// Create a contract from this node to `to`.
    pub async fn create_contract(
        &self,
        to: impl Into<String>,
        allowed_event_types: Vec<String>,
        boundaries: Vec<Boundary>,
        expires_at: Option<u64>,
    ) -> Result<Contract, RelayError> {
        let ack = self
            .request(ClientMessage::ContractCreate(ContractCreateBody {
                from: self.shared.cfg.node_id.clone(),
                to: to.into(),
                allowed_event_types,
                boundaries,
                expires_at,
            }))
            .await?;
        let ack: ContractAck = Self::expect_data(ack)?;
        Ok(ack.contract)
    }

    /// Subscribe to the SDN trace stream. The returned id survives
    /// reconnection (the driver resubscribes and remaps the server-side
    /// subscription under the hood).
    pub async fn watch(
        &self,
        filters: WatchFilter,
        handler: impl Fn(Event, Trace) + Send + Sync + 'static,
    ) -> Result<String, RelayError> {
        let ack = self
            .request(ClientMessage::SdnWatch {
                filters: filters.clone(),
            })
            .await?;
        let ack: WatchAck = Self::expect_data(ack)?;
        let client_id = new_id();
        self.shared.watches.lock().insert(
            client_id.clone(),
            WatchEntry {
                filters,
                handler: Arc::new(handler),
                server_id: Some(ack.subscription.id),
            },
        );
        Ok(client_id)
    }

    /// Remove a watch created with [`Relay::watch`].
    pub async fn unwatch(&self, watch_id: &str) -> Result<(), RelayError> {
        let server_id = {
            let mut watches = self.shared.watches.lock();
            let entry = watches
                .remove(watch_id)
                .ok_or_else(|| RelayError::Protocol(format!("unknown watch: {watch_id}")))?;
            entry.server_id
        };
        if let Some(subscription_id) = server_id {
            let ack = self
                .request(ClientMessage::SdnUnwatch { subscription_id })
                .await?;
            Self::expect_ok(ack)?;
        }
        Ok(())
    }

    /// Fetch a consistent registry snapshot.
    pub async fn get_topology(&self) -> Result<TopologySnapshot, RelayError> {
        let ack = self.request(ClientMessage::SdnTopology).await?;
        let ack: TopologyAck = Self::expect_data(ack)?;
        Ok(ack.topology)
    }

    /// Best-effort unregister, then close the session and stop the driver.
    pub async fn disconnect(self) -> Result<(), RelayError> {
        let (done, closed) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { done }).await.is_ok() {
            let _ = closed.await;
        }
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        Ok(())
    }

    // ── Turn-taking (plain events; nothing privileged) ─────────────

    /// Start feeding remote `assistant.intent.claim` events into the claim
    /// book. Keep the token for the lifetime of the relay.
    pub fn track_claims(&self) -> HandlerToken {
        let shared = Arc::clone(&self.shared);
        self.on(CLAIM_EVENT, move |event| {
            if let Some((conversation, record)) = parse_claim(&event.payload.data) {
                shared.claims.register(&conversation, record);
            }
        })
    }

    /// Record a claim observed out-of-band (called by handlers that
    /// receive a remote claim themselves).
    pub fn register_external_claim(
        &self,
        conversation_id: &str,
        assistant_key: &str,
        priority: i64,
        claimed_at: u64,
        expires_at: u64,
    ) {
        self.shared.claims.register(
            conversation_id,
            ClaimRecord {
                assistant: assistant_key.to_string(),
                priority,
                claimed_at,
                expires_at,
            },
        );
    }

    /// Emit `assistant.intent.claim` for a conversation and register the
    /// claim locally. The window starts now and lapses after `window`.
    #[allow(clippy::too_many_arguments)]
    pub async fn emit_claim(
        &self,
        assistant_key: &str,
        entity_id: Option<String>,
        conversation_id: &str,
        justification: &str,
        run_id: &str,
        priority: i64,
        window: Duration,
    ) -> Result<SendReceipt, RelayError> {
        let claimed_at = now_ms();
        let expires_at = claimed_at + window.as_millis().min(u128::from(u64::MAX)) as u64;
        self.shared.claims.register(
            conversation_id,
            ClaimRecord {
                assistant: assistant_key.to_string(),
                priority,
                claimed_at,
                expires_at,
            },
        );
        let payload = EventPayload {
            event_type: CLAIM_EVENT.into(),
            data: json!({
                "conversationId": conversation_id,
                "assistantKey": assistant_key,
                "justification": justification,
                "claim": {
                    "claimedAt": claimed_at,
                    "expiresAt": expires_at,
                    "priority": priority,
                },
            }),
        };
        self.send(
            payload,
            run_id,
            SendOpts {
                source_entity_id: entity_id,
                ..SendOpts::default()
            },
        )
        .await
    }

    /// Wait out the claim window for a conversation, then adjudicate:
    /// proceed unless a strictly-higher-priority claim (ties to the
    /// earliest `claimedAt`) is present.
    pub async fn wait_for_claim_window(
        &self,
        conversation_id: &str,
        assistant_key: &str,
        own_priority: i64,
        window: Duration,
    ) -> ClaimOutcome {
        tokio::time::sleep(window).await;
        self.shared
            .claims
            .adjudicate(conversation_id, assistant_key, own_priority)
    }

    /// Emit `assistant.intent.defer` with a justification.
    pub async fn emit_defer(
        &self,
        assistant_key: &str,
        conversation_id: &str,
        justification: &str,
        run_id: &str,
    ) -> Result<SendReceipt, RelayError> {
        self.emit_intent(DEFER_EVENT, assistant_key, conversation_id, justification, run_id)
            .await
    }

    /// Emit `assistant.action.observe` with a justification.
    pub async fn emit_observe(
        &self,
        assistant_key: &str,
        conversation_id: &str,
        justification: &str,
        run_id: &str,
    ) -> Result<SendReceipt, RelayError> {
        self.emit_intent(OBSERVE_EVENT, assistant_key, conversation_id, justification, run_id)
            .await
    }

    /// Emit `assistant.intent.respond` with a justification.
    pub async fn emit_respond(
        &self,
        assistant_key: &str,
        conversation_id: &str,
        justification: &str,
        run_id: &str,
    ) -> Result<SendReceipt, RelayError> {
        self.emit_intent(RESPOND_EVENT, assistant_key, conversation_id, justification, run_id)
            .await
    }

    async fn emit_intent(
        &self,
        event_type: &str,
        assistant_key: &str,
        conversation_id: &str,
        justification: &str,
        run_id: &str,
    ) -> Result<SendReceipt, RelayError> {
        let payload = EventPayload {
            event_type: event_type.into(),
            data: json!({
                "conversationId": conversation_id,
                "assistantKey": assistant_key,
                "justification": justification,
            }),
        };
        self.send(payload, run_id, SendOpts::default()).await
    }
}
