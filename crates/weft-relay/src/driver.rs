// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The connection driver: one task owns the WebSocket, correlates acks by
//! sequence number, dispatches pushes, and reconnects with bounded
//! exponential backoff (1 s doubling to a 5 s cap, at most 10 attempts).
//! On reconnect the node is re-registered and watches are resumed.

use crate::{RelayError, RelayShared, TopologyEvent};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use weft_proto::wire::{
    decode_server, encode_client, AckBody, ClientFrame, ClientMessage, HelloBody,
    NodeRegisterBody, ServerMessage, WatchAck,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<AckBody, RelayError>>;

/// Relay implementation version sent in the handshake.
const CLIENT_VERSION: u32 = 1;
/// Reconnection bound.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Work handed to the driver by the public API.
pub(crate) enum Command {
    /// Send a request and route its ack back.
    Request {
        /// The request message.
        msg: ClientMessage,
        /// Where the ack goes.
        reply: Reply,
    },
    /// Best-effort unregister, close, exit.
    Shutdown {
        /// Signalled once the socket is closed.
        done: oneshot::Sender<()>,
    },
}

enum End {
    Shutdown(Option<oneshot::Sender<()>>),
    Lost,
}

fn transport(err: tokio_tungstenite::tungstenite::Error) -> RelayError {
    RelayError::Transport(err.to_string())
}

/// Delay before reconnect attempt `attempt` (1-based).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = 1000u64.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    Duration::from_millis(base.min(5000))
}

/// Driver entry point. Signals `ready` after the first successful
/// handshake + registration (or the error that prevented it).
pub(crate) async fn drive(
    shared: Arc<RelayShared>,
    mut cmd_rx: mpsc::Receiver<Command>,
    ready: oneshot::Sender<Result<(), RelayError>>,
) {
    let mut seq: u64 = 0;
    let mut ws = match open_session(&shared, &mut seq).await {
        Ok(ws) => {
            let _ = ready.send(Ok(()));
            ws
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    loop {
        match run_connection(&shared, &mut cmd_rx, &mut ws, &mut seq).await {
            End::Shutdown(done) => {
                let _ = request_inline(
                    &shared,
                    &mut ws,
                    &mut seq,
                    ClientMessage::NodeUnregister {
                        node_id: shared.cfg.node_id.clone(),
                    },
                )
                .await;
                let _ = ws.close(None).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
                return;
            }
            End::Lost => match reconnect(&shared, &mut cmd_rx, &mut seq).await {
                Some(next) => ws = next,
                None => return,
            },
        }
    }
}

/// Connect, handshake, register, resume watches.
async fn open_session(shared: &RelayShared, seq: &mut u64) -> Result<WsStream, RelayError> {
    let (mut ws, _) = connect_async(shared.cfg.url.as_str())
        .await
        .map_err(transport)?;

    let hello = ClientMessage::Hello(HelloBody {
        token: shared.cfg.auth_token.clone(),
        client_version: CLIENT_VERSION,
    });
    let ack = request_inline(shared, &mut ws, seq, hello).await?;
    if !ack.ok {
        return Err(RelayError::Server(
            ack.error.unwrap_or_else(|| "handshake refused".into()),
        ));
    }

    let register = ClientMessage::NodeRegister(NodeRegisterBody {
        id: shared.cfg.node_id.clone(),
        name: shared.cfg.node_name.clone(),
        node_type: shared.cfg.node_type,
        capabilities: shared.cfg.capabilities.clone(),
        endpoint: shared.cfg.endpoint.clone(),
        entity_id: shared.cfg.entity_id.clone(),
        metadata: None,
    });
    let ack = request_inline(shared, &mut ws, seq, register).await?;
    if !ack.ok {
        return Err(RelayError::Server(
            ack.error.unwrap_or_else(|| "registration refused".into()),
        ));
    }

    // Resume SDN watches with fresh server-side subscriptions.
    for (client_id, filters) in shared.watch_filters() {
        let ack = request_inline(shared, &mut ws, seq, ClientMessage::SdnWatch { filters }).await?;
        if ack.ok {
            if let Some(data) = ack.data {
                if let Ok(watch) = serde_json::from_value::<WatchAck>(data) {
                    shared.set_watch_server_id(&client_id, watch.subscription.id);
                }
            }
        }
    }

    Ok(ws)
}

/// One connection's lifetime: pump commands out, frames in.
async fn run_connection(
    shared: &RelayShared,
    cmd_rx: &mut mpsc::Receiver<Command>,
    ws: &mut WsStream,
    seq: &mut u64,
) -> End {
    let mut pending: HashMap<u64, Reply> = HashMap::new();
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Request { msg, reply }) => {
                    *seq += 1;
                    let frame = ClientFrame { seq: *seq, msg };
                    match encode_client(&frame) {
                        Ok(text) => {
                            if ws.send(Message::Text(text)).await.is_err() {
                                let _ = reply.send(Err(RelayError::Disconnected));
                                fail_pending(&mut pending);
                                return End::Lost;
                            }
                            pending.insert(*seq, reply);
                        }
                        Err(err) => {
                            let _ = reply.send(Err(RelayError::Protocol(err.to_string())));
                        }
                    }
                }
                Some(Command::Shutdown { done }) => {
                    fail_pending(&mut pending);
                    return End::Shutdown(Some(done));
                }
                None => {
                    fail_pending(&mut pending);
                    return End::Shutdown(None);
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_frame(shared, &mut pending, &text),
                Some(Ok(Message::Close(_))) | None => {
                    debug!("session closed by server");
                    fail_pending(&mut pending);
                    return End::Lost;
                }
                Some(Err(err)) => {
                    warn!(%err, "socket error");
                    fail_pending(&mut pending);
                    return End::Lost;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

fn fail_pending(pending: &mut HashMap<u64, Reply>) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(RelayError::Disconnected));
    }
}

fn handle_frame(shared: &RelayShared, pending: &mut HashMap<u64, Reply>, text: &str) {
    let frame = match decode_server(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "undecodable server frame");
            return;
        }
    };
    match (frame.seq, frame.msg) {
        (Some(seq), ServerMessage::Ack(body)) => {
            if let Some(reply) = pending.remove(&seq) {
                let _ = reply.send(Ok(body));
            }
        }
        (_, ServerMessage::EventReceived { event }) => shared.ingest_event(event),
        (_, ServerMessage::SdnEvent { event, trace }) => shared.ingest_sdn(&event, &trace),
        (_, ServerMessage::NodeJoined { node }) => {
            shared.ingest_topology(TopologyEvent::Joined(node));
        }
        (_, ServerMessage::NodeLeft { node_id }) => {
            shared.ingest_topology(TopologyEvent::Left(node_id));
        }
        (_, ServerMessage::NodeDisconnected { node_id }) => {
            shared.ingest_topology(TopologyEvent::Disconnected(node_id));
        }
        (None, ServerMessage::Ack(_)) => debug!("ack without seq"),
    }
}

/// Bounded-backoff reconnect; requests arriving meanwhile fail fast.
async fn reconnect(
    shared: &RelayShared,
    cmd_rx: &mut mpsc::Receiver<Command>,
    seq: &mut u64,
) -> Option<WsStream> {
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        let sleep = tokio::time::sleep(backoff_delay(attempt));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Request { reply, .. }) => {
                        let _ = reply.send(Err(RelayError::Disconnected));
                    }
                    Some(Command::Shutdown { done }) => {
                        let _ = done.send(());
                        return None;
                    }
                    None => return None,
                }
            }
        }
        match open_session(shared, seq).await {
            Ok(ws) => {
                info!(attempt, "reconnected");
                return Some(ws);
            }
            Err(err) => warn!(attempt, %err, "reconnect attempt failed"),
        }
    }
    warn!("reconnect abandoned after {MAX_RECONNECT_ATTEMPTS} attempts");
    None
}

/// Send one request and wait for its ack on a socket we exclusively own
/// (handshake / teardown paths). Pushes that arrive meanwhile are
/// dispatched, not dropped.
async fn request_inline(
    shared: &RelayShared,
    ws: &mut WsStream,
    seq: &mut u64,
    msg: ClientMessage,
) -> Result<AckBody, RelayError> {
    *seq += 1;
    let frame_seq = *seq;
    let text = encode_client(&ClientFrame {
        seq: frame_seq,
        msg,
    })
    .map_err(|err| RelayError::Protocol(err.to_string()))?;
    ws.send(Message::Text(text)).await.map_err(transport)?;

    let wait = tokio::time::timeout(shared.cfg.request_timeout, async {
        while let Some(msg) = ws.next().await {
            match msg.map_err(transport)? {
                Message::Text(text) => {
                    let Ok(frame) = decode_server(&text) else {
                        continue;
                    };
                    match (frame.seq, frame.msg) {
                        (Some(seq), ServerMessage::Ack(body)) if seq == frame_seq => {
                            return Ok(body)
                        }
                        (Some(_), ServerMessage::Ack(_)) => {}
                        (_, ServerMessage::EventReceived { event }) => shared.ingest_event(event),
                        (_, ServerMessage::SdnEvent { event, trace }) => {
                            shared.ingest_sdn(&event, &trace);
                        }
                        (_, ServerMessage::NodeJoined { node }) => {
                            shared.ingest_topology(TopologyEvent::Joined(node));
                        }
                        (_, ServerMessage::NodeLeft { node_id }) => {
                            shared.ingest_topology(TopologyEvent::Left(node_id));
                        }
                        (_, ServerMessage::NodeDisconnected { node_id }) => {
                            shared.ingest_topology(TopologyEvent::Disconnected(node_id));
                        }
                        _ => {}
                    }
                }
                Message::Close(_) => return Err(RelayError::Disconnected),
                _ => {}
            }
        }
        Err(RelayError::Disconnected)
    })
    .await;
    match wait {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second_to_a_five_second_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(5));
        assert_eq!(backoff_delay(10), Duration::from_secs(5));
    }
}
