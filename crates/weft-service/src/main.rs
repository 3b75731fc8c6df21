// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weftd, the weft event fabric daemon.
//!
//! Single-instance, in-memory, multi-threaded: persistent WebSocket
//! sessions on `/ws`, the HTTP API under `/api`, and a background sweep
//! that reaps stale nodes and expired contracts. Restart clears
//! everything; defaults are re-seeded on boot.

mod auth;
mod config;
mod delivery;
mod http;
mod session;
mod state;

use anyhow::Result;
use clap::Parser;
use config::Config;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weft_proto::wire::ServerMessage;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    if config.network_secret.is_none() && !config.production {
        warn!("no network secret configured; using the development default");
    }

    let state = AppState::build(config.clone())?;
    spawn_cleanup_sweep(Arc::clone(&state));

    let app = http::app(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("weftd listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("weftd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to install ctrl-c handler");
    }
}

/// Staleness sweep on the heartbeat interval: reaped nodes leave the
/// topology (with a fan-out notification), expired contracts are evicted.
fn spawn_cleanup_sweep(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.heartbeat_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // interval() ticks immediately; skip the boot tick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.registry.cleanup_stale();
            for node_id in removed {
                state
                    .sessions
                    .broadcast(ServerMessage::NodeLeft { node_id });
            }
            let expired = state.registry.cleanup_expired_contracts();
            if !expired.is_empty() {
                info!(count = expired.len(), "expired contracts evicted");
            }
        }
    });
}
