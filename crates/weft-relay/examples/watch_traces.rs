// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SDN tap: subscribe to the fabric's trace stream and log every routed
//! event matching an optional run-id filter, plus topology changes.
//!
//! ```text
//! cargo run --example watch_traces -- ws://127.0.0.1:8787/ws [run-id]
//! ```
//!
//! The SDN surface refuses anonymous sessions; pass a token (or the
//! daemon's pre-shared service key) via `WEFT_AUTH_TOKEN`.

use anyhow::{Context, Result};
use weft_proto::{NodeType, WatchFilter};
use weft_relay::{Relay, RelayConfig, TopologyEvent};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8787/ws".to_string());
    let run_id = args.next();
    let secret = std::env::var("WEFT_NETWORK_SECRET")
        .unwrap_or_else(|_| "weft-dev-network-secret".to_string());

    let mut cfg = RelayConfig::new(url, "sdn-tap", NodeType::Client, secret);
    cfg.auth_token = std::env::var("WEFT_AUTH_TOKEN").ok();
    let relay = Relay::connect(cfg).await.context("connect")?;

    relay.on_topology(|change| match change {
        TopologyEvent::Joined(node) => tracing::info!(node = %node.id, "node joined"),
        TopologyEvent::Left(node_id) => tracing::info!(node = %node_id, "node left"),
        TopologyEvent::Disconnected(node_id) => {
            tracing::info!(node = %node_id, "node disconnected");
        }
    });

    let filters = WatchFilter {
        run_id,
        ..WatchFilter::default()
    };
    relay
        .watch(filters, |event, trace| {
            tracing::info!(
                event = %event.wrapper.id,
                event_type = %event.payload.event_type,
                run = %event.wrapper.run_id,
                status = ?trace.status,
                hops = trace.path.len(),
                error = trace.error.as_deref().unwrap_or(""),
                "trace",
            );
        })
        .await
        .context("watch")?;

    tracing::info!("watching; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("ctrl-c")?;
    relay.disconnect().await.ok();
    Ok(())
}
