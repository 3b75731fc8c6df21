// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Minimal turn-taking participant for exercising a running `weftd`.
//!
//! Connects as an assistant-keyed service node, claims the next turn of a
//! conversation, waits out the claim window, and then either responds (it
//! won) or defers (a higher-priority assistant claimed). Run two copies
//! with different priorities to watch the window resolve:
//!
//! ```text
//! cargo run --example claim_window -- ws://127.0.0.1:8787/ws asst-a 30
//! cargo run --example claim_window -- ws://127.0.0.1:8787/ws asst-b 70
//! ```

use anyhow::{Context, Result};
use std::time::Duration;
use weft_proto::NodeType;
use weft_relay::{Relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8787/ws".to_string());
    let assistant_key = args.next().unwrap_or_else(|| "asst-demo".to_string());
    let priority: i64 = args
        .next()
        .as_deref()
        .unwrap_or("50")
        .parse()
        .context("parse priority")?;
    let secret = std::env::var("WEFT_NETWORK_SECRET")
        .unwrap_or_else(|_| "weft-dev-network-secret".to_string());

    let mut cfg = RelayConfig::new(url, assistant_key.clone(), NodeType::Service, secret);
    cfg.capabilities = vec!["turn-taking".into()];
    let relay = Relay::connect(cfg).await.context("connect")?;

    // Feed remote claims into the local claim book.
    let _claims = relay.track_claims();

    let window = Duration::from_millis(250);
    let run_id = format!("demo-{assistant_key}");
    relay
        .emit_claim(
            &assistant_key,
            None,
            "c1",
            "demo: user asked a question",
            &run_id,
            priority,
            window,
        )
        .await
        .context("emit claim")?;

    let outcome = relay
        .wait_for_claim_window("c1", &assistant_key, priority, window)
        .await;

    if outcome.should_proceed {
        tracing::info!(assistant = %assistant_key, "window won; responding");
        relay
            .emit_respond(&assistant_key, "c1", "highest-priority claim", &run_id)
            .await
            .context("emit respond")?;
    } else {
        let winner = outcome.winning_assistant.unwrap_or_default();
        tracing::info!(assistant = %assistant_key, %winner, "window lost; deferring");
        relay
            .emit_defer(&assistant_key, "c1", "outranked by another claim", &run_id)
            .await
            .context("emit defer")?;
    }

    relay.disconnect().await.ok();
    Ok(())
}
