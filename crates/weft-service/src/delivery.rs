// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The daemon's [`DeliveryPort`]: session outbox enqueue for attached
//! nodes, HTTP POST for endpoint-only nodes, watcher push for the SDN
//! stream.

use crate::session::Sessions;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use weft_core::router::DeliveryPort;
use weft_proto::{wire::ServerFrame, wire::ServerMessage, Event, Trace};

/// Header carrying the event id on HTTP deliveries.
pub const EVENT_ID_HEADER: &str = "x-weft-event-id";
/// Header carrying the run id on HTTP deliveries.
pub const RUN_ID_HEADER: &str = "x-weft-run-id";

/// Production transport for the router.
pub struct FabricPort {
    sessions: Arc<Sessions>,
    http: reqwest::Client,
}

impl FabricPort {
    /// Build the port; `timeout` bounds each HTTP delivery.
    pub fn new(sessions: Arc<Sessions>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { sessions, http })
    }
}

#[async_trait]
impl DeliveryPort for FabricPort {
    async fn deliver_session(&self, session_id: &str, event: &Event) -> bool {
        self.sessions.push_to(
            session_id,
            ServerFrame::push(ServerMessage::EventReceived {
                event: event.clone(),
            }),
        )
    }

    async fn deliver_endpoint(&self, endpoint: &str, event: &Event) -> Result<(), String> {
        let response = self
            .http
            .post(endpoint)
            .header(EVENT_ID_HEADER, event.wrapper.id.as_str())
            .header(RUN_ID_HEADER, event.wrapper.run_id.as_str())
            .json(event)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("endpoint returned {}", response.status()))
        }
    }

    async fn notify_watcher(&self, session_id: &str, event: &Event, trace: &Trace) {
        let _ = self.sessions.push_to(
            session_id,
            ServerFrame::push(ServerMessage::SdnEvent {
                event: event.clone(),
                trace: trace.clone(),
            }),
        );
    }
}
