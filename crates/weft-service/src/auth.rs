// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Token introspection against the identity collaborator.
//!
//! Any failure (no identity URL, transport error, timeout, non-2xx,
//! inactive token) resolves to the anonymous principal; the caller's
//! permission checks do the rest. A pre-shared service key short-circuits
//! to agent-level trust without a network round trip.

use axum::http::HeaderMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use weft_proto::{AgentPrincipal, Principal};

/// Header carrying the pre-shared service key.
pub const SERVICE_KEY_HEADER: &str = "x-service-key";

const INTROSPECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    principal: Option<Principal>,
}

/// Client for the identity service's introspection endpoint.
pub struct Introspector {
    client: reqwest::Client,
    url: Option<String>,
    service_key: Option<String>,
}

impl Introspector {
    /// Build the introspection client. `url` is the identity service base
    /// URL; when absent every token resolves anonymous.
    pub fn new(url: Option<String>, service_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(INTROSPECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            service_key,
        })
    }

    fn service_principal() -> Principal {
        Principal::Agent(AgentPrincipal {
            id: "service".into(),
            agent_id: "service".into(),
            name: "pre-shared service key".into(),
            org_id: None,
            capabilities: vec![],
        })
    }

    /// Resolve a bearer token to a principal.
    pub async fn introspect(&self, token: &str) -> Principal {
        if self
            .service_key
            .as_deref()
            .is_some_and(|key| !key.is_empty() && key == token)
        {
            return Self::service_principal();
        }
        let Some(url) = &self.url else {
            return Principal::Anonymous;
        };
        let endpoint = format!("{}/api/auth/introspect", url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<IntrospectionResponse>().await {
                    Ok(body) if body.active => body.principal.unwrap_or(Principal::Anonymous),
                    Ok(_) => {
                        debug!("token inactive");
                        Principal::Anonymous
                    }
                    Err(err) => {
                        warn!(%err, "introspection response unreadable");
                        Principal::Anonymous
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "introspection rejected token");
                Principal::Anonymous
            }
            Err(err) => {
                warn!(%err, "introspection unreachable");
                Principal::Anonymous
            }
        }
    }

    /// Resolve the principal for an HTTP request: service-key header
    /// first, then `Authorization: Bearer`.
    pub async fn principal_from_headers(&self, headers: &HeaderMap) -> Principal {
        if let Some(key) = headers.get(SERVICE_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            if self
                .service_key
                .as_deref()
                .is_some_and(|expected| !expected.is_empty() && expected == key)
            {
                return Self::service_principal();
            }
        }
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some(token) => self.introspect(token).await,
            None => Principal::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn introspector(service_key: Option<&str>) -> Introspector {
        Introspector::new(None, service_key.map(Into::into)).unwrap()
    }

    #[tokio::test]
    async fn no_identity_url_means_anonymous() {
        let auth = introspector(None);
        assert_eq!(auth.introspect("some-token").await, Principal::Anonymous);
    }

    #[tokio::test]
    async fn service_key_grants_agent_trust() {
        let auth = introspector(Some("psk-1"));
        let principal = auth.introspect("psk-1").await;
        assert!(principal.is_privileged());
        assert_eq!(auth.introspect("psk-wrong").await, Principal::Anonymous);
    }

    #[tokio::test]
    async fn empty_service_key_never_matches() {
        let auth = introspector(Some(""));
        assert_eq!(auth.introspect("").await, Principal::Anonymous);
    }

    #[tokio::test]
    async fn headers_resolve_service_key_and_bearer() {
        let auth = introspector(Some("psk-1"));

        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_KEY_HEADER, "psk-1".parse().unwrap());
        assert!(auth.principal_from_headers(&headers).await.is_privileged());

        // Bearer with no identity URL falls through to anonymous.
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer tok".parse().unwrap(),
        );
        assert_eq!(
            auth.principal_from_headers(&headers).await,
            Principal::Anonymous
        );

        assert_eq!(
            auth.principal_from_headers(&HeaderMap::new()).await,
            Principal::Anonymous
        );
    }
}
