// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Daemon configuration: flags first, `WEFT_*` environment second,
//! built-in defaults third.

use anyhow::{bail, Result};
use clap::Parser;

/// Fixed development secret, refused in production mode.
pub const DEV_NETWORK_SECRET: &str = "weft-dev-network-secret";

/// `weftd` command line / environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Weft event fabric daemon")]
pub struct Config {
    /// Bind host.
    #[arg(long, env = "WEFT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "WEFT_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Shared network secret for event integrity hashes. Required in
    /// production; a fixed development default applies otherwise.
    #[arg(long, env = "WEFT_NETWORK_SECRET")]
    pub network_secret: Option<String>,

    /// Production mode: refuse to start without an explicit secret.
    #[arg(long, env = "WEFT_PRODUCTION", default_value_t = false)]
    pub production: bool,

    /// Base URL of the identity service used for token introspection.
    /// Tokens resolve to anonymous when unset.
    #[arg(long, env = "WEFT_IDENTITY_URL")]
    pub identity_url: Option<String>,

    /// Allowed CORS/WebSocket origins (repeatable; comma list via env).
    /// Empty means all origins are accepted.
    #[arg(long = "cors-origin", env = "WEFT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Heartbeat interval in seconds; also the staleness sweep cadence.
    #[arg(long, env = "WEFT_HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Node staleness timeout in seconds.
    #[arg(long, env = "WEFT_NODE_TIMEOUT_SECS", default_value_t = 90)]
    pub node_timeout_secs: u64,

    /// Event history ring capacity.
    #[arg(long, env = "WEFT_MAX_EVENT_HISTORY", default_value_t = 10_000)]
    pub max_event_history: usize,

    /// Trace store capacity.
    #[arg(long, env = "WEFT_MAX_TRACE_HISTORY", default_value_t = 5_000)]
    pub max_trace_history: usize,

    /// Pre-shared service key; bearers get agent-level trust.
    #[arg(long, env = "WEFT_SERVICE_KEY")]
    pub service_key: Option<String>,

    /// Timeout for HTTP deliveries to node endpoints, in seconds.
    #[arg(long, env = "WEFT_DELIVERY_TIMEOUT_SECS", default_value_t = 3)]
    pub delivery_timeout_secs: u64,
}

impl Config {
    /// The effective network secret: configured, or the development
    /// default outside production.
    pub fn resolve_secret(&self) -> Result<String> {
        match &self.network_secret {
            Some(secret) if !secret.is_empty() => Ok(secret.clone()),
            _ if self.production => {
                bail!("WEFT_NETWORK_SECRET is required in production mode")
            }
            _ => Ok(DEV_NETWORK_SECRET.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::parse_from(["weftd"])
    }

    #[test]
    fn defaults_match_the_configuration_contract() {
        let cfg = base();
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.node_timeout_secs, 90);
        assert_eq!(cfg.max_event_history, 10_000);
        assert_eq!(cfg.max_trace_history, 5_000);
        assert!(cfg.cors_origins.is_empty());
    }

    #[test]
    fn dev_secret_applies_outside_production() {
        let cfg = base();
        assert_eq!(cfg.resolve_secret().unwrap(), DEV_NETWORK_SECRET);
    }

    #[test]
    fn production_requires_an_explicit_secret() {
        let mut cfg = base();
        cfg.production = true;
        assert!(cfg.resolve_secret().is_err());
        cfg.network_secret = Some("prod-secret".into());
        assert_eq!(cfg.resolve_secret().unwrap(), "prod-secret");
    }
}
