//! Server configuration
//!
//! Tunables for the session and dispatch core: the bound port, the
//! per-session concurrency ceiling, and the timeout ladder each request
//! moves through (queueing, execution, cancellation grace).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::SUPPORTED_PROTOCOL_VERSIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_addr: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum number of concurrently executing requests per session.
    /// Requests past the ceiling queue in arrival order rather than being
    /// rejected.
    pub max_in_flight: usize,

    /// How long a request may sit queued behind the concurrency ceiling
    /// before it fails with an overload error instead of being dispatched
    pub queue_timeout: Duration,

    /// Wall-clock budget for one handler invocation
    pub request_timeout: Duration,

    /// Grace period between signalling a timed-out handler's cancellation
    /// token and force-abandoning its task
    pub cancel_grace: Duration,

    /// Protocol versions advertised during negotiation, newest first
    pub protocol_versions: Vec<String>,

    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,

    /// Server name reported in the initialize response
    pub server_name: String,

    /// Server version reported in the initialize response
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8000,
            max_in_flight: 8,
            queue_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            cancel_grace: Duration::from_secs(2),
            protocol_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            max_message_size: 2 * 1024 * 1024, // 2MB
            server_name: "wiremcp-server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Tight limits for tests or restricted environments
    pub fn strict() -> Self {
        Self {
            max_in_flight: 2,
            queue_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            cancel_grace: Duration::from_millis(500),
            max_message_size: 256 * 1024, // 256KB
            ..Self::default()
        }
    }
}
