//! Structured logging setup
//!
//! Tracing subscriber initialization plus connection/request span helpers
//! used across the session runtime.

use {
    tracing::{info, span, Level, Span},
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
    uuid::Uuid,
};

/// Initialize the tracing subscriber with appropriate configuration
pub fn init_tracing() {
    // Try to get log level from environment, default to info
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wiremcp=info,warp=info"));

    // Check if JSON format is requested
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if json_format {
        // JSON format for production/structured logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        // Human-readable format for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    info!("Tracing initialized");
}

/// Unique identifier for one transport connection (one session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Create a span for tracking a connection lifecycle
pub fn connection_span(connection_id: &ConnectionId) -> Span {
    span!(
        Level::INFO,
        "mcp_connection",
        connection_id = %connection_id,
    )
}

/// Create a span for tracking a request
pub fn request_span(method: &str, request_id: &str, session_id: &str) -> Span {
    span!(
        Level::INFO,
        "mcp_request",
        method = %method,
        request_id = %request_id,
        session_id = %session_id,
    )
}

pub fn log_server_startup(port: u16) {
    info!(port = port, "🚀 Starting wiremcp server");
}
