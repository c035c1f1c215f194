//! wiremcp — session, dispatch, and notification core for MCP servers
//!
//! A standalone implementation of the server side of a Model Context
//! Protocol session: the capability handshake, concurrent request dispatch
//! with cancellation, timeouts, and per-session backpressure, and the
//! out-of-band notification stream, all behind a transport-agnostic
//! adapter interface (with a WebSocket binding included).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod health;
pub mod logging;
pub mod notifications;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod validation;

// Test modules
#[cfg(test)]
pub mod tests;

// Re-export key types
pub use config::ServerConfig;
pub use dispatch::DispatchEngine;
pub use error::{McpError, McpResult};
pub use handler::{CancelToken, RequestCtx};
pub use notifications::{LogLevel, NotificationCtx, ServerNotification};
pub use protocol::{decode, encode, ErrorObject, Message, RequestId};
pub use registry::{
    CapabilityDescriptor, CapabilityKind, CapabilityRegistry, HandlerFailure,
};
pub use server::{run_session, McpServer};
pub use session::{Session, SessionPhase};

// Re-export for typed tool registration
pub use schemars::JsonSchema;
