//! Session state machine
//!
//! Governs one client connection from handshake through active use to
//! shutdown: `Unstarted → Negotiating → Active → Draining → Closed`.
//! Only one negotiation may occur per session; a protocol violation or
//! transport error jumps straight to `Closed`.

use {
    serde_json::{json, Map, Value},
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::registry::CapabilityRegistry;

/// Lifecycle phase of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unstarted,
    Negotiating,
    Active,
    Draining,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Unstarted => "unstarted",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Active => "active",
            SessionPhase::Draining => "draining",
            SessionPhase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// State for one client connection. Owned by the session runtime; destroyed
/// when the transport closes.
pub struct Session {
    id: String,
    config: std::sync::Arc<ServerConfig>,
    phase: RwLock<SessionPhase>,
    protocol_version: RwLock<Option<String>>,
    client_info: RwLock<Option<Value>>,
    /// Intersection of client- and server-advertised capability flags
    negotiated_capabilities: RwLock<Value>,
}

impl Session {
    pub fn new(id: String, config: std::sync::Arc<ServerConfig>) -> Self {
        Self {
            id,
            config,
            phase: RwLock::new(SessionPhase::Unstarted),
            protocol_version: RwLock::new(None),
            client_info: RwLock::new(None),
            negotiated_capabilities: RwLock::new(json!({})),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.read().await
    }

    pub async fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().await.clone()
    }

    pub async fn negotiated_capabilities(&self) -> Value {
        self.negotiated_capabilities.read().await.clone()
    }

    /// Handle an `initialize` request: negotiate the protocol version and
    /// capability subset, move to `Negotiating`, and return the server's
    /// capability summary.
    pub async fn handle_initialize(
        &self,
        params: &Value,
        registry: &CapabilityRegistry,
    ) -> McpResult<Value> {
        let mut phase = self.phase.write().await;
        match *phase {
            SessionPhase::Unstarted => {}
            current => {
                return Err(McpError::Sequence(format!(
                    "initialize received while session is {current}; only one negotiation may occur"
                )))
            }
        }

        let requested = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                McpError::InvalidArguments("missing 'protocolVersion' in initialize".into())
            })?;

        // Versions are advertised newest-first; the client names one and we
        // accept it when mutually supported.
        let negotiated = self
            .config
            .protocol_versions
            .iter()
            .find(|v| v.as_str() == requested)
            .cloned()
            .ok_or_else(|| {
                warn!(
                    session_id = %self.id,
                    requested = %requested,
                    supported = ?self.config.protocol_versions,
                    "unsupported protocol version requested"
                );
                McpError::InvalidArguments(format!(
                    "unsupported protocol version: {requested}. Supported versions: {:?}",
                    self.config.protocol_versions
                ))
            })?;

        let server_caps = registry.advertised_capabilities();
        let client_caps = params.get("capabilities").cloned().unwrap_or(json!({}));
        *self.negotiated_capabilities.write().await =
            intersect_capabilities(&server_caps, &client_caps);

        if let Some(client_info) = params.get("clientInfo") {
            debug!(session_id = %self.id, client_info = %client_info, "client info stored");
            *self.client_info.write().await = Some(client_info.clone());
        }
        *self.protocol_version.write().await = Some(negotiated.clone());
        *phase = SessionPhase::Negotiating;

        info!(
            session_id = %self.id,
            version = %negotiated,
            "🤝 protocol version negotiated"
        );

        Ok(json!({
            "protocolVersion": negotiated,
            "capabilities": server_caps,
            "serverInfo": {
                "name": self.config.server_name,
                "version": self.config.server_version,
            }
        }))
    }

    /// Handle the `initialized` notification: `Negotiating → Active`. Only
    /// after this may any tool/resource/prompt request be dispatched.
    pub async fn handle_initialized(&self) -> McpResult<()> {
        let mut phase = self.phase.write().await;
        match *phase {
            SessionPhase::Negotiating => {
                *phase = SessionPhase::Active;
                info!(session_id = %self.id, "✅ session active");
                Ok(())
            }
            current => Err(McpError::Sequence(format!(
                "initialized notification received while session is {current}"
            ))),
        }
    }

    /// Gate for capability requests: only an `Active` session may dispatch
    pub async fn ensure_active(&self) -> McpResult<()> {
        match *self.phase.read().await {
            SessionPhase::Active => Ok(()),
            SessionPhase::Unstarted | SessionPhase::Negotiating => Err(McpError::Sequence(
                "request before initialization complete".into(),
            )),
            SessionPhase::Draining | SessionPhase::Closed => {
                Err(McpError::Sequence("session is shutting down".into()))
            }
        }
    }

    /// Stop accepting new requests; in-flight requests may still complete
    pub async fn begin_drain(&self) {
        let mut phase = self.phase.write().await;
        if !matches!(*phase, SessionPhase::Closed | SessionPhase::Draining) {
            info!(session_id = %self.id, from = %*phase, "session draining");
            *phase = SessionPhase::Draining;
        }
    }

    /// Terminal transition; resources are released by the session runtime
    pub async fn close(&self) {
        let mut phase = self.phase.write().await;
        if *phase != SessionPhase::Closed {
            info!(session_id = %self.id, from = %*phase, "session closed");
            *phase = SessionPhase::Closed;
        }
    }
}

/// Intersection of the feature flags both sides advertised. Keys present in
/// both maps survive; nested flag objects are kept from the server side.
fn intersect_capabilities(server: &Value, client: &Value) -> Value {
    let (Some(server), Some(client)) = (server.as_object(), client.as_object()) else {
        return json!({});
    };
    let mut out = Map::new();
    for (key, flags) in server {
        if client.contains_key(key) {
            out.insert(key.clone(), flags.clone());
        }
    }
    Value::Object(out)
}
