//! Server assembly and session runtime
//!
//! Binds the configured port, upgrades each connection to a WebSocket at
//! `/mcp`, and runs one session per connection: a single-threaded read loop
//! feeding the session state machine and dispatch engine, plus one writer
//! task draining the session's outbound queue. Decoding happens strictly in
//! arrival order; handler execution is concurrent.

use {
    anyhow::{anyhow, Context, Result},
    serde_json::{json, Value},
    std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    tokio::sync::mpsc,
    tokio_stream::wrappers::TcpListenerStream,
    tracing::{debug, error, info, warn, Instrument},
    warp::Filter,
};

use crate::config::ServerConfig;
use crate::dispatch::DispatchEngine;
use crate::error::McpError;
use crate::health::HealthChecker;
use crate::logging::ConnectionId;
use crate::notifications::OutboundSender;
use crate::protocol::{self, Message, RequestId};
use crate::registry::CapabilityRegistry;
use crate::session::{Session, SessionPhase};
use crate::transport::{self, TransportReader, TransportWriter};

pub struct McpServer {
    config: Arc<ServerConfig>,
    registry: Arc<CapabilityRegistry>,
    health: Arc<HealthChecker>,
    active_sessions: Arc<AtomicUsize>,
}

impl McpServer {
    /// Create a server around a frozen capability registry. The registry is
    /// read-only from here on and shared across all sessions without
    /// synchronization.
    pub fn new(config: ServerConfig, registry: Arc<CapabilityRegistry>) -> Self {
        let version = config.server_version.clone();
        Self {
            config: Arc::new(config),
            registry,
            health: Arc::new(HealthChecker::new(version)),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the configured port and serve until the hosting process stops.
    /// A bind failure is an unrecoverable startup failure.
    pub async fn start(&self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        let active = Arc::clone(&self.active_sessions);

        let ws_route = warp::path!("mcp").and(warp::ws()).map(move |ws: warp::ws::Ws| {
            let config = Arc::clone(&config);
            let registry = Arc::clone(&registry);
            let active = Arc::clone(&active);
            ws.on_upgrade(move |socket| async move {
                let connection_id = ConnectionId::new();
                active.fetch_add(1, Ordering::Relaxed);
                info!(connection_id = %connection_id, "🔌 connection established");

                let (reader, writer) = transport::split_websocket(socket);
                run_session(
                    format!("ws-{connection_id}"),
                    config,
                    registry,
                    reader,
                    writer,
                )
                .instrument(crate::logging::connection_span(&connection_id))
                .await;

                active.fetch_sub(1, Ordering::Relaxed);
                info!(connection_id = %connection_id, "🔌 connection closed");
            })
        });

        let health = Arc::clone(&self.health);
        let active = Arc::clone(&self.active_sessions);
        let health_route = warp::path!("health").and(warp::get()).map(move || {
            warp::reply::json(&health.get_json_status(active.load(Ordering::Relaxed)))
        });

        let routes = ws_route.or(health_route);

        let addr = format!("{}:{}", self.config.bind_addr, self.config.port)
            .parse::<std::net::SocketAddr>()
            .context("invalid bind address")?;

        // Bind first so startup failures surface before we accept anything
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("could not bind to {addr}: {e}"))?;

        info!(
            addr = %addr,
            "🌐 wiremcp listening on ws://{addr}/mcp (health at http://{addr}/health)"
        );

        warp::serve(routes)
            .run_incoming(TcpListenerStream::new(listener))
            .await;

        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// Drive one session over a transport: decode frames in arrival order,
/// route them through the state machine, dispatch concurrently, and drain
/// in-flight work before closing.
pub async fn run_session<R, W>(
    session_id: String,
    config: Arc<ServerConfig>,
    registry: Arc<CapabilityRegistry>,
    mut reader: R,
    mut writer: W,
) where
    R: TransportReader,
    W: TransportWriter + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let outbound = OutboundSender::new(session_id.clone(), tx);

    // Single-writer discipline: this task is the only thing touching the
    // write half, so concurrently completing handlers cannot interleave
    // partial frames.
    let mut writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = writer.send_frame(protocol::encode(&message)).await {
                debug!("writer stopped: {e}");
                break;
            }
        }
    });

    let session = Session::new(session_id.clone(), Arc::clone(&config));
    let engine = DispatchEngine::new(
        session_id.clone(),
        registry.clone(),
        Arc::clone(&config),
        outbound.clone(),
    );

    let mut abnormal = false;

    loop {
        let frame = match reader.next_frame().await {
            None => break, // half-close: drain in-flight work
            Some(Err(e)) => {
                warn!(session_id = %session_id, "transport error: {e}");
                abnormal = true;
                break;
            }
            Some(Ok(frame)) => frame,
        };

        if frame.len() > config.max_message_size {
            let e = McpError::Decode(format!(
                "message too large: {} bytes (max: {})",
                frame.len(),
                config.max_message_size
            ));
            outbound.send(e.to_error_message(None));
            abnormal = true;
            break;
        }

        let message = match protocol::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                // Framing may be desynchronized after a decode failure, so
                // the error is connection-fatal.
                error!(session_id = %session_id, "decode failure: {e}");
                outbound.send(e.to_error_message(None));
                abnormal = true;
                break;
            }
        };

        match message {
            Message::Request { id, method, params } => {
                match handle_request(&session, &engine, registry.as_ref(), &outbound, id, &method, params)
                    .await
                {
                    RequestFlow::Continue => {}
                    RequestFlow::Drain => break,
                    RequestFlow::Abort => {
                        abnormal = true;
                        break;
                    }
                }
            }
            Message::Notification { method, params } => {
                if !handle_notification(&session, &engine, &method, params).await {
                    abnormal = true;
                    break;
                }
            }
            Message::Response { id, .. } | Message::Error { id: Some(id), .. } => {
                // The server issues no requests, so client-originated
                // terminal messages have nothing to correlate with
                warn!(
                    session_id = %session_id,
                    request_id = %id,
                    "ignoring client-originated terminal message"
                );
            }
            Message::Error { id: None, .. } => {
                warn!(session_id = %session_id, "ignoring client-originated error");
            }
        }
    }

    if abnormal {
        // Abnormal termination skips draining: in-flight work cannot be
        // meaningfully awaited once the shared contract is broken
        session.close().await;
        engine.cancel_all();
        drop(engine);
        drop(outbound);
        // Give the writer a moment to flush the fatal error frame, but
        // never wait out a handler that ignores its cancellation signal
        let deadline = config.cancel_grace + std::time::Duration::from_millis(500);
        if tokio::time::timeout(deadline, &mut writer_task).await.is_err() {
            writer_task.abort();
        }
    } else {
        session.begin_drain().await;
        engine.wait_idle().await;
        session.close().await;
        // Dropping every outbound sender lets the writer flush and stop
        drop(engine);
        drop(outbound);
        let _ = writer_task.await;
    }
}

enum RequestFlow {
    Continue,
    Drain,
    Abort,
}

async fn handle_request(
    session: &Session,
    engine: &DispatchEngine,
    registry: &CapabilityRegistry,
    outbound: &OutboundSender,
    id: RequestId,
    method: &str,
    params: Value,
) -> RequestFlow {
    match method {
        "initialize" => match session.handle_initialize(&params, registry).await {
            Ok(result) => {
                outbound.send(Message::Response { id, result });
                RequestFlow::Continue
            }
            Err(e) => {
                let fatal = e.is_fatal();
                outbound.send(e.to_error_message(Some(id)));
                if fatal {
                    RequestFlow::Abort
                } else {
                    RequestFlow::Continue
                }
            }
        },
        // Liveness probe, legal in any phase
        "ping" => {
            outbound.send(Message::Response {
                id,
                result: json!({}),
            });
            RequestFlow::Continue
        }
        "shutdown" => {
            debug!(session_id = %session.id(), "shutdown requested");
            outbound.send(Message::Response {
                id,
                result: json!({}),
            });
            RequestFlow::Drain
        }
        _ => match session.ensure_active().await {
            Ok(()) => {
                engine.dispatch(id, method, params);
                RequestFlow::Continue
            }
            Err(e) => {
                // A request on a draining session gets an error message but
                // does not abort the drain; before Active the sequencing
                // contract is broken and the connection closes.
                let draining = session.phase().await == SessionPhase::Draining;
                outbound.send(e.to_error_message(Some(id)));
                if draining {
                    RequestFlow::Continue
                } else {
                    RequestFlow::Abort
                }
            }
        },
    }
}

/// Returns false when the notification breaks the session's sequencing
/// contract
async fn handle_notification(
    session: &Session,
    engine: &DispatchEngine,
    method: &str,
    params: Value,
) -> bool {
    match method {
        "notifications/initialized" => match session.handle_initialized().await {
            Ok(()) => true,
            Err(e) => {
                error!(session_id = %session.id(), "initialization sequence violated: {e}");
                false
            }
        },
        "notifications/cancelled" | "notifications/cancel" => {
            match params.get("requestId").and_then(RequestId::from_value) {
                Some(id) => engine.cancel(&id),
                None => warn!(
                    session_id = %session.id(),
                    "cancellation notification without 'requestId'"
                ),
            }
            true
        }
        "notifications/message" => {
            log_client_message(session.id(), &params);
            true
        }
        other => {
            debug!(session_id = %session.id(), method = %other, "unhandled notification");
            true
        }
    }
}

fn log_client_message(session_id: &str, params: &Value) {
    let level = params
        .get("level")
        .and_then(Value::as_str)
        .unwrap_or("info");
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("");

    match level {
        "error" => error!(session_id = %session_id, "📝 [client] {message}"),
        "warning" | "warn" => warn!(session_id = %session_id, "📝 [client] {message}"),
        "debug" => debug!(session_id = %session_id, "📝 [client] {message}"),
        _ => info!(session_id = %session_id, "📝 [client] {message}"),
    }
}
