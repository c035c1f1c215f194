//! Dispatch engine
//!
//! Routes requests on an active session to the capability registry and runs
//! handlers as independent tasks: the transport read loop never waits for a
//! handler to finish. Concurrency per session is bounded by a semaphore;
//! requests past the ceiling queue in arrival order, and a request queued
//! past the configured timeout fails with an overload error instead of being
//! dispatched. Every terminal path claims the correlation identifier by
//! removing its in-flight record first, so exactly one Response xor Error is
//! ever emitted per identifier.

use {
    dashmap::DashMap,
    once_cell::sync::Lazy,
    serde_json::{json, Value},
    std::{collections::HashMap, sync::Arc, time::Instant},
    tokio::sync::{Notify, Semaphore},
    tokio::time::timeout,
    tracing::{debug, info, warn, Instrument},
};

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::handler::{cancel_pair, CancelHandle, RequestCtx};
use crate::notifications::{NotificationCtx, OutboundSender};
use crate::protocol::message::{Message, RequestId};
use crate::registry::{CapabilityKind, CapabilityRegistry, HandlerFailure};
use crate::validation::validate_arguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    List,
    Call,
}

/// Method namespace → (kind, operation), resolved once at startup
static METHOD_ROUTES: Lazy<HashMap<&'static str, (CapabilityKind, Operation)>> =
    Lazy::new(|| {
        HashMap::from([
            ("tools/list", (CapabilityKind::Tool, Operation::List)),
            ("tools/call", (CapabilityKind::Tool, Operation::Call)),
            ("resources/list", (CapabilityKind::Resource, Operation::List)),
            ("resources/read", (CapabilityKind::Resource, Operation::Call)),
            ("prompts/list", (CapabilityKind::Prompt, Operation::List)),
            ("prompts/get", (CapabilityKind::Prompt, Operation::Call)),
        ])
    });

/// Bookkeeping for one accepted request, held until its terminal message is
/// claimed
struct InFlightRecord {
    method: String,
    started_at: Instant,
    cancel: CancelHandle,
}

/// Per-session dispatcher. The registry is shared read-only across all
/// sessions; everything else here belongs to one session.
pub struct DispatchEngine {
    session_id: String,
    registry: Arc<CapabilityRegistry>,
    config: Arc<ServerConfig>,
    outbound: OutboundSender,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashMap<RequestId, InFlightRecord>>,
    idle: Arc<Notify>,
}

impl DispatchEngine {
    pub fn new(
        session_id: String,
        registry: Arc<CapabilityRegistry>,
        config: Arc<ServerConfig>,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            session_id,
            registry,
            config: Arc::clone(&config),
            outbound,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            in_flight: Arc::new(DashMap::new()),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Route one request. List operations are answered inline from the
    /// registry; call operations spawn a handler task and return
    /// immediately. Per-request failures are sent as non-fatal Error
    /// messages on the offending identifier.
    pub fn dispatch(&self, id: RequestId, method: &str, params: Value) {
        let Some(&(kind, operation)) = METHOD_ROUTES.get(method) else {
            debug!(session_id = %self.session_id, method = %method, "method not found");
            self.send_error(Some(id), &McpError::NotFound(format!("method '{method}'")));
            return;
        };

        match operation {
            Operation::List => {
                let result = self.list_response(kind);
                self.outbound.send(Message::Response { id, result });
            }
            Operation::Call => {
                if let Err(e) = self.dispatch_call(id.clone(), kind, method, params) {
                    self.send_error(Some(id), &e);
                }
            }
        }
    }

    /// Signal cancellation of an in-flight request. Unknown or already
    /// completed identifiers are a no-op: cancellation is best-effort and a
    /// completed handler ignores a late signal.
    pub fn cancel(&self, id: &RequestId) {
        match self.in_flight.get(id) {
            Some(record) => {
                info!(
                    session_id = %self.session_id,
                    request_id = %id,
                    method = %record.method,
                    "❌ cancellation requested"
                );
                record.cancel.cancel();
            }
            None => {
                debug!(
                    session_id = %self.session_id,
                    request_id = %id,
                    "cancellation for unknown or completed request, ignoring"
                );
            }
        }
    }

    /// Signal every in-flight request, used on abnormal termination
    pub fn cancel_all(&self) {
        for record in self.in_flight.iter() {
            record.cancel.cancel();
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait until no requests are in flight (used while draining)
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn dispatch_call(
        &self,
        id: RequestId,
        kind: CapabilityKind,
        method: &str,
        params: Value,
    ) -> McpResult<()> {
        let (name, args) = extract_call(kind, &params)?;

        let descriptor = self.registry.resolve(kind, &name)?;
        validate_arguments(&descriptor.input_schema, &args)?;
        let handler = self.registry.handler(kind, &name)?;

        if self.in_flight.contains_key(&id) {
            warn!(
                session_id = %self.session_id,
                request_id = %id,
                "duplicate correlation identifier while request is in flight"
            );
            return Err(McpError::InvalidArguments(format!(
                "request id {id} is already in flight"
            )));
        }

        let (cancel_handle, cancel_token) = cancel_pair();
        let ctx = RequestCtx {
            session_id: self.session_id.clone(),
            request_id: id.clone(),
            cancel: cancel_token,
            notifications: NotificationCtx::new(self.outbound.clone()),
        };

        self.in_flight.insert(
            id.clone(),
            InFlightRecord {
                method: method.to_string(),
                started_at: Instant::now(),
                cancel: cancel_handle,
            },
        );

        debug!(
            session_id = %self.session_id,
            request_id = %id,
            method = %method,
            capability = %name,
            in_flight = self.in_flight.len(),
            "🛠️ request accepted for dispatch"
        );

        // One independently schedulable task per request; the read loop
        // carries on decoding while this runs.
        let worker = Worker {
            session_id: self.session_id.clone(),
            config: Arc::clone(&self.config),
            outbound: self.outbound.clone(),
            semaphore: Arc::clone(&self.semaphore),
            in_flight: Arc::clone(&self.in_flight),
            idle: Arc::clone(&self.idle),
        };
        let span = crate::logging::request_span(method, &id.to_string(), &self.session_id);
        tokio::spawn(worker.run(id, handler(args, ctx)).instrument(span));
        Ok(())
    }

    fn list_response(&self, kind: CapabilityKind) -> Value {
        let descriptors = self.registry.list(kind);
        match kind {
            CapabilityKind::Tool => {
                let tools: Vec<Value> = descriptors
                    .iter()
                    .map(|d| {
                        let mut tool = json!({
                            "name": d.name,
                            "description": d.description,
                            "inputSchema": d.input_schema,
                        });
                        if let Some(output) = &d.output_schema {
                            tool["outputSchema"] = output.clone();
                        }
                        tool
                    })
                    .collect();
                json!({ "tools": tools })
            }
            CapabilityKind::Resource => {
                let resources: Vec<Value> = descriptors
                    .iter()
                    .map(|d| {
                        json!({
                            "uri": d.name,
                            "name": d.name,
                            "description": d.description,
                            "mimeType": d.mime_type,
                        })
                    })
                    .collect();
                json!({ "resources": resources })
            }
            CapabilityKind::Prompt => {
                let prompts: Vec<Value> = descriptors
                    .iter()
                    .map(|d| {
                        json!({
                            "name": d.name,
                            "description": d.description,
                            "arguments": prompt_arguments(&d.input_schema),
                        })
                    })
                    .collect();
                json!({ "prompts": prompts })
            }
        }
    }

    fn send_error(&self, id: Option<RequestId>, error: &McpError) {
        self.outbound.send(error.to_error_message(id));
    }
}

/// Captures everything a spawned request task needs from the engine
struct Worker {
    session_id: String,
    config: Arc<ServerConfig>,
    outbound: OutboundSender,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashMap<RequestId, InFlightRecord>>,
    idle: Arc<Notify>,
}

impl Worker {
    async fn run(
        self,
        id: RequestId,
        fut: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Value, HandlerFailure>> + Send>,
        >,
    ) {
        // Backpressure: queue on the semaphore in arrival order, give up
        // after the configured queueing timeout.
        let permit = match timeout(
            self.config.queue_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                self.finish(&id, Err(McpError::Internal("dispatch queue closed".into())));
                return;
            }
            Err(_) => {
                self.finish(
                    &id,
                    Err(McpError::Overloaded(format!(
                        "request queued longer than {:?}",
                        self.config.queue_timeout
                    ))),
                );
                return;
            }
        };

        // A request cancelled while still queued never runs
        if self.cancel_was_signalled(&id) {
            self.finish(
                &id,
                Err(McpError::Handler("request cancelled before execution".into())),
            );
            drop(permit);
            return;
        }

        let mut task = tokio::spawn(fut);

        let outcome = match timeout(self.config.request_timeout, &mut task).await {
            Ok(joined) => self.map_join(&id, joined),
            Err(_) => {
                // Timeout behaves like an external cancellation: signal the
                // token, allow the grace period, then force-abandon.
                if let Some(record) = self.in_flight.get(&id) {
                    record.cancel.cancel();
                }
                warn!(
                    session_id = %self.session_id,
                    request_id = %id,
                    "⏱️ request timed out, signalling cancellation"
                );
                match timeout(self.config.cancel_grace, &mut task).await {
                    Ok(joined) => self.map_join(&id, joined),
                    Err(_) => {
                        task.abort();
                        Err(McpError::Timeout(self.config.request_timeout))
                    }
                }
            }
        };

        drop(permit);
        self.finish(&id, outcome);
    }

    fn cancel_was_signalled(&self, id: &RequestId) -> bool {
        self.in_flight
            .get(id)
            .map(|r| r.cancel.is_cancelled())
            .unwrap_or(false)
    }

    fn map_join(
        &self,
        id: &RequestId,
        joined: Result<Result<Value, HandlerFailure>, tokio::task::JoinError>,
    ) -> McpResult<Value> {
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(HandlerFailure::Overloaded(message))) => Err(McpError::Overloaded(message)),
            Ok(Err(HandlerFailure::Failed(e))) => {
                if self.cancel_was_signalled(id) {
                    Err(McpError::Handler(format!("request cancelled: {e}")))
                } else {
                    Err(McpError::Handler(e.to_string()))
                }
            }
            Err(join_err) => Err(McpError::Internal(format!("handler task failed: {join_err}"))),
        }
    }

    /// Claim the identifier and emit its single terminal message
    fn finish(&self, id: &RequestId, outcome: McpResult<Value>) {
        let Some((_, record)) = self.in_flight.remove(id) else {
            // Already claimed; never emit a second terminal message
            warn!(
                session_id = %self.session_id,
                request_id = %id,
                "terminal outcome for already-completed request, dropping"
            );
            return;
        };

        let elapsed = record.started_at.elapsed();
        match outcome {
            Ok(result) => {
                debug!(
                    session_id = %self.session_id,
                    request_id = %id,
                    method = %record.method,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request completed"
                );
                self.outbound.send(Message::Response {
                    id: id.clone(),
                    result,
                });
            }
            Err(e) => {
                info!(
                    session_id = %self.session_id,
                    request_id = %id,
                    method = %record.method,
                    elapsed_ms = elapsed.as_millis() as u64,
                    kind = e.kind(),
                    "request failed: {e}"
                );
                self.outbound.send(e.to_error_message(Some(id.clone())));
            }
        }

        if self.in_flight.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

fn extract_call(kind: CapabilityKind, params: &Value) -> McpResult<(String, Value)> {
    match kind {
        CapabilityKind::Tool => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    McpError::InvalidArguments("missing 'name' field for tools/call".into())
                })?;
            // Some clients abbreviate 'arguments' to 'args'
            let args = params
                .get("arguments")
                .or_else(|| params.get("args"))
                .cloned()
                .unwrap_or(json!({}));
            Ok((name.to_string(), args))
        }
        CapabilityKind::Resource => {
            let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| {
                McpError::InvalidArguments("missing 'uri' field for resources/read".into())
            })?;
            Ok((uri.to_string(), json!({ "uri": uri })))
        }
        CapabilityKind::Prompt => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    McpError::InvalidArguments("missing 'name' field for prompts/get".into())
                })?;
            let args = params.get("arguments").cloned().unwrap_or(json!({}));
            Ok((name.to_string(), args))
        }
    }
}

/// Derive the prompt argument listing from the prompt's input schema
fn prompt_arguments(schema: &Value) -> Vec<Value> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    json!({
                        "name": name,
                        "description": prop.get("description").cloned().unwrap_or(json!("")),
                        "required": required.contains(&name.as_str()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
