//! Unit tests for the session/dispatch core

pub mod dispatch_tests;

use {
    serde_json::{json, Value},
    std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    std::time::Duration,
    tokio::sync::mpsc,
};

use crate::config::ServerConfig;
use crate::dispatch::DispatchEngine;
use crate::notifications::OutboundSender;
use crate::protocol::message::Message;
use crate::registry::{CapabilityDescriptor, CapabilityRegistry, HandlerFailure};

/// Registry with the capabilities the dispatch/session tests exercise
pub fn test_registry() -> (Arc<CapabilityRegistry>, Arc<AtomicUsize>) {
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = CapabilityRegistry::new();

    let counter = Arc::clone(&invocations);
    registry
        .register_tool(
            "echo",
            "Echo text back",
            move |input: EchoInput, _ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "text": input.text }))
                }
            },
        )
        .unwrap();

    registry
        .register_tool(
            "slow",
            "Sleep for the requested duration, observing cancellation",
            |input: SlowInput, ctx| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(input.ms)) => {
                        Ok(json!({ "slept_ms": input.ms }))
                    }
                    _ = ctx.cancel.cancelled() => {
                        anyhow::bail!("handler observed cancellation")
                    }
                }
            },
        )
        .unwrap();

    registry
        .register_tool(
            "stubborn",
            "Sleep without ever checking the cancellation token",
            |input: SlowInput, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(input.ms)).await;
                Ok(json!({ "slept_ms": input.ms }))
            },
        )
        .unwrap();

    registry
        .register_tool("failing", "Always fails", |_input: EchoInput, _ctx| async move {
            anyhow::bail!("intentional failure")
        })
        .unwrap();

    registry
        .register(
            CapabilityDescriptor::tool("busy", "Reports resource exhaustion", json!({})),
            Arc::new(|_args, _ctx| {
                Box::pin(async { Err(HandlerFailure::Overloaded("worker pool exhausted".into())) })
                    as std::pin::Pin<
                        Box<dyn std::future::Future<Output = crate::registry::HandlerResult> + Send>,
                    >
            }),
        )
        .unwrap();

    registry
        .register_resource(
            "memo://note",
            "A note",
            "text/plain",
            |args, _ctx| async move {
                Ok(json!({
                    "contents": [{ "uri": args["uri"], "mimeType": "text/plain", "text": "note" }]
                }))
            },
        )
        .unwrap();

    registry
        .register_prompt(
            "greet",
            "Greeting prompt",
            json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"],
            }),
            |args, _ctx| async move {
                Ok(json!({
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": format!("Greet {}", args["name"]) }
                    }]
                }))
            },
        )
        .unwrap();

    (registry.freeze(), invocations)
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
pub struct EchoInput {
    pub text: String,
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
pub struct SlowInput {
    pub ms: u64,
}

/// Config tuned so timeout paths resolve quickly under test
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        max_in_flight: 4,
        queue_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
        cancel_grace: Duration::from_millis(100),
        ..ServerConfig::default()
    }
}

/// Dispatch engine wired to an observable outbound channel
pub fn test_engine(
    config: ServerConfig,
    registry: Arc<CapabilityRegistry>,
) -> (DispatchEngine, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbound = OutboundSender::new("test-session".into(), tx);
    let engine = DispatchEngine::new(
        "test-session".into(),
        registry,
        Arc::new(config),
        outbound,
    );
    (engine, rx)
}

/// Receive one outbound message or panic after five seconds
pub async fn recv_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outbound message")
        .expect("outbound channel closed")
}

/// Error kind tag from a terminal Error message
pub fn error_kind(message: &Message) -> String {
    match message {
        Message::Error { error, .. } => error
            .data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        other => panic!("expected error message, got {other:?}"),
    }
}
