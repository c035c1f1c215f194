//! wiremcp server binary
//!
//! Development/demo entry point: registers an illustrative echo tool plus a
//! demo resource and prompt, then serves until interrupted.

use anyhow::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use wiremcp::{logging, CapabilityRegistry, McpServer, ServerConfig};

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoInput {
    /// Text to echo back
    text: String,
}

fn build_registry() -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    registry.register_tool(
        "echo",
        "Echo the given text back to the caller",
        |input: EchoInput, ctx| async move {
            ctx.notifications.info(format!("echoing {} bytes", input.text.len()));
            Ok(json!({ "text": input.text }))
        },
    )?;

    registry.register_resource(
        "memo://greeting",
        "A static greeting resource",
        "text/plain",
        |args, _ctx| async move {
            Ok(json!({
                "contents": [{
                    "uri": args["uri"],
                    "mimeType": "text/plain",
                    "text": "Hello from wiremcp",
                }]
            }))
        },
    )?;

    registry.register_prompt(
        "summarize",
        "Build a summarization prompt for the given text",
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to summarize" }
            },
            "required": ["text"],
        }),
        |args, _ctx| async move {
            let text = args["text"].as_str().unwrap_or("");
            Ok(json!({
                "messages": [{
                    "role": "user",
                    "content": { "type": "text", "text": format!("Summarize: {text}") }
                }]
            }))
        },
    )?;

    Ok(registry)
}

#[tokio::main]
async fn main() {
    logging::init_tracing();

    let mut config = ServerConfig::default();
    if let Ok(port) = std::env::var("PORT") {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                eprintln!("invalid PORT value: {port}");
                std::process::exit(2);
            }
        }
    }

    // Registry build failure is an unrecoverable startup failure
    let registry = match build_registry() {
        Ok(registry) => registry.freeze(),
        Err(e) => {
            eprintln!("failed to build capability registry: {e}");
            std::process::exit(1);
        }
    };

    logging::log_server_startup(config.port);
    let server = McpServer::new(config, registry);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                eprintln!("server error: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }
}
