//! Capability registry
//!
//! The declarative catalog of tools, resources, and prompts one server
//! instance exposes. The registry is built once during startup, before any
//! session is accepted, then frozen behind an `Arc`; concurrent lookups on
//! the read path need no locking.

use {
    schemars::JsonSchema,
    serde::de::DeserializeOwned,
    serde_json::{json, Value},
    std::{collections::HashMap, future::Future, pin::Pin, sync::Arc},
};

use crate::error::{McpError, McpResult};
use crate::handler::RequestCtx;

/// The three capability namespaces a server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Resource => "resource",
            CapabilityKind::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure modes a handler can report. `Overloaded` lets a handler signal a
/// resource-exhaustion condition distinctly from an ordinary failure; the
/// dispatch engine maps it to an overload error instead of a handler error.
#[derive(Debug)]
pub enum HandlerFailure {
    Failed(anyhow::Error),
    Overloaded(String),
}

impl From<anyhow::Error> for HandlerFailure {
    fn from(err: anyhow::Error) -> Self {
        HandlerFailure::Failed(err)
    }
}

pub type HandlerResult = Result<Value, HandlerFailure>;

/// Boxed async handler invoked by the dispatch engine.
///
/// Receives the validated argument payload and the per-request context
/// (cancellation token + notification channel); returns the result payload
/// sent back verbatim as the Response result.
pub type CapabilityHandler = Arc<
    dyn Fn(Value, RequestCtx) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync,
>;

/// Declarative description of one registered capability. Immutable once
/// registered.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub kind: CapabilityKind,
    /// Unique within its kind. For resources this is the URI.
    pub name: String,
    pub description: String,
    /// JSON Schema for the accepted argument payload
    pub input_schema: Value,
    /// JSON Schema for the result payload, when declared
    pub output_schema: Option<Value>,
    /// MIME type, for resources
    pub mime_type: Option<String>,
}

impl CapabilityDescriptor {
    pub fn tool(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            kind: CapabilityKind::Tool,
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            output_schema: None,
            mime_type: None,
        }
    }

    pub fn resource(uri: &str, description: &str, mime_type: &str) -> Self {
        Self {
            kind: CapabilityKind::Resource,
            name: uri.to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "uri": { "type": "string" } },
                "required": ["uri"],
            }),
            output_schema: None,
            mime_type: Some(mime_type.to_string()),
        }
    }

    pub fn prompt(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            kind: CapabilityKind::Prompt,
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            output_schema: None,
            mime_type: None,
        }
    }
}

struct Entry {
    descriptor: CapabilityDescriptor,
    handler: CapabilityHandler,
}

/// Registry of everything a server instance exposes.
///
/// Registration order is preserved: `list` enumerates descriptors in the
/// order they were registered, which keeps capability enumeration responses
/// deterministic.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Entry>,
    index: HashMap<(CapabilityKind, String), usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Fails if a descriptor of the same kind and
    /// name already exists.
    pub fn register(
        &mut self,
        descriptor: CapabilityDescriptor,
        handler: CapabilityHandler,
    ) -> McpResult<()> {
        let key = (descriptor.kind, descriptor.name.clone());
        if self.index.contains_key(&key) {
            return Err(McpError::DuplicateCapability(format!(
                "{} '{}'",
                descriptor.kind, descriptor.name
            )));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(Entry {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Register a tool with a typed input, deriving the input schema from
    /// the Rust type.
    ///
    /// The wrapper deserializes the validated argument payload into `I`
    /// before invoking the handler; a payload that deserializes cleanly but
    /// was not caught by structural validation still fails safely here.
    pub fn register_tool<I, F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        handler: F,
    ) -> McpResult<()>
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(I, RequestCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let input_schema = serde_json::to_value(schemars::schema_for!(I))?;
        let descriptor = CapabilityDescriptor::tool(name, description, input_schema);
        let handler = Arc::new(handler);

        let wrapper: CapabilityHandler = Arc::new(move |args, ctx| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input: I = serde_json::from_value(args)
                    .map_err(|e| HandlerFailure::Failed(anyhow::anyhow!("invalid input: {e}")))?;
                handler(input, ctx).await.map_err(HandlerFailure::from)
            })
        });
        self.register(descriptor, wrapper)
    }

    /// Register a resource with an untyped handler. The handler receives
    /// `{ "uri": ... }` and returns the contents payload.
    pub fn register_resource<F, Fut>(
        &mut self,
        uri: &str,
        description: &str,
        mime_type: &str,
        handler: F,
    ) -> McpResult<()>
    where
        F: Fn(Value, RequestCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let descriptor = CapabilityDescriptor::resource(uri, description, mime_type);
        self.register(descriptor, wrap_untyped(handler))
    }

    /// Register a prompt template
    pub fn register_prompt<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: F,
    ) -> McpResult<()>
    where
        F: Fn(Value, RequestCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let descriptor = CapabilityDescriptor::prompt(name, description, input_schema);
        self.register(descriptor, wrap_untyped(handler))
    }

    /// Resolve a capability by kind and name
    pub fn resolve(&self, kind: CapabilityKind, name: &str) -> McpResult<&CapabilityDescriptor> {
        self.entry(kind, name).map(|e| &e.descriptor)
    }

    pub(crate) fn handler(&self, kind: CapabilityKind, name: &str) -> McpResult<CapabilityHandler> {
        self.entry(kind, name).map(|e| Arc::clone(&e.handler))
    }

    fn entry(&self, kind: CapabilityKind, name: &str) -> McpResult<&Entry> {
        self.index
            .get(&(kind, name.to_string()))
            .map(|&i| &self.entries[i])
            .ok_or_else(|| McpError::NotFound(format!("{kind} '{name}'")))
    }

    /// Enumerate descriptors of one kind in registration order
    pub fn list(&self, kind: CapabilityKind) -> Vec<&CapabilityDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.kind == kind)
            .map(|e| &e.descriptor)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Server capability summary advertised during initialization: one flag
    /// set per kind that has at least one registration.
    pub fn advertised_capabilities(&self) -> Value {
        let mut caps = json!({});
        if !self.list(CapabilityKind::Tool).is_empty() {
            caps["tools"] = json!({ "listChanged": true });
        }
        if !self.list(CapabilityKind::Resource).is_empty() {
            caps["resources"] = json!({ "listChanged": true });
        }
        if !self.list(CapabilityKind::Prompt).is_empty() {
            caps["prompts"] = json!({ "listChanged": true });
        }
        caps
    }

    /// Freeze the registry for sharing across sessions
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn wrap_untyped<F, Fut>(handler: F) -> CapabilityHandler
where
    F: Fn(Value, RequestCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |args, ctx| {
        let handler = Arc::clone(&handler);
        Box::pin(async move { handler(args, ctx).await.map_err(HandlerFailure::from) })
    })
}
