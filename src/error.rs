use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::message::{ErrorObject, Message, RequestId};

#[derive(Debug, Error)]
pub enum McpError {
    // Connection-fatal: framing can no longer be trusted
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("protocol sequence violation: {0}")]
    Sequence(String),

    // Per-request errors, surfaced as Error messages on the offending id
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("server overloaded: {0}")]
    Overloaded(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    // Startup Errors
    #[error("duplicate capability: {0}")]
    DuplicateCapability(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON Errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal Errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Convert to JSON-RPC error code
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Decode(_) | Self::Json(_) => -32700,
            Self::Sequence(_) => -32002,
            Self::NotFound(_) => -32601,
            Self::InvalidArguments(_) => -32602,
            Self::Overloaded(_) => -32000,
            Self::Timeout(_) => -32001,
            _ => -32603, // Internal error
        }
    }

    /// Stable machine-readable error kind, carried in `error.data.kind`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::Json(_) => "DecodeError",
            Self::Sequence(_) => "SequenceError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidArguments(_) => "InvalidArgumentError",
            Self::Handler(_) => "HandlerError",
            Self::Overloaded(_) => "OverloadedError",
            Self::Timeout(_) => "TimeoutError",
            Self::DuplicateCapability(_) => "DuplicateCapabilityError",
            Self::Io(_) | Self::Internal(_) => "InternalError",
        }
    }

    /// Fatal errors terminate the session: after a decode or sequencing
    /// failure the shared framing/ordering contract can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Json(_) | Self::Sequence(_))
    }

    /// Build the wire error object; `data` carries the stable kind tag
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.error_code(),
            message: self.to_string(),
            data: Some(json!({ "kind": self.kind() })),
        }
    }

    /// Create the terminal Error message for a correlation identifier
    pub fn to_error_message(&self, id: Option<RequestId>) -> Message {
        Message::Error {
            id,
            error: self.to_error_object(),
        }
    }
}

// Result type alias for convenience
pub type McpResult<T> = Result<T, McpError>;

// For handler boundaries that surface anyhow::Error
impl From<anyhow::Error> for McpError {
    fn from(err: anyhow::Error) -> Self {
        McpError::Handler(err.to_string())
    }
}
