//! JSON-RPC message codec
//!
//! Parses raw frames into the typed message model and serializes them back.
//! Decoding is a pure function of the input: a malformed frame never touches
//! session state. Encoding cannot fail for a well-formed [`Message`], and
//! `decode(encode(m)) == m` holds for every structurally valid message.

use {
    crate::error::{McpError, McpResult},
    serde::{Deserialize, Serialize},
    serde_json::{json, Map, Value},
};

/// Correlation identifier linking a Request to its terminal Response/Error.
///
/// JSON-RPC allows numbers and strings; fractional ids are rejected at decode
/// since no real client emits them and they do not survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl RequestId {
    /// Parse an id out of an arbitrary JSON value (e.g. a `requestId`
    /// carried inside a cancellation notification's params).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => json!(n),
            RequestId::String(s) => json!(s),
        }
    }
}

/// Wire error payload for terminal Error messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Typed model of one wire message.
///
/// Presence of `method` marks Request/Notification (a Request carries an id,
/// a Notification does not); presence of `result` xor `error` marks a
/// terminal Response/Error.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: Option<RequestId>,
        error: ErrorObject,
    },
}

impl Message {
    /// The correlation identifier this message carries, if any
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request { id, .. } | Message::Response { id, .. } => Some(id),
            Message::Error { id, .. } => id.as_ref(),
            Message::Notification { .. } => None,
        }
    }
}

fn decode_id(raw: &Value) -> McpResult<RequestId> {
    RequestId::from_value(raw)
        .ok_or_else(|| McpError::Decode(format!("'id' must be an integer or string, got {raw}")))
}

/// Decode one frame into a typed [`Message`].
///
/// Fails with a connection-fatal `DecodeError` on malformed syntax, a missing
/// required field, or a method/identifier type mismatch.
pub fn decode(frame: &str) -> McpResult<Message> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| McpError::Decode(format!("invalid JSON: {e}")))?;

    let obj: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| McpError::Decode("message must be a JSON object".into()))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        Some(other) => {
            return Err(McpError::Decode(format!(
                "invalid jsonrpc version: {other}, expected 2.0"
            )))
        }
        None => return Err(McpError::Decode("missing 'jsonrpc' field".into())),
    }

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(decode_id(raw)?),
    };

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| McpError::Decode("'method' must be a string".into()))?;
        if method.is_empty() {
            return Err(McpError::Decode("empty method name".into()));
        }
        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        return Ok(match id {
            Some(id) => Message::Request {
                id,
                method: method.to_string(),
                params,
            },
            None => Message::Notification {
                method: method.to_string(),
                params,
            },
        });
    }

    match (obj.get("result"), obj.get("error")) {
        (Some(_), Some(_)) => Err(McpError::Decode(
            "message carries both 'result' and 'error'".into(),
        )),
        (Some(result), None) => {
            let id = id.ok_or_else(|| McpError::Decode("response without 'id'".into()))?;
            Ok(Message::Response {
                id,
                result: result.clone(),
            })
        }
        (None, Some(error)) => {
            let error: ErrorObject = serde_json::from_value(error.clone())
                .map_err(|e| McpError::Decode(format!("invalid error object: {e}")))?;
            Ok(Message::Error { id, error })
        }
        (None, None) => Err(McpError::Decode(
            "message carries neither 'method' nor 'result'/'error'".into(),
        )),
    }
}

/// Serialize a [`Message`] into one frame. Never fails for a well-formed
/// message; schema conformance of outbound payloads is the dispatch engine's
/// responsibility, not the codec's.
pub fn encode(message: &Message) -> String {
    let value = match message {
        Message::Request { id, method, params } => {
            let mut v = json!({
                "jsonrpc": "2.0",
                "id": id.to_value(),
                "method": method,
            });
            if !params.is_null() {
                v["params"] = params.clone();
            }
            v
        }
        Message::Notification { method, params } => {
            let mut v = json!({
                "jsonrpc": "2.0",
                "method": method,
            });
            if !params.is_null() {
                v["params"] = params.clone();
            }
            v
        }
        Message::Response { id, result } => json!({
            "jsonrpc": "2.0",
            "id": id.to_value(),
            "result": result,
        }),
        Message::Error { id, error } => json!({
            "jsonrpc": "2.0",
            "id": id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null),
            "error": error,
        }),
    };
    // Display on Value is infallible
    value.to_string()
}
