//! Argument payload validation
//!
//! Structural validation of request arguments against a capability's input
//! schema, performed before the handler is ever invoked. This covers the
//! checks real clients trip over in practice: payload must be an object,
//! required properties must be present, and declared primitive types must
//! match. Typed handlers get a second line of defence from serde
//! deserialization.

use serde_json::Value;

use crate::error::{McpError, McpResult};

/// Validate `args` against a JSON-Schema-shaped `schema`.
///
/// A mismatch yields `InvalidArgumentError`; the caller must not invoke the
/// handler in that case.
pub fn validate_arguments(schema: &Value, args: &Value) -> McpResult<()> {
    let Some(schema) = schema.as_object() else {
        // No usable schema registered; accept anything
        return Ok(());
    };

    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(McpError::InvalidArguments(format!(
            "arguments must be an object, got {}",
            type_name(args)
        )));
    }

    let args_obj = match args.as_object() {
        Some(obj) => obj,
        None => return Ok(()),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(name) {
                return Err(McpError::InvalidArguments(format!(
                    "missing required property '{name}'"
                )));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(properties) = properties {
        for (name, prop_schema) in properties {
            let Some(value) = args_obj.get(name) else {
                continue;
            };
            if let Some(expected) = prop_schema.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(McpError::InvalidArguments(format!(
                        "wrong type for property '{name}': expected {expected}, got {}",
                        type_name(value)
                    )));
                }
            }
        }

        // additionalProperties: false rejects unknown keys
        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for name in args_obj.keys() {
                if !properties.contains_key(name) {
                    return Err(McpError::InvalidArguments(format!(
                        "unknown property '{name}'"
                    )));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown schema type keyword: skip rather than reject
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
