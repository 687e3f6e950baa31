//! Raw Chunk Coercion
//!
//! Specialists emit whatever their framework produces. This module turns each
//! raw chunk into canonical [`ChunkRecord`]s, one per message, so the
//! normalizer only ever sees one shape.
//!
//! # Accepted Shapes
//!
//! ```text
//! "text"                                       -> assistant text
//! {"role": "assistant", "content": ...}        -> one record
//! [{...}, {...}]                               -> one record per element
//! {"role": "assistant", "function_call": {..}} -> tool call
//! {"role": "assistant", "tool_calls": [..]}    -> tool calls
//! {"role": "function", ...}                    -> tool result (bookkeeping)
//! ```
//!
//! Coercion is per record: one bad element in a list does not spoil the rest.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::Role;
use crate::specialist::RawChunk;

/// Why a raw record could not be coerced
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// Not a message object, or an object with no role, content or tool call
    #[error("unrecognized record shape: {0}")]
    UnrecognizedShape(&'static str),

    /// Role field present but not a known role
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Content is neither text nor a list of parts
    #[error("content is not text or parts: {0}")]
    InvalidContent(&'static str),

    /// Tool call payload is not an object
    #[error("invalid tool call: {0}")]
    InvalidToolCall(&'static str),
}

/// A pending tool invocation carried by an assistant record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallFragment {
    /// Explicit identifier, when the framework supplied one
    pub id: Option<String>,
    /// Position among the tool calls of the same raw chunk
    pub position: usize,
    /// Function name so far
    pub name: String,
    /// Arguments so far, usually partial JSON
    pub arguments: String,
}

/// One message from a raw chunk in canonical form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Author role
    pub role: Role,
    /// Flattened text content, if any
    pub text: Option<String>,
    /// Tool calls requested by this record
    pub tool_calls: Vec<ToolCallFragment>,
}

impl ChunkRecord {
    /// Plain assistant text record
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Coerce a raw chunk into records, in order
///
/// Every element of the result is either a record or the reason that element
/// was dropped.
#[must_use]
pub fn normalize(chunk: &RawChunk) -> Vec<Result<ChunkRecord, NormalizeError>> {
    let mut tool_position = 0;
    match chunk {
        RawChunk::Text(text) => vec![Ok(ChunkRecord::assistant_text(text.clone()))],
        RawChunk::Message(value) => vec![coerce_value(value, &mut tool_position)],
        RawChunk::Messages(values) => values
            .iter()
            .map(|value| coerce_value(value, &mut tool_position))
            .collect(),
        RawChunk::Other(value) => vec![Err(NormalizeError::UnrecognizedShape(json_kind(value)))],
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce_value(value: &Value, tool_position: &mut usize) -> Result<ChunkRecord, NormalizeError> {
    match value {
        Value::String(text) => Ok(ChunkRecord::assistant_text(text.clone())),
        Value::Object(object) => coerce_object(object, tool_position),
        other => Err(NormalizeError::UnrecognizedShape(json_kind(other))),
    }
}

fn coerce_object(
    object: &Map<String, Value>,
    tool_position: &mut usize,
) -> Result<ChunkRecord, NormalizeError> {
    let has_payload = ["content", "function_call", "tool_calls"]
        .iter()
        .any(|key| object.get(*key).is_some_and(|v| !v.is_null()));

    let role = match object.get("role") {
        Some(Value::String(raw)) => {
            Role::parse(raw).ok_or_else(|| NormalizeError::UnknownRole(raw.clone()))?
        }
        // Frameworks omit the role on bare content objects
        None | Some(Value::Null) if has_payload => Role::Assistant,
        None | Some(Value::Null) => return Err(NormalizeError::UnrecognizedShape("object")),
        Some(other) => return Err(NormalizeError::UnrecognizedShape(json_kind(other))),
    };

    let text = match object.get("content") {
        None => None,
        Some(content) => content_text(content)?,
    };

    let mut tool_calls = Vec::new();
    if let Some(call) = object.get("function_call").filter(|v| !v.is_null()) {
        let Value::Object(call) = call else {
            return Err(NormalizeError::InvalidToolCall("function_call is not an object"));
        };
        let id = string_field(call, "id").or_else(|| {
            object
                .get("extra")
                .and_then(|extra| extra.get("function_id"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });
        tool_calls.push(fragment(id, call, tool_position));
    }

    match object.get("tool_calls") {
        None | Some(Value::Null) => {}
        Some(Value::Array(calls)) => {
            for call in calls {
                let Value::Object(call) = call else {
                    return Err(NormalizeError::InvalidToolCall("tool_calls entry is not an object"));
                };
                let function = match call.get("function") {
                    Some(Value::Object(function)) => function,
                    _ => return Err(NormalizeError::InvalidToolCall("tool_calls entry has no function")),
                };
                tool_calls.push(fragment(string_field(call, "id"), function, tool_position));
            }
        }
        Some(_) => return Err(NormalizeError::InvalidToolCall("tool_calls is not a list")),
    }

    Ok(ChunkRecord {
        role,
        text,
        tool_calls,
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn fragment(
    id: Option<String>,
    function: &Map<String, Value>,
    tool_position: &mut usize,
) -> ToolCallFragment {
    let position = *tool_position;
    *tool_position += 1;

    let arguments = match function.get("arguments") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(arguments)) => arguments.clone(),
        // Some frameworks hand over parsed arguments
        Some(other) => other.to_string(),
    };

    ToolCallFragment {
        id,
        position,
        name: string_field(function, "name").unwrap_or_default(),
        arguments,
    }
}

/// Flatten message content to text
///
/// `Ok(None)` means the record carries no text at all.
fn content_text(content: &Value) -> Result<Option<String>, NormalizeError> {
    match content {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts.iter().filter_map(part_text).collect();
            if texts.is_empty() {
                Ok(None)
            } else {
                Ok(Some(texts.join("\n")))
            }
        }
        Value::Object(_) => part_text(content)
            .map(|text| Some(text.to_string()))
            .ok_or(NormalizeError::InvalidContent("object")),
        other => Err(NormalizeError::InvalidContent(json_kind(other))),
    }
}

/// Text of one content part: a bare string, `{"text": ..}` or `{"type": "text", "text": ..}`
fn part_text(part: &Value) -> Option<&str> {
    match part {
        Value::String(text) => Some(text.as_str()),
        Value::Object(object) => object.get("text").and_then(Value::as_str),
        _ => None,
    }
}
