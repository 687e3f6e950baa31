//! Request Normalization
//!
//! Converts an OpenAI-style chat completion body into the [`Turn`] the core
//! pipeline routes on.
//!
//! # Rules
//!
//! - `system` messages are dropped (every specialist brings its own)
//! - `plugin` and `tool` are read as `function`
//! - `name` falls back to `metadata.agent_name`
//! - assistant messages with no content are dropped
//! - `function` results are dropped, since the assistant message that
//!   requested them is not forwarded either
//! - content is a string or a list of parts, either `{"text": ..}` /
//!   `{"image": ..}` / `{"file": ..}` or the OpenAI `{"type": ..}` form

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use switchboard_core::{Content, ContentPart, Message, Role, Turn};

/// Errors from normalizing a request body
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Nothing left to answer after normalization
    #[error("request contains no messages to answer")]
    EmptyTurn,

    /// Role the service does not know
    #[error("message {index}: unknown role {role:?}")]
    UnknownRole {
        /// Position in the request
        index: usize,
        /// Role as sent
        role: String,
    },

    /// Content that is neither text nor a list of known parts
    #[error("message {index}: {reason}")]
    InvalidContent {
        /// Position in the request
        index: usize,
        /// What was wrong
        reason: String,
    },
}

/// Inbound `POST /v1/chat/completions` body
#[derive(Clone, Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// Ignored for routing; echoed in logs
    #[serde(default)]
    pub model: Option<String>,

    /// Conversation so far, most recent last
    pub messages: Vec<RequestMessage>,

    /// Stream frames (`true`) or aggregate one response
    #[serde(default)]
    pub stream: bool,
}

/// One inbound message, before normalization
#[derive(Clone, Debug, Deserialize)]
pub struct RequestMessage {
    /// Wire role name
    pub role: String,

    /// String, list of parts, or null
    #[serde(default)]
    pub content: Value,

    /// Specialist that produced an assistant message
    #[serde(default)]
    pub name: Option<String>,

    /// Caller metadata
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl ChatCompletionRequest {
    /// Normalize into a turn
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] for unknown roles, unreadable content, or a
    /// request with nothing left to answer.
    pub fn to_turn(&self) -> Result<Turn, RequestError> {
        let mut messages = Vec::with_capacity(self.messages.len());

        for (index, raw) in self.messages.iter().enumerate() {
            let role = Role::parse(&raw.role).ok_or_else(|| RequestError::UnknownRole {
                index,
                role: raw.role.clone(),
            })?;

            match role {
                Role::System | Role::Function => continue,
                Role::User | Role::Assistant => {}
            }

            let content = parse_content(&raw.content)
                .map_err(|reason| RequestError::InvalidContent { index, reason })?;
            if role == Role::Assistant && content.is_empty() {
                tracing::debug!(index, "Dropping assistant message without content");
                continue;
            }

            let mut message = Message::new(role, content);
            if let Some(name) = speaker_name(raw) {
                message = message.with_name(name);
            }
            if let Some(ref metadata) = raw.metadata {
                message = message.with_metadata(metadata.clone());
            }
            messages.push(message);
        }

        if messages.is_empty() {
            return Err(RequestError::EmptyTurn);
        }
        Ok(Turn::new(messages))
    }
}

/// Explicit `name`, else `metadata.agent_name`
fn speaker_name(raw: &RequestMessage) -> Option<String> {
    raw.name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            raw.metadata
                .as_ref()?
                .get("agent_name")?
                .as_str()
                .filter(|name| !name.trim().is_empty())
        })
        .map(str::to_string)
}

fn parse_content(value: &Value) -> Result<Content, String> {
    match value {
        Value::Null => Ok(Content::default()),
        Value::String(text) => Ok(Content::Text(text.clone())),
        Value::Array(parts) => parts
            .iter()
            .enumerate()
            .map(|(i, part)| parse_part(part).ok_or_else(|| format!("unreadable content part {i}")))
            .collect::<Result<Vec<_>, _>>()
            .map(Content::Parts),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => {
            Err("content must be a string or a list of parts".to_string())
        }
    }
}

fn parse_part(part: &Value) -> Option<ContentPart> {
    if let Value::String(text) = part {
        return Some(ContentPart::Text(text.clone()));
    }
    let object = part.as_object()?;

    match object.get("type").and_then(Value::as_str) {
        Some("text") => Some(ContentPart::Text(str_field(object, "text")?)),
        Some("image_url") => {
            let url = match object.get("image_url")? {
                Value::String(url) => url.clone(),
                Value::Object(inner) => str_field(inner, "url")?,
                _ => return None,
            };
            Some(ContentPart::Image(url))
        }
        Some("image") => Some(ContentPart::Image(str_field(object, "image")?)),
        Some("file") => {
            let reference = match object.get("file")? {
                Value::String(reference) => reference.clone(),
                Value::Object(inner) => str_field(inner, "file_id")
                    .or_else(|| str_field(inner, "url"))
                    .or_else(|| str_field(inner, "file_data"))?,
                _ => return None,
            };
            Some(ContentPart::File(reference))
        }
        Some(_) => None,
        None => {
            if let Some(text) = str_field(object, "text") {
                Some(ContentPart::Text(text))
            } else if let Some(image) = str_field(object, "image") {
                Some(ContentPart::Image(image))
            } else {
                str_field(object, "file").map(ContentPart::File)
            }
        }
    }
}

fn str_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}
