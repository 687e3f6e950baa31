//! LLM Backend Traits
//!
//! Trait definitions for the chat-model client that the classifier and the
//! LLM-backed specialists talk to. Routing never depends on a concrete
//! provider, which keeps the classifier testable with scripted backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::messages::{Content, ContentPart, Message, Role};

/// Token stream events from LLM backends
#[derive(Clone, Debug)]
pub enum StreamingToken {
    /// An incremental piece of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// One chat message in provider wire form
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Provider role name
    pub role: String,
    /// Either a string or an array of OpenAI content parts
    pub content: serde_json::Value,
}

impl ChatMessage {
    /// Plain text message
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
        }
    }

    /// Convert a turn message, keeping image parts for vision models
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::Function => "tool",
            other => other.as_str(),
        };
        let content = match &message.content {
            Content::Text(text) => serde_json::Value::String(text.clone()),
            Content::Parts(parts) => serde_json::Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => {
                            serde_json::json!({ "type": "text", "text": text })
                        }
                        ContentPart::Image(url) => {
                            serde_json::json!({ "type": "image_url", "image_url": { "url": url } })
                        }
                        ContentPart::File(url) => {
                            serde_json::json!({ "type": "text", "text": format!("[file] {url}") })
                        }
                    })
                    .collect(),
            ),
        };
        Self {
            role: role.to_string(),
            content,
        }
    }
}

/// Configuration for one chat completion request
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Conversation sent to the model
    pub messages: Vec<ChatMessage>,
    /// Whether to stream the response
    pub stream: bool,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// Stop sequences; generation halts at the first match
    pub stop: Vec<String>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            stream: true,
            max_tokens: 0,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }
}

impl ChatRequest {
    /// Create a new request for a model
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Add a stop sequence
    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Response from a non-streaming request
#[derive(Clone, Debug)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "openai-compatible")
    fn name(&self) -> &str;

    /// Base URL the backend talks to, for log records
    fn endpoint(&self) -> String;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that will receive tokens as they arrive.
    /// The channel closes when the response is complete or an error occurs;
    /// dropping the receiver stops the reader.
    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// Send a request and wait for the complete response (non-streaming)
    async fn send(&self, request: &ChatRequest) -> anyhow::Result<LlmResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("qwen3:1.7b", vec![ChatMessage::text("user", "hi")])
            .with_stream(false)
            .with_temperature(1.5)
            .with_max_tokens(16)
            .with_stop("\n");

        assert_eq!(request.model, "qwen3:1.7b");
        assert!(!request.stream);
        assert!((request.temperature - 1.0).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, 16);
        assert_eq!(request.stop, vec!["\n".to_string()]);
    }

    #[test]
    fn test_chat_message_from_structured_content() {
        let message = Message::user(Content::Parts(vec![
            ContentPart::Text("what is this".to_string()),
            ContentPart::Image("http://img/cat.png".to_string()),
        ]));
        let converted = ChatMessage::from_message(&message);
        assert_eq!(converted.role, "user");
        assert_eq!(
            converted.content,
            serde_json::json!([
                { "type": "text", "text": "what is this" },
                { "type": "image_url", "image_url": { "url": "http://img/cat.png" } }
            ])
        );
    }
}
