//! Specialist Agents
//!
//! A specialist is a self-contained handler for one task category (chat,
//! vision, code, ...). The pipeline selects one per turn by name and hands it
//! the turn; the specialist answers with a stream of raw chunks.
//!
//! Raw chunks are whatever the specialist's framework produces: a bare
//! string, one structured message, or a list of structured messages. Many
//! frameworks resend the full response so far on every chunk rather than the
//! new increment; turning that into true deltas is the stream normalizer's
//! job, not the specialist's.

mod llm;
mod registry;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::messages::Turn;

pub use llm::{LlmSpecialist, LlmSpecialistConfig};
pub use registry::{RegistryError, SpecialistRegistry};

/// One raw output unit from a specialist, in one of the shapes frameworks emit
#[derive(Clone, Debug, PartialEq)]
pub enum RawChunk {
    /// Bare text, treated as assistant output
    Text(String),
    /// A single structured message object
    Message(serde_json::Value),
    /// A list of structured messages (often the whole response so far)
    Messages(Vec<serde_json::Value>),
    /// Anything else; kept so it can be logged and dropped
    Other(serde_json::Value),
}

impl RawChunk {
    /// Short shape name for log records
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Message(_) => "message",
            Self::Messages(_) => "message_list",
            Self::Other(_) => "other",
        }
    }
}

impl From<serde_json::Value> for RawChunk {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Array(items) => Self::Messages(items),
            value @ serde_json::Value::Object(_) => Self::Message(value),
            other => Self::Other(other),
        }
    }
}

impl From<&str> for RawChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RawChunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Raw output stream of a specialist invocation
///
/// An `Err` item means the specialist failed while producing its answer.
/// Dropping the stream must stop the specialist's upstream work.
pub type RawChunkStream = BoxStream<'static, anyhow::Result<RawChunk>>;

/// Model configuration summary, logged with every routing decision
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSummary {
    /// Model identifier
    pub model: String,
    /// Backend endpoint
    pub endpoint: String,
    /// Sampling temperature
    pub temperature: f32,
}

impl std::fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "model={} endpoint={} temperature={}",
            self.model, self.endpoint, self.temperature
        )
    }
}

/// A task specialist the router can dispatch a turn to
#[async_trait]
pub trait Specialist: Send + Sync {
    /// Unique, stable name used for routing
    fn name(&self) -> &str;

    /// Capability description shown to the classifier
    fn description(&self) -> &str;

    /// Model configuration, if the specialist is model-backed
    fn model_summary(&self) -> Option<ModelSummary> {
        None
    }

    /// Start answering a turn
    ///
    /// # Errors
    ///
    /// Returns an error if the specialist cannot start producing output.
    async fn invoke(&self, turn: &Turn) -> anyhow::Result<RawChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raw_chunk_from_json_shapes() {
        assert_eq!(RawChunk::from(serde_json::json!("hi")), RawChunk::Text("hi".into()));
        assert_eq!(RawChunk::from(serde_json::json!([])).kind(), "message_list");
        assert_eq!(
            RawChunk::from(serde_json::json!({"role": "assistant"})).kind(),
            "message"
        );
        assert_eq!(RawChunk::from(serde_json::json!(42)).kind(), "other");
    }

    #[test]
    fn test_model_summary_display() {
        let summary = ModelSummary {
            model: "qwen3:latest".to_string(),
            endpoint: "http://127.0.0.1:11434/v1".to_string(),
            temperature: 0.3,
        };
        assert_eq!(
            summary.to_string(),
            "model=qwen3:latest endpoint=http://127.0.0.1:11434/v1 temperature=0.3"
        );
    }
}
