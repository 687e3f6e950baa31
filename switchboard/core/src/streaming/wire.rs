//! Wire Events
//!
//! Outbound stream protocol: OpenAI-style `chat.completion.chunk` deltas,
//! framed as server-sent events.
//!
//! ```text
//! data: {"id":"chatcmpl-..","object":"chat.completion.chunk",..,"choices":[{"delta":{..}}]}\n\n
//! data: {..."finish_reason":"stop"}\n\n
//! data: [DONE]\n\n
//! ```
//!
//! Resend markers (`content_resent`, `name_resent`, `arguments_resent`) are
//! in-process only and never serialized. They tell a consumer that folds
//! deltas back together to replace, not append.

use serde::{Deserialize, Serialize};

/// Payload of the stream-termination frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// `object` value of every streamed event
pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Why the stream finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal end of the answer
    Stop,
}

/// Incremental function name/arguments
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Unsent suffix of the function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unsent suffix of the arguments string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// `name` replaces the name sent so far
    #[serde(skip)]
    pub name_resent: bool,
    /// `arguments` replaces the arguments sent so far
    #[serde(skip)]
    pub arguments_resent: bool,
}

/// One entry of a delta's parallel tool-call array
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Stable position of the call within the stream
    pub index: usize,
    /// Tool call identifier
    pub id: String,
    /// Always `"function"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Name/argument increments
    pub function: FunctionDelta,
}

impl ToolCallDelta {
    /// Function tool-call delta
    pub fn function(index: usize, id: impl Into<String>, function: FunctionDelta) -> Self {
        Self {
            index,
            id: id.into(),
            kind: "function".to_string(),
            function,
        }
    }
}

/// The `delta` object of a streamed choice
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDelta {
    /// `"assistant"` on the first event of a stream only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text increment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool-call increments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// `content` replaces the text sent so far
    #[serde(skip)]
    pub content_resent: bool,
}

/// A streamed choice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChoice {
    /// Always 0; one choice per stream
    pub index: u32,
    /// The increment
    pub delta: WireDelta,
    /// Set on the terminal event only; serialized as `null` otherwise
    pub finish_reason: Option<FinishReason>,
}

/// One streamed event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Stream identifier, shared by every event of the stream
    pub id: String,
    /// Always [`CHUNK_OBJECT`]
    pub object: String,
    /// Stream creation time, Unix seconds
    pub created: i64,
    /// Name of the specialist answering
    pub model: String,
    /// Position of this event in the stream, from 0
    pub index: u64,
    /// Exactly one choice
    pub choices: Vec<WireChoice>,
}

impl WireEvent {
    /// Build an event with a single choice
    pub fn new(
        id: impl Into<String>,
        created: i64,
        model: impl Into<String>,
        index: u64,
        delta: WireDelta,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            id: id.into(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.into(),
            index,
            choices: vec![WireChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// Delta of the (single) choice
    #[must_use]
    pub fn delta(&self) -> Option<&WireDelta> {
        self.choices.first().map(|choice| &choice.delta)
    }

    /// Finish reason of the (single) choice
    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|choice| choice.finish_reason)
    }
}

/// One frame of the outbound stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireFrame {
    /// A delta event
    Event(WireEvent),
    /// The `[DONE]` terminator
    Done,
}

impl WireFrame {
    /// Frame payload, the part after `data: `
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Event(event) => serde_json::to_string(event),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }

    /// Full SSE line: `data: <payload>\n\n`
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.payload()?))
    }

    /// Whether this is the terminator
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
