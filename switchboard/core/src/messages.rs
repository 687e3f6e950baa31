//! Turn Messages
//!
//! The inbound side of a turn: the ordered message history a caller hands to
//! the pipeline. Messages arrive already normalized by the request layer, so
//! this module only models them and offers the few text views routing needs.
//!
//! # Content Shapes
//!
//! Content is either plain text or an ordered list of typed parts:
//!
//! ```text
//! "hello"                                      -> Content::Text
//! [{"text": "what is"}, {"image": "http://.."}] -> Content::Parts
//! ```

use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user input
    User,
    /// A specialist's answer
    Assistant,
    /// Tool or function execution result
    #[serde(alias = "tool", alias = "plugin")]
    Function,
    /// Instruction preamble
    System,
}

impl Role {
    /// Parse a wire role name, accepting the common aliases
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "function" | "tool" | "plugin" => Some(Self::Function),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Function => "function",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed part of structured content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPart {
    /// Text fragment
    Text(String),
    /// Image reference (URL or data URI)
    Image(String),
    /// File reference (URL or path)
    File(String),
}

impl ContentPart {
    /// Text carried by this part, if it is a text part
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image(_) | Self::File(_) => None,
        }
    }
}

/// Message content: plain text or ordered structured parts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text
    Text(String),
    /// Structured multimodal parts
    Parts(Vec<ContentPart>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl Content {
    /// Flatten to plain text
    ///
    /// Structured content contributes its text parts, in order, joined by a
    /// newline. Image and file parts contribute nothing.
    #[must_use]
    pub fn flatten_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether there is no text and no parts at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// Prefix the content with `prefix`
    ///
    /// For structured content the prefix goes on the first text part; content
    /// without any text part is returned unchanged.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Self {
        match self {
            Self::Text(text) => Self::Text(format!("{prefix}{text}")),
            Self::Parts(parts) => {
                let mut parts = parts.clone();
                if let Some(ContentPart::Text(text)) = parts
                    .iter_mut()
                    .find(|part| matches!(part, ContentPart::Text(_)))
                {
                    text.insert_str(0, prefix);
                }
                Self::Parts(parts)
            }
        }
    }
}

/// A single message in a turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Message body
    #[serde(default)]
    pub content: Content,
    /// Specialist that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form metadata carried through from the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Message {
    /// Create a message with the given role and content
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            metadata: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attach the specialist name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The full message history for one request, most recent last
///
/// Read-only to the core: routing and forwarding work on borrowed views or
/// clones, never on the caller's copy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Turn {
    messages: Vec<Message>,
}

impl Turn {
    /// Wrap a message history
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Messages in chronological order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Copy of the turn without a leading system message
    ///
    /// Specialists carry their own system prompt, so the caller's preamble is
    /// not forwarded.
    #[must_use]
    pub fn without_leading_system(&self) -> Self {
        let skip = usize::from(
            self.messages
                .first()
                .is_some_and(|message| message.role == Role::System),
        );
        Self::new(self.messages[skip..].to_vec())
    }
}

impl From<Vec<Message>> for Turn {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl<'a> IntoIterator for &'a Turn {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
