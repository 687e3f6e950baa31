//! LLM Backend Integration
//!
//! Abstracted access to chat-model servers through a common trait. The
//! classifier uses single-shot requests with a stop sequence; LLM-backed
//! specialists use the streaming path.
//!
//! # Usage
//!
//! ```ignore
//! use switchboard_core::backend::{ChatMessage, ChatRequest, LlmBackend, OpenAiBackend};
//!
//! let backend = OpenAiBackend::new("http://127.0.0.1:11434/v1", "ollama", timeout)?;
//! let request = ChatRequest::new("qwen3:latest", vec![ChatMessage::text("user", "Hello!")]);
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod openai;
mod traits;

pub use openai::OpenAiBackend;
pub use traits::{ChatMessage, ChatRequest, LlmBackend, LlmResponse, StreamingToken};
