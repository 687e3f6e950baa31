//! LLM-Backed Specialist
//!
//! A specialist that answers by forwarding the turn to a chat model under its
//! own system prompt. Output is emitted the way agent frameworks usually emit
//! it: each chunk is the assistant message *so far*, not the new increment.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{ModelSummary, RawChunk, RawChunkStream, Specialist};
use crate::backend::{ChatMessage, ChatRequest, LlmBackend, StreamingToken};
use crate::messages::{Role, Turn};

/// Static configuration for one LLM-backed specialist
#[derive(Clone, Debug, PartialEq)]
pub struct LlmSpecialistConfig {
    /// Routing name
    pub name: String,
    /// Capability description for the classifier
    pub description: String,
    /// Model identifier on the backend
    pub model: String,
    /// System prompt prepended to every forwarded turn
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
}

/// Specialist that streams a chat model's answer as cumulative chunks
pub struct LlmSpecialist {
    config: LlmSpecialistConfig,
    backend: Arc<dyn LlmBackend>,
}

impl LlmSpecialist {
    /// Create a specialist over a shared backend
    pub fn new(config: LlmSpecialistConfig, backend: Arc<dyn LlmBackend>) -> Self {
        Self { config, backend }
    }

    /// Build the backend request for a turn
    fn build_request(&self, turn: &Turn) -> ChatRequest {
        let mut messages = Vec::with_capacity(turn.len() + 1);
        if let Some(ref system) = self.config.system_prompt {
            messages.push(ChatMessage::text("system", system.clone()));
        }
        // Tool results without their originating call are rejected by providers
        messages.extend(
            turn.into_iter()
                .filter(|message| message.role != Role::Function)
                .map(ChatMessage::from_message),
        );

        ChatRequest::new(self.config.model.clone(), messages)
            .with_stream(true)
            .with_temperature(self.config.temperature)
    }
}

/// State threaded through the cumulative chunk stream
struct Cumulative {
    rx: mpsc::Receiver<StreamingToken>,
    buffer: String,
    finished: bool,
}

fn assistant_chunk(content: &str) -> RawChunk {
    RawChunk::Message(serde_json::json!({
        "role": "assistant",
        "content": content,
    }))
}

/// Turn a token receiver into a stream of cumulative assistant messages
fn cumulative_stream(rx: mpsc::Receiver<StreamingToken>) -> RawChunkStream {
    let state = Cumulative {
        rx,
        buffer: String::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        match state.rx.recv().await? {
            StreamingToken::Token(token) => {
                state.buffer.push_str(&token);
                let chunk = assistant_chunk(&state.buffer);
                Some((Ok(chunk), state))
            }
            StreamingToken::Complete { message } => {
                state.finished = true;
                if message == state.buffer || message.is_empty() {
                    return None;
                }
                // Backends may clean up the final text; resend it whole
                state.buffer = message;
                let chunk = assistant_chunk(&state.buffer);
                Some((Ok(chunk), state))
            }
            StreamingToken::Error(error) => {
                state.finished = true;
                Some((Err(anyhow::anyhow!(error)), state))
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Specialist for LlmSpecialist {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn model_summary(&self) -> Option<ModelSummary> {
        Some(ModelSummary {
            model: self.config.model.clone(),
            endpoint: self.backend.endpoint(),
            temperature: self.config.temperature,
        })
    }

    async fn invoke(&self, turn: &Turn) -> anyhow::Result<RawChunkStream> {
        let request = self.build_request(turn);
        tracing::debug!(
            specialist = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "Forwarding turn to backend"
        );
        let rx = self.backend.send_streaming(&request).await?;
        Ok(cumulative_stream(rx))
    }
}
