//! Turn Classifier
//!
//! One constrained LLM call that names the specialist for a turn. The model
//! sees every specialist's name and description and must answer with a single
//! line, `Call: <name>`. Generation stops at the first newline so a chatty
//! model cannot run on.
//!
//! Anything other than a well-formed `Call:` line is "no decision" (`None`),
//! never an error; errors are reserved for the call itself failing.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{ChatMessage, ChatRequest, LlmBackend};
use crate::messages::{Role, Turn};
use crate::specialist::SpecialistRegistry;

/// Prefix the classifier must answer with
pub const CALL_PREFIX: &str = "Call:";

/// Output budget for the single answer line
const MAX_ANSWER_TOKENS: u32 = 32;

/// Errors from the classifier call itself
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The backend did not answer in time
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    /// The backend request failed
    #[error("classifier request failed: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Parse the specialist name out of classifier output
///
/// Only the first line counts. It must start with `Call:` (any case) followed
/// by a non-empty name.
#[must_use]
pub fn parse_call_line(output: &str) -> Option<String> {
    let first_line = output.trim().lines().next()?.trim();
    let prefix = first_line.get(..CALL_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(CALL_PREFIX) {
        return None;
    }

    let name = first_line[CALL_PREFIX.len()..].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Routing instruction listing every registered specialist
#[must_use]
pub fn build_prompt(registry: &SpecialistRegistry) -> String {
    let descriptions = registry
        .iter()
        .map(|specialist| format!("- {}: {}", specialist.name(), specialist.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let names = registry.names().join(", ");
    let default = registry.default_specialist().name();

    format!(
        "You are a strict task router. Pick the single most suitable helper for the \
         conversation; never answer the user yourself.\n\
         \n\
         Available helpers:\n\
         {descriptions}\n\
         Valid names (choose exactly one): {names}\n\
         \n\
         Priority rules:\n\
         1) If the user is clearly continuing the previous exchange (\"continue\", \
         \"this image\", \"same as before\"), pick the helper that answered last.\n\
         2) Image requests go to an image-capable helper; document requests go to a \
         document-capable helper.\n\
         3) Anything else, or anything uncertain, goes to {default}.\n\
         \n\
         Answer with exactly one line in this form:\n\
         {CALL_PREFIX} <helper name>\n\
         Do not output anything else."
    )
}

/// Single-call LLM classifier
pub struct TurnClassifier {
    backend: Arc<dyn LlmBackend>,
    model: String,
    timeout: Duration,
}

impl TurnClassifier {
    /// Create a classifier using `model` on `backend`
    pub fn new(backend: Arc<dyn LlmBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
        }
    }

    /// Classifier model identifier
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the classification request for a turn
    ///
    /// Assistant messages are tagged with `Call: <name>` so the model can see
    /// who answered each earlier exchange. A leading caller system message is
    /// appended to the routing prompt; later ones pass through as they are.
    /// Tool results are left out: their requesting tool call is never
    /// forwarded, and OpenAI-compatible servers reject an orphaned result.
    #[must_use]
    pub fn build_request(&self, turn: &Turn, registry: &SpecialistRegistry) -> ChatRequest {
        let mut prompt = build_prompt(registry);
        let mut history = turn.messages();
        if let Some((first, rest)) = history.split_first() {
            if first.role == Role::System {
                let preamble = first.content.flatten_text();
                if !preamble.trim().is_empty() {
                    prompt.push_str("\n\n");
                    prompt.push_str(&preamble);
                }
                history = rest;
            }
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::text("system", prompt));

        for message in history {
            let text = match message.role {
                Role::Function => continue,
                Role::System => message.content.flatten_text(),
                Role::Assistant => match message.name.as_deref() {
                    Some(name) if !name.is_empty() => message
                        .content
                        .with_prefix(&format!("{CALL_PREFIX} {name}\n"))
                        .flatten_text(),
                    _ => message.content.flatten_text(),
                },
                Role::User => message.content.flatten_text(),
            };
            messages.push(ChatMessage::text(message.role.as_str(), text));
        }

        ChatRequest::new(self.model.clone(), messages)
            .with_stream(false)
            .with_temperature(0.0)
            .with_max_tokens(MAX_ANSWER_TOKENS)
            .with_stop("\n")
    }

    /// Ask the model which specialist should take the turn
    ///
    /// Returns `Ok(None)` when the answer is not a usable `Call:` line. The
    /// returned name is not checked against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Timeout`] if the call exceeds the configured
    /// timeout and [`ClassifyError::Backend`] if the request fails.
    pub async fn classify(
        &self,
        turn: &Turn,
        registry: &SpecialistRegistry,
    ) -> Result<Option<String>, ClassifyError> {
        let request = self.build_request(turn, registry);

        let response = tokio::time::timeout(self.timeout, self.backend.send(&request))
            .await
            .map_err(|_| ClassifyError::Timeout(self.timeout))?
            .map_err(ClassifyError::Backend)?;

        let choice = parse_call_line(&response.content);
        tracing::debug!(
            model = %self.model,
            raw_output = %response.content,
            choice = ?choice,
            duration_ms = ?response.duration_ms,
            "Classifier answered"
        );
        Ok(choice)
    }
}
