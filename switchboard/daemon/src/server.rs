//! HTTP Server Implementation
//!
//! OpenAI-compatible surface over the turn pipeline:
//! - `POST /v1/chat/completions`: routed, normalized completion stream
//! - `GET /v1/models`: the registered specialists
//! - `GET /health`: backend reachability
//!
//! # Request Flow
//!
//! ```text
//!   client ── POST ──> chat_completions
//!                          │ ChatCompletionRequest::to_turn
//!                          v
//!                    TurnPipeline::start ──> mpsc::Receiver<WireFrame>
//!                          │
//!          stream: true    │    stream: false
//!        ┌─────────────────┴──────────────────┐
//!        v                                    v
//!   SSE body, one frame per event      CompletionAggregate
//!   (client gone => receiver dropped   (one chat.completion)
//!    => turn cancelled)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use switchboard_core::streaming::{FinishReason, WireEvent};
use switchboard_core::{
    LlmBackend, LlmSpecialist, OpenAiBackend, Router, Specialist, SpecialistRegistry,
    SwitchboardConfig, TurnPipeline, WireFrame,
};

use crate::request::{ChatCompletionRequest, RequestError};

// =============================================================================
// Application State
// =============================================================================

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// The turn pipeline, shared by all requests
    pub pipeline: Arc<TurnPipeline>,
    /// Backend probed by `/health`
    pub backend: Arc<dyn LlmBackend>,
}

impl AppState {
    /// Wire the backend, specialists, router and pipeline from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the specialist
    /// set is invalid.
    pub fn from_config(config: &SwitchboardConfig) -> Result<Self> {
        let backend: Arc<dyn LlmBackend> = Arc::new(
            OpenAiBackend::new(
                config.backend.base_url.clone(),
                config.backend.api_key.clone(),
                config.backend.request_timeout,
            )
            .context("Failed to build LLM backend client")?,
        );

        let specialists = config
            .specialists
            .iter()
            .map(|spec| {
                Arc::new(LlmSpecialist::new(spec.clone(), Arc::clone(&backend)))
                    as Arc<dyn Specialist>
            })
            .collect();
        let registry =
            Arc::new(SpecialistRegistry::new(specialists).context("Invalid specialist set")?);

        let router = Router::from_config(registry, Arc::clone(&backend), &config.router);
        let pipeline = Arc::new(TurnPipeline::with_config(router, config.pipeline()));

        Ok(Self { pipeline, backend })
    }
}

/// Build the HTTP application
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// # Errors
///
/// Returns an error if the listen address cannot be bound or the server fails.
pub async fn serve<F>(config: &SwitchboardConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;

    info!(
        listen = %config.server.listen,
        specialists = ?state.pipeline.registry().names(),
        backend = %state.backend.endpoint(),
        "Switchboard listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

// =============================================================================
// Errors
// =============================================================================

/// Handler errors, rendered as OpenAI-style error bodies
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body could not be turned into a turn
    #[error(transparent)]
    BadRequest(#[from] RequestError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "invalid_request_error",
            }
        });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let turn = request.to_turn()?;
    debug!(
        requested_model = ?request.model,
        messages = turn.len(),
        stream = request.stream,
        "Chat completion request"
    );

    let mut frames = state.pipeline.start(turn);

    if request.stream {
        let events = ReceiverStream::new(frames)
            .map(|frame| frame.payload().map(|data| Event::default().data(data)));
        return Ok(Sse::new(events).into_response());
    }

    let mut aggregate = CompletionAggregate::default();
    while let Some(frame) = frames.recv().await {
        if let WireFrame::Event(event) = frame {
            aggregate.push(&event);
        }
    }
    Ok(Json(aggregate.finish()).into_response())
}

#[derive(Debug, Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: &'static str,
    description: String,
}

async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let data = state
        .pipeline
        .registry()
        .iter()
        .map(|specialist| ModelEntry {
            id: specialist.name().to_string(),
            object: "model",
            owned_by: "switchboard",
            description: specialist.description().to_string(),
        })
        .collect();
    Json(ModelList {
        object: "list",
        data,
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let reachable = state.backend.health_check().await;
    if !reachable {
        warn!(backend = %state.backend.endpoint(), "Backend health check failed");
    }

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if reachable { "ok" } else { "degraded" },
        "backend": state.backend.endpoint(),
        "specialists": state.pipeline.registry().names(),
    });
    (status, Json(body))
}

// =============================================================================
// Non-Streaming Aggregation
// =============================================================================

/// Non-streaming `chat.completion` body
#[derive(Debug, Serialize)]
pub struct Completion {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Serialize)]
struct CompletionChoice {
    index: u32,
    message: CompletionMessage,
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, Serialize)]
struct CompletionMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<CompletedToolCall>,
}

#[derive(Debug, Default, Serialize)]
struct CompletedToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: CompletedFunction,
}

#[derive(Debug, Default, Serialize)]
struct CompletedFunction {
    name: String,
    arguments: String,
}

/// Folds a stream's delta events back into one message
#[derive(Debug, Default)]
pub struct CompletionAggregate {
    id: String,
    created: i64,
    model: String,
    content: String,
    tool_calls: BTreeMap<usize, CompletedToolCall>,
    finish_reason: Option<FinishReason>,
}

impl CompletionAggregate {
    /// Fold one event
    pub fn push(&mut self, event: &WireEvent) {
        if self.id.is_empty() {
            self.id.clone_from(&event.id);
            self.created = event.created;
            self.model.clone_from(&event.model);
        }

        if let Some(reason) = event.finish_reason() {
            self.finish_reason = Some(reason);
        }
        let Some(delta) = event.delta() else {
            return;
        };

        if let Some(ref content) = delta.content {
            if delta.content_resent {
                self.content.clear();
            }
            self.content.push_str(content);
        }
        for call in delta.tool_calls.iter().flatten() {
            let entry = self
                .tool_calls
                .entry(call.index)
                .or_insert_with(|| CompletedToolCall {
                    kind: "function",
                    ..CompletedToolCall::default()
                });
            entry.id.clone_from(&call.id);
            if let Some(ref name) = call.function.name {
                if call.function.name_resent {
                    entry.function.name.clear();
                }
                entry.function.name.push_str(name);
            }
            if let Some(ref arguments) = call.function.arguments {
                if call.function.arguments_resent {
                    entry.function.arguments.clear();
                }
                entry.function.arguments.push_str(arguments);
            }
        }
    }

    /// The aggregated response
    #[must_use]
    pub fn finish(self) -> Completion {
        Completion {
            id: self.id,
            object: "chat.completion",
            created: self.created,
            model: self.model,
            choices: vec![CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: "assistant",
                    content: self.content,
                    tool_calls: self.tool_calls.into_values().collect(),
                },
                finish_reason: self.finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use switchboard_core::backend::{ChatRequest, LlmResponse, StreamingToken};
    use switchboard_core::specialist::RawChunkStream;
    use switchboard_core::streaming::{FunctionDelta, StreamNormalizer, ToolCallDelta, WireDelta};
    use switchboard_core::{RouterConfig, Turn};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    /// Answers every turn with the same cumulative chunks
    struct Echo {
        name: &'static str,
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl Specialist for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "echo specialist"
        }

        async fn invoke(&self, _turn: &Turn) -> anyhow::Result<RawChunkStream> {
            let chunks: Vec<anyhow::Result<switchboard_core::RawChunk>> =
                self.chunks.iter().map(|c| Ok((*c).into())).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    struct FixedBackend {
        answer: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl LlmBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        fn endpoint(&self) -> String {
            "mem://fixed".to_string()
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }

        async fn send_streaming(
            &self,
            _request: &ChatRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            anyhow::bail!("not used")
        }

        async fn send(&self, request: &ChatRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: self.answer.to_string(),
                model: request.model.clone(),
                tokens_used: None,
                duration_ms: None,
            })
        }
    }

    fn state(healthy: bool) -> AppState {
        let backend: Arc<dyn LlmBackend> = Arc::new(FixedBackend {
            answer: "Call: code",
            healthy,
        });
        let registry = Arc::new(
            SpecialistRegistry::new(vec![
                Arc::new(Echo {
                    name: "chat",
                    chunks: vec!["Hi", "Hi!"],
                }) as Arc<dyn Specialist>,
                Arc::new(Echo {
                    name: "code",
                    chunks: vec!["fn", "fn main() {}"],
                }),
            ])
            .unwrap(),
        );
        let router = Router::from_config(registry, Arc::clone(&backend), &RouterConfig::default());
        AppState {
            pipeline: Arc::new(TurnPipeline::new(router)),
            backend,
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_streaming_completion() {
        let response = app(state(true))
            .oneshot(post_json(
                "/v1/chat/completions",
                &json!({"stream": true, "messages": [{"role": "user", "content": "write main"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let body = body_string(response).await;
        let payloads: Vec<&str> = body
            .split("\n\n")
            .filter_map(|block| block.strip_prefix("data: "))
            .collect();
        assert_eq!(payloads.last(), Some(&"[DONE]"));

        let events: Vec<Value> = payloads[..payloads.len() - 1]
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        let text: String = events
            .iter()
            .filter_map(|e| e["choices"][0]["delta"]["content"].as_str())
            .collect();
        assert_eq!(text, "fn main() {}");
        assert!(events.iter().all(|e| e["model"] == "code"));
        assert_eq!(events.last().unwrap()["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn test_non_streaming_completion() {
        let response = app(state(true))
            .oneshot(post_json(
                "/v1/chat/completions",
                &json!({"messages": [
                    {"role": "assistant", "content": "Hello", "name": "chat"},
                    {"role": "user", "content": "continue"}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "chat");
        assert_eq!(body["choices"][0]["message"]["content"], "Hi!");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert!(body["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[tokio::test]
    async fn test_bad_request() {
        let response = app(state(true))
            .oneshot(post_json(
                "/v1/chat/completions",
                &json!({"messages": [{"role": "system", "content": "only rules"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_models_and_health() {
        let response = app(state(true))
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["chat", "code"]);

        let response = app(state(false))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_non_streaming_completion_after_resend() {
        let backend: Arc<dyn LlmBackend> = Arc::new(FixedBackend {
            answer: "Call: chat",
            healthy: true,
        });
        let registry = Arc::new(
            SpecialistRegistry::new(vec![Arc::new(Echo {
                name: "chat",
                chunks: vec!["Hello", "Help", "Help me"],
            }) as Arc<dyn Specialist>])
            .unwrap(),
        );
        let router = Router::from_config(registry, Arc::clone(&backend), &RouterConfig::default());
        let state = AppState {
            pipeline: Arc::new(TurnPipeline::new(router)),
            backend,
        };

        let response = app(state)
            .oneshot(post_json(
                "/v1/chat/completions",
                &json!({"messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], "Help me");
    }

    #[test]
    fn test_aggregate_replaces_resent_values() {
        let mut normalizer = StreamNormalizer::with_id("s", 1, "code");
        let call = |arguments: &str| {
            switchboard_core::RawChunk::from(json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{"id": "call_0", "function": {"name": "run", "arguments": arguments}}]
            }))
        };
        let chunks = [
            "Hello".into(),
            "Help".into(),
            call("{\"a\":1"),
            call("{\"b\":2}"),
        ];

        let mut frames: Vec<WireFrame> = chunks
            .iter()
            .flat_map(|chunk| normalizer.transform(chunk))
            .collect();
        frames.extend(normalizer.finish());

        let mut aggregate = CompletionAggregate::default();
        for frame in frames {
            if let WireFrame::Event(event) = frame {
                aggregate.push(&event);
            }
        }

        let value = serde_json::to_value(aggregate.finish()).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "Help");
        assert_eq!(
            value["choices"][0]["message"]["tool_calls"][0]["function"],
            json!({"name": "run", "arguments": "{\"b\":2}"})
        );
    }

    #[test]
    fn test_aggregate_merges_tool_calls() {
        let mut aggregate = CompletionAggregate::default();
        let tool = |name: Option<&str>, arguments: &str| WireDelta {
            tool_calls: Some(vec![ToolCallDelta::function(
                0,
                "call_0",
                FunctionDelta {
                    name: name.map(str::to_string),
                    arguments: Some(arguments.to_string()),
                    ..FunctionDelta::default()
                },
            )]),
            ..WireDelta::default()
        };
        aggregate.push(&WireEvent::new("s", 1, "code", 0, tool(Some("run"), "{\"a\""), None));
        aggregate.push(&WireEvent::new("s", 1, "code", 1, tool(None, ":1}"), None));
        aggregate.push(&WireEvent::new(
            "s",
            1,
            "code",
            2,
            WireDelta::default(),
            Some(FinishReason::Stop),
        ));

        let value = serde_json::to_value(aggregate.finish()).unwrap();
        assert_eq!(
            value["choices"][0]["message"]["tool_calls"],
            json!([{"id": "call_0", "type": "function", "function": {"name": "run", "arguments": "{\"a\":1}"}}])
        );
        assert_eq!(value["id"], "s");
    }
}
