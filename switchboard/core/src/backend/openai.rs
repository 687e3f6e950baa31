//! OpenAI-Compatible Backend
//!
//! LLM backend for any server exposing the OpenAI chat completions API.
//! Ollama serves this API under `/v1`, which is the default target.
//!
//! # Endpoints
//!
//! - `POST {base_url}/chat/completions` - completions (streaming or batch)
//! - `GET {base_url}/models` - reachability probe
//!
//! Streaming responses are server-sent events, decoded with
//! `eventsource-stream`: one `{json}` chunk per event, ending with `[DONE]`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::traits::{ChatRequest, LlmBackend, LlmResponse, StreamingToken};

/// Marker payload that ends an SSE completion stream
const SSE_DONE: &str = "[DONE]";

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Base URL, without trailing slash (e.g. `http://127.0.0.1:11434/v1`)
    base_url: String,
    /// Bearer token; empty means no Authorization header
    api_key: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a new backend
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http_client,
        })
    }

    /// Get chat completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Get models endpoint URL
    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Build the JSON body for a request
    fn build_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
            "temperature": request.temperature,
        });

        if request.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn post(&self, body: &serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let response = self
            .authorize(self.http_client.post(self.completions_url()))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("backend returned {status}: {body}");
        }

        Ok(response)
    }
}

/// Meaning of one SSE event's `data` field
#[derive(Debug, PartialEq)]
enum SseData {
    /// Delta text from `choices[0].delta.content`
    Delta(String),
    /// `[DONE]` marker
    Done,
    /// Content-free or unreadable event
    Skip,
}

fn parse_event_data(data: &str) -> SseData {
    let data = data.trim();
    if data == SSE_DONE {
        return SseData::Done;
    }

    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|data| {
            data.pointer("/choices/0/delta/content")
                .and_then(serde_json::Value::as_str)
                .filter(|text| !text.is_empty())
                .map(|text| SseData::Delta(text.to_string()))
        })
        .unwrap_or(SseData::Skip)
}

/// Forward decoded SSE events to `tx` as streaming tokens
///
/// Ends with `Complete` on `[DONE]` or end of stream, with `Error` on a
/// transport or framing error, and silently once the receiver is dropped.
async fn forward_events<S, E>(events: S, tx: mpsc::Sender<StreamingToken>)
where
    S: Stream<Item = Result<Event, EventStreamError<E>>>,
    EventStreamError<E>: std::fmt::Display,
{
    futures::pin_mut!(events);
    let mut full_response = String::new();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                return;
            }
        };

        match parse_event_data(&event.data) {
            SseData::Delta(token) => {
                full_response.push_str(&token);
                if tx.send(StreamingToken::Token(token)).await.is_err() {
                    // Receiver dropped, stop streaming
                    return;
                }
            }
            SseData::Done => break,
            SseData::Skip => {
                tracing::trace!(event = %event.event, "Skipping SSE event without content");
            }
        }
    }

    let _ = tx
        .send(StreamingToken::Complete {
            message: full_response,
        })
        .await;
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn health_check(&self) -> bool {
        self.authorize(self.http_client.get(self.models_url()))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let body = Self::build_body(request, true);
        let response = self.post(&body).await?;
        tokio::spawn(forward_events(response.bytes_stream().eventsource(), tx));

        Ok(rx)
    }

    async fn send(&self, request: &ChatRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();
        let body = Self::build_body(request, false);
        let response = self.post(&body).await?;
        let data: serde_json::Value = response.json().await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();

        let tokens_used = data
            .pointer("/usage/completion_tokens")
            .and_then(serde_json::Value::as_u64)
            .and_then(|count| u32::try_from(count).ok());

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: u64::try_from(start.elapsed().as_millis()).ok(),
        })
    }
}
