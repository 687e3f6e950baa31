//! Test doubles shared by the routing tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::backend::{ChatRequest, LlmBackend, LlmResponse, StreamingToken};
use crate::messages::Turn;
use crate::specialist::{ModelSummary, RawChunkStream, Specialist, SpecialistRegistry};

/// Specialist that only has a name
pub struct NamedSpecialist {
    name: String,
    description: String,
}

#[async_trait]
impl Specialist for NamedSpecialist {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn model_summary(&self) -> Option<ModelSummary> {
        Some(ModelSummary {
            model: format!("{}-model", self.name),
            endpoint: "mem://test".to_string(),
            temperature: 0.5,
        })
    }

    async fn invoke(&self, _turn: &Turn) -> anyhow::Result<RawChunkStream> {
        Ok(futures::stream::empty().boxed())
    }
}

/// Registry of named specialists; descriptions are `"<name> specialist"`
pub fn registry(names: &[&str]) -> SpecialistRegistry {
    SpecialistRegistry::new(
        names
            .iter()
            .map(|name| {
                Arc::new(NamedSpecialist {
                    name: (*name).to_string(),
                    description: format!("{name} specialist"),
                }) as Arc<dyn Specialist>
            })
            .collect(),
    )
    .unwrap()
}

enum Behavior {
    Answer(String),
    Fail(String),
    Stall,
    Panic,
}

/// Classifier backend with a fixed behavior and a call counter
pub struct ScriptedBackend {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers `content`
    pub fn answering(content: &str) -> Self {
        Self::with(Behavior::Answer(content.to_string()))
    }

    /// Always fails with `message`
    pub fn failing(message: &str) -> Self {
        Self::with(Behavior::Fail(message.to_string()))
    }

    /// Never answers
    pub fn stalling() -> Self {
        Self::with(Behavior::Stall)
    }

    /// Panics if called at all
    pub fn unreachable() -> Self {
        Self::with(Behavior::Panic)
    }

    /// Number of `send` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn endpoint(&self) -> String {
        "mem://scripted".to_string()
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        _request: &ChatRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        anyhow::bail!("classifier backends do not stream")
    }

    async fn send(&self, request: &ChatRequest) -> anyhow::Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Answer(content) => Ok(LlmResponse {
                content: content.clone(),
                model: request.model.clone(),
                tokens_used: None,
                duration_ms: Some(1),
            }),
            Behavior::Fail(message) => Err(anyhow::anyhow!(message.clone())),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                anyhow::bail!("stalled")
            }
            Behavior::Panic => panic!("classifier must not be called"),
        }
    }
}
