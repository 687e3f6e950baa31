//! Switchboard Core - Turn Routing and Stream Normalization
//!
//! This crate decides which specialist answers a conversation turn and turns
//! whatever that specialist emits into one clean, incremental, OpenAI-style
//! stream. It has no HTTP dependencies; the daemon crate puts a server in
//! front of it.
//!
//! # Architecture
//!
//! ```text
//!                 Turn (ordered messages)
//!                          │
//! ┌────────────────────────┼────────────────────────────────────┐
//! │                  TurnPipeline                                │
//! │                        │                                     │
//! │   ┌────────────────────┴─────────────────────┐               │
//! │   │                Router                    │               │
//! │   │  ┌──────────────┐    ┌────────────────┐  │               │
//! │   │  │ Continuation │ -> │ TurnClassifier │  │ -> default    │
//! │   │  │  Heuristic   │    │     (LLM)      │  │    fallback   │
//! │   │  └──────────────┘    └────────────────┘  │               │
//! │   └────────────────────┬─────────────────────┘               │
//! │                        │ RoutingDecision                     │
//! │   ┌────────────────────┴─────────────────────┐               │
//! │   │  SpecialistRegistry -> Specialist        │               │
//! │   └────────────────────┬─────────────────────┘               │
//! │                        │ RawChunk stream (cumulative)        │
//! │   ┌────────────────────┴─────────────────────┐               │
//! │   │  StreamNormalizer (diffing, role once)   │               │
//! │   └────────────────────┬─────────────────────┘               │
//! └────────────────────────┼────────────────────────────────────┘
//!                          │
//!          WireFrame ... stop event, [DONE]
//! ```
//!
//! # Key Types
//!
//! - [`TurnPipeline`]: One request from routing to the `[DONE]` frame
//! - [`Router`]: Heuristic, then classifier, then default specialist
//! - [`SpecialistRegistry`]: Ordered, immutable specialist set
//! - [`StreamNormalizer`]: Cumulative chunks in, true deltas out
//! - [`SwitchboardConfig`]: File, environment and CLI configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchboard_core::{
//!     backend::OpenAiBackend, load_config, LlmSpecialist, Message, Router,
//!     SpecialistRegistry, Turn, TurnPipeline,
//! };
//!
//! let config = load_config()?;
//! let backend = Arc::new(OpenAiBackend::new(
//!     &config.backend.base_url,
//!     &config.backend.api_key,
//!     config.backend.request_timeout,
//! )?);
//! let specialists = config
//!     .specialists
//!     .iter()
//!     .map(|c| Arc::new(LlmSpecialist::new(c.clone(), backend.clone())) as _)
//!     .collect();
//! let registry = Arc::new(SpecialistRegistry::new(specialists)?);
//! let router = Router::from_config(registry, backend, &config.router);
//! let pipeline = Arc::new(TurnPipeline::with_config(router, config.pipeline()));
//!
//! let mut frames = pipeline.start(Turn::new(vec![Message::user("Hello!")]));
//! while let Some(frame) = frames.recv().await {
//!     print!("{}", frame.encode()?);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Roles, content parts, messages and turns
//! - [`specialist`]: The specialist trait, raw chunks and the registry
//! - [`routing`]: Continuation heuristic, LLM classifier and router
//! - [`streaming`]: Chunk coercion, delta computation and wire events
//! - [`pipeline`]: Per-request orchestration and cancellation
//! - [`backend`]: OpenAI-compatible chat-model client
//! - [`config`]: TOML configuration with env and CLI overrides

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod messages;
pub mod pipeline;
pub mod routing;
pub mod specialist;
pub mod streaming;

// Re-exports for convenience
pub use backend::{ChatMessage, ChatRequest, LlmBackend, LlmResponse, OpenAiBackend};
pub use config::{
    load_config, load_config_from_path, ConfigError, ConfigOverrides, ConfigSource,
    SwitchboardConfig,
};
pub use messages::{Content, ContentPart, Message, Role, Turn};
pub use pipeline::{PipelineConfig, TurnOutcome, TurnPipeline};
pub use routing::{Router, RouterConfig, RoutingDecision, RoutingMethod};
pub use specialist::{
    LlmSpecialist, LlmSpecialistConfig, RawChunk, RawChunkStream, RegistryError, Specialist,
    SpecialistRegistry,
};
pub use streaming::{StreamNormalizer, WireEvent, WireFrame};
