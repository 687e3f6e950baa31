//! Turn Router
//!
//! Picks the specialist for a turn: heuristic first, classifier second, the
//! registry default last. Selection never fails; every problem on the way
//! (timeout, chatter, a name nobody registered) lands on the default.
//!
//! ```text
//! START -> HEURISTIC_CHECK -+-> DECIDED ----------------+
//!                           |                           |
//!                           +-> CLASSIFY -+-> DECIDED --+-> FORWARD
//!                                         |             |
//!                                         +-> DEFAULT --+
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::classifier::TurnClassifier;
use super::heuristic::ContinuationHeuristic;
use crate::backend::LlmBackend;
use crate::messages::Turn;
use crate::specialist::SpecialistRegistry;

// ============================================================================
// Configuration
// ============================================================================

/// Router tuning
#[derive(Clone, Debug, PartialEq)]
pub struct RouterConfig {
    /// Classifier model identifier
    pub model: String,
    /// Upper bound on the classifier call
    pub timeout: Duration,
    /// Phrases added to the built-in continuation list
    pub continuation_phrases: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            model: "qwen3:1.7b".to_string(),
            timeout: Duration::from_secs(30),
            continuation_phrases: Vec::new(),
        }
    }
}

// ============================================================================
// Decision
// ============================================================================

/// How a specialist was chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    /// Continuation phrase matched
    Heuristic,
    /// Classifier named a registered specialist
    Classifier,
    /// Nothing usable; registry default
    FallbackDefault,
}

impl RoutingMethod {
    /// Log/wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Classifier => "classifier",
            Self::FallbackDefault => "fallback_default",
        }
    }
}

impl std::fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing outcome for one turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Registered specialist name
    pub specialist_name: String,
    /// How it was chosen
    pub method: RoutingMethod,
}

impl RoutingDecision {
    fn new(specialist_name: impl Into<String>, method: RoutingMethod) -> Self {
        Self {
            specialist_name: specialist_name.into(),
            method,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Heuristic-first, classifier-fallback specialist selection
pub struct Router {
    registry: Arc<SpecialistRegistry>,
    heuristic: ContinuationHeuristic,
    classifier: TurnClassifier,
}

impl Router {
    /// Assemble a router from its parts
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        heuristic: ContinuationHeuristic,
        classifier: TurnClassifier,
    ) -> Self {
        Self {
            registry,
            heuristic,
            classifier,
        }
    }

    /// Build a router whose classifier runs on `backend`
    pub fn from_config(
        registry: Arc<SpecialistRegistry>,
        backend: Arc<dyn LlmBackend>,
        config: &RouterConfig,
    ) -> Self {
        Self::new(
            registry,
            ContinuationHeuristic::new(&config.continuation_phrases),
            TurnClassifier::new(backend, config.model.clone(), config.timeout),
        )
    }

    /// The registry decisions are validated against
    #[must_use]
    pub fn registry(&self) -> &Arc<SpecialistRegistry> {
        &self.registry
    }

    /// Choose the specialist for a turn
    ///
    /// Makes at most one classifier call and always returns a name present in
    /// the registry.
    pub async fn select(&self, turn: &Turn) -> RoutingDecision {
        let decision = self.decide(turn).await;
        self.log_decision(&decision);
        decision
    }

    async fn decide(&self, turn: &Turn) -> RoutingDecision {
        if let Some(name) = self.heuristic.decide(turn) {
            if self.registry.contains(&name) {
                return RoutingDecision::new(name, RoutingMethod::Heuristic);
            }
            tracing::debug!(
                specialist = %name,
                "Continuation names an unregistered specialist, classifying"
            );
        }

        match self.classifier.classify(turn, &self.registry).await {
            Ok(Some(name)) if self.registry.contains(&name) => {
                RoutingDecision::new(name, RoutingMethod::Classifier)
            }
            Ok(Some(name)) => {
                tracing::warn!(
                    specialist = %name,
                    default = %self.default_name(),
                    "Classifier named an unknown specialist, using default"
                );
                self.fallback()
            }
            Ok(None) => {
                tracing::warn!(
                    default = %self.default_name(),
                    "Classifier gave no usable answer, using default"
                );
                self.fallback()
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    default = %self.default_name(),
                    "Classifier failed, using default"
                );
                self.fallback()
            }
        }
    }

    fn default_name(&self) -> &str {
        self.registry.default_specialist().name()
    }

    fn fallback(&self) -> RoutingDecision {
        RoutingDecision::new(self.default_name(), RoutingMethod::FallbackDefault)
    }

    fn log_decision(&self, decision: &RoutingDecision) {
        let model_config = self
            .registry
            .get(&decision.specialist_name)
            .ok()
            .and_then(|specialist| specialist.model_summary())
            .map_or_else(|| "n/a".to_string(), |summary| summary.to_string());

        tracing::info!(
            chosen_specialist = %decision.specialist_name,
            method = %decision.method,
            model_config = %model_config,
            "Routed turn"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use crate::routing::test_utils::{registry, ScriptedBackend};
    use pretty_assertions::assert_eq;

    fn router(backend: Arc<ScriptedBackend>) -> Router {
        let registry = Arc::new(registry(&["chat", "vision", "code"]));
        let config = RouterConfig {
            timeout: Duration::from_millis(50),
            ..RouterConfig::default()
        };
        Router::from_config(registry, backend, &config)
    }

    fn fresh_turn() -> Turn {
        Turn::new(vec![Message::user("write a sorting function")])
    }

    #[tokio::test]
    async fn test_vision_follow_up_uses_heuristic() {
        let backend = Arc::new(ScriptedBackend::unreachable());
        let router = router(backend.clone());
        let turn = Turn::new(vec![
            Message::user("这张图是什么"),
            Message::assistant("一只猫").with_name("vision"),
            Message::user("继续分析这张图"),
        ]);

        let decision = router.select(&turn).await;
        assert_eq!(
            decision,
            RoutingDecision {
                specialist_name: "vision".to_string(),
                method: RoutingMethod::Heuristic,
            }
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_classifier_choice_is_used() {
        let backend = Arc::new(ScriptedBackend::answering("Call: code"));
        let router = router(backend.clone());
        let decision = router.select(&fresh_turn()).await;
        assert_eq!(decision.specialist_name, "code");
        assert_eq!(decision.method, RoutingMethod::Classifier);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_outputs_fall_back_to_default() {
        for output in ["", "code", "Call:", "Call:   ", "I'd say Call: code", "call me"] {
            let backend = Arc::new(ScriptedBackend::answering(output));
            let decision = router(backend).select(&fresh_turn()).await;
            assert_eq!(
                decision,
                RoutingDecision {
                    specialist_name: "chat".to_string(),
                    method: RoutingMethod::FallbackDefault,
                },
                "output {output:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_name_falls_back_to_default() {
        let backend = Arc::new(ScriptedBackend::answering("Call: planner"));
        let decision = router(backend).select(&fresh_turn()).await;
        assert_eq!(decision.specialist_name, "chat");
        assert_eq!(decision.method, RoutingMethod::FallbackDefault);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_default() {
        let backend = Arc::new(ScriptedBackend::stalling());
        let decision = router(backend).select(&fresh_turn()).await;
        assert_eq!(decision.method, RoutingMethod::FallbackDefault);
        assert_eq!(decision.specialist_name, "chat");
    }

    #[tokio::test]
    async fn test_backend_error_falls_back_to_default() {
        let backend = Arc::new(ScriptedBackend::failing("503"));
        let decision = router(backend).select(&fresh_turn()).await;
        assert_eq!(decision.method, RoutingMethod::FallbackDefault);
    }

    #[tokio::test]
    async fn test_unregistered_continuation_goes_to_classifier() {
        let backend = Arc::new(ScriptedBackend::answering("Call: vision"));
        let router = router(backend.clone());
        let turn = Turn::new(vec![
            Message::assistant("done").with_name("retired-agent"),
            Message::user("continue"),
        ]);

        let decision = router.select(&turn).await;
        assert_eq!(decision.specialist_name, "vision");
        assert_eq!(decision.method, RoutingMethod::Classifier);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(RoutingMethod::FallbackDefault.to_string(), "fallback_default");
        assert_eq!(
            serde_json::to_value(RoutingMethod::Heuristic).unwrap(),
            serde_json::json!("heuristic")
        );
    }
}
