//! Turn Pipeline
//!
//! One request, start to finish: route the turn, invoke the chosen
//! specialist, normalize its output and push wire frames to the caller.
//!
//! # Lifecycle
//!
//! ```text
//! run(turn, tx)
//!   |
//!   +-- Router::select            (may wait on the classifier)
//!   +-- Specialist::invoke        (may wait on the backend)
//!   +-- for each raw chunk:       (waits on the specialist)
//!   |       StreamNormalizer::transform -> tx
//!   +-- StreamNormalizer::finish  -> tx  (stop event, [DONE])
//! ```
//!
//! Every wait also watches `tx`: once the receiver is gone the pipeline
//! returns [`TurnOutcome::Cancelled`] without sending anything else, and
//! dropping the specialist stream stops its upstream work. A specialist that
//! panics is treated like one that failed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::messages::Turn;
use crate::routing::{Router, RoutingDecision};
use crate::specialist::SpecialistRegistry;
use crate::streaming::{StreamNormalizer, WireFrame};

/// Inline message shown to the user when the specialist fails
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while answering. Please try again.";

/// Pipeline tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Frame buffer between the pipeline task and the caller
    pub channel_capacity: usize,
    /// Content of the error event sent when the specialist fails
    pub failure_message: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// How a turn ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The specialist finished and the stream was terminated normally
    Completed(RoutingDecision),
    /// The specialist failed; the user got the failure message
    SpecialistFailed {
        /// Who was asked
        decision: RoutingDecision,
        /// What went wrong
        error: String,
    },
    /// The caller went away
    Cancelled,
}

/// Router + specialist + normalizer, per request
pub struct TurnPipeline {
    router: Router,
    config: PipelineConfig,
}

impl TurnPipeline {
    /// Pipeline with default settings
    pub fn new(router: Router) -> Self {
        Self::with_config(router, PipelineConfig::default())
    }

    /// Pipeline with explicit settings
    pub fn with_config(router: Router, config: PipelineConfig) -> Self {
        Self { router, config }
    }

    /// The shared, read-only specialist registry
    #[must_use]
    pub fn registry(&self) -> &Arc<SpecialistRegistry> {
        self.router.registry()
    }

    /// The router
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Spawn the turn on the runtime and return its frame stream
    ///
    /// Dropping the receiver cancels the turn.
    pub fn start(self: &Arc<Self>, turn: Turn) -> mpsc::Receiver<WireFrame> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = pipeline.run(turn, tx).await;
            tracing::debug!(outcome = ?outcome, "Turn finished");
        });
        rx
    }

    /// Run one turn, sending frames to `tx` in order
    ///
    /// Never fails: routing problems degrade to the default specialist and
    /// specialist problems end the stream with the failure message.
    pub async fn run(&self, turn: Turn, tx: mpsc::Sender<WireFrame>) -> TurnOutcome {
        let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let span = tracing::info_span!("turn", stream_id = %stream_id);
        self.run_turn(turn, tx, stream_id).instrument(span).await
    }

    async fn run_turn(
        &self,
        turn: Turn,
        tx: mpsc::Sender<WireFrame>,
        stream_id: String,
    ) -> TurnOutcome {
        let decision = tokio::select! {
            biased;
            () = tx.closed() => return cancelled("routing"),
            decision = self.router.select(&turn) => decision,
        };

        let registry = self.registry();
        let specialist = Arc::clone(
            registry
                .get(&decision.specialist_name)
                .unwrap_or_else(|_| registry.default_specialist()),
        );
        let mut normalizer =
            StreamNormalizer::with_id(stream_id, chrono::Utc::now().timestamp(), specialist.name());
        let forwarded = turn.without_leading_system();

        let invoked = tokio::select! {
            biased;
            () = tx.closed() => return cancelled("invoke"),
            result = AssertUnwindSafe(specialist.invoke(&forwarded)).catch_unwind() => result,
        };
        let mut stream = match invoked {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(&mut normalizer, &tx, decision, &e).await,
            Err(panic) => {
                let e = panicked(specialist.name(), &*panic);
                return self.fail(&mut normalizer, &tx, decision, &e).await;
            }
        };

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                () = tx.closed() => return cancelled("streaming"),
                next = AssertUnwindSafe(stream.next()).catch_unwind() => next,
            };
            let next = match next {
                Ok(next) => next,
                Err(panic) => {
                    let e = panicked(specialist.name(), &*panic);
                    return self.fail(&mut normalizer, &tx, decision, &e).await;
                }
            };

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    chunks += 1;
                    for frame in normalizer.transform(&chunk) {
                        if tx.send(frame).await.is_err() {
                            return cancelled("streaming");
                        }
                    }
                }
                Some(Err(e)) => return self.fail(&mut normalizer, &tx, decision, &e).await,
            }
        }

        for frame in normalizer.finish() {
            if tx.send(frame).await.is_err() {
                return cancelled("finishing");
            }
        }

        tracing::info!(
            specialist = %decision.specialist_name,
            chunks,
            "Turn completed"
        );
        TurnOutcome::Completed(decision)
    }

    async fn fail(
        &self,
        normalizer: &mut StreamNormalizer,
        tx: &mpsc::Sender<WireFrame>,
        decision: RoutingDecision,
        error: &anyhow::Error,
    ) -> TurnOutcome {
        tracing::warn!(
            specialist = %decision.specialist_name,
            error = %error,
            "Specialist failed"
        );

        for frame in normalizer.fail(&self.config.failure_message) {
            if tx.send(frame).await.is_err() {
                return cancelled("failing");
            }
        }

        TurnOutcome::SpecialistFailed {
            decision,
            error: error.to_string(),
        }
    }
}

/// Error standing in for a specialist panic
fn panicked(specialist: &str, payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    anyhow::anyhow!("specialist {specialist} panicked: {message}")
}

fn cancelled(stage: &str) -> TurnOutcome {
    tracing::info!(stage, "Caller went away, cancelling turn");
    TurnOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.failure_message, DEFAULT_FAILURE_MESSAGE);
    }

    #[test]
    fn test_panicked_reads_payload() {
        let e = panicked("chat", &"boom");
        assert_eq!(e.to_string(), "specialist chat panicked: boom");

        let e = panicked("code", &String::from("index out of range"));
        assert_eq!(e.to_string(), "specialist code panicked: index out of range");

        let e = panicked("chat", &42u32);
        assert_eq!(e.to_string(), "specialist chat panicked: unknown panic");
    }
}
