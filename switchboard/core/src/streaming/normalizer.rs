//! Stream Normalizer
//!
//! Turns a specialist's raw, usually cumulative, output into strictly
//! incremental wire events.
//!
//! # Diffing
//!
//! ```text
//! raw text:   "H"   "He"   "Hello"   "Help"       (upstream resends it all)
//! stored:     "H"   "He"   "Hello"   "Help"
//! emitted:    "H"   "e"    "llo"     "Help"       (last one: not an extension)
//! ```
//!
//! Tool calls are diffed the same way, per call id, on the name and on the
//! arguments string. Arguments are compared as text, never parsed.
//!
//! One normalizer serves exactly one stream and is never shared.

use std::collections::HashMap;

use super::chunk::{normalize, ChunkRecord, ToolCallFragment};
use super::wire::{FinishReason, FunctionDelta, ToolCallDelta, WireDelta, WireEvent, WireFrame};
use crate::messages::Role;
use crate::specialist::RawChunk;

/// Role announced on the first event of a stream
const ASSISTANT_ROLE: &str = "assistant";

// ============================================================================
// Stream State
// ============================================================================

/// What has already been sent for one tool call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCallState {
    /// Name as sent so far
    pub name_sent: String,
    /// Arguments as sent so far
    pub arguments_sent: String,
    /// Position in the wire tool-call array
    pub ordinal: usize,
}

/// Per-stream tool call bookkeeping
///
/// Ordinals are handed out in first-seen order and never change or repeat.
#[derive(Clone, Debug, Default)]
pub struct ToolCallTracker {
    calls: HashMap<String, ToolCallState>,
    next_ordinal: usize,
}

impl ToolCallTracker {
    /// State for a call id, if seen
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolCallState> {
        self.calls.get(id)
    }

    /// Number of distinct calls seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call was seen yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Record the current name/arguments of a call and return what is unsent
    ///
    /// A call seen for the first time always yields a delta, so its id and
    /// ordinal reach the client even before any arguments do.
    pub fn diff(&mut self, id: &str, name: &str, arguments: &str) -> Option<ToolCallDelta> {
        let is_new = !self.calls.contains_key(id);
        let ordinal = self.next_ordinal;
        let state = self
            .calls
            .entry(id.to_string())
            .or_insert_with(|| ToolCallState {
                ordinal,
                ..ToolCallState::default()
            });
        if is_new {
            self.next_ordinal += 1;
        }

        let name = unsent_suffix(&mut state.name_sent, name, id, "name");
        let arguments = unsent_suffix(&mut state.arguments_sent, arguments, id, "arguments");
        if !is_new && name.is_none() && arguments.is_none() {
            return None;
        }

        let function = FunctionDelta {
            name_resent: name.as_ref().is_some_and(|u| u.resent),
            arguments_resent: arguments.as_ref().is_some_and(|u| u.resent),
            name: name.map(|u| u.text),
            arguments: arguments.map(|u| u.text),
        };
        Some(ToolCallDelta::function(state.ordinal, id, function))
    }
}

/// Text still to send for one cumulative value
#[derive(Debug, PartialEq, Eq)]
struct Unsent {
    text: String,
    /// Replaces what was sent instead of extending it
    resent: bool,
}

impl Unsent {
    fn suffix(text: &str) -> Self {
        Self {
            text: text.to_string(),
            resent: false,
        }
    }

    fn whole(text: &str) -> Self {
        Self {
            text: text.to_string(),
            resent: true,
        }
    }
}

/// Part of `current` not yet covered by `sent`; updates `sent`
///
/// A value that does not extend what was sent replaces it and is resent whole.
fn unsent_suffix(sent: &mut String, current: &str, id: &str, field: &str) -> Option<Unsent> {
    if let Some(suffix) = current.strip_prefix(sent.as_str()) {
        if suffix.is_empty() {
            return None;
        }
        let unsent = Unsent::suffix(suffix);
        *sent = current.to_string();
        return Some(unsent);
    }

    tracing::warn!(
        tool_call_id = %id,
        field,
        sent_len = sent.len(),
        new_len = current.len(),
        "Tool call value is not an extension of what was sent, resending"
    );
    *sent = current.to_string();
    (!current.is_empty()).then(|| Unsent::whole(current))
}

/// Mutable state of one stream
#[derive(Clone, Debug, Default)]
pub struct StreamState {
    /// Full assistant text so far
    pub accumulated_text: String,
    /// Whether the role marker went out
    pub role_emitted: bool,
    /// Tool call progress by id
    pub tool_calls: ToolCallTracker,
}

// ============================================================================
// Normalizer
// ============================================================================

/// Raw chunk to wire event transformer for a single stream
#[derive(Debug)]
pub struct StreamNormalizer {
    stream_id: String,
    created: i64,
    model: String,
    next_index: u64,
    state: StreamState,
    finished: bool,
}

impl StreamNormalizer {
    /// Normalizer for a new stream with a fresh id
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_id(
            format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            chrono::Utc::now().timestamp(),
            model,
        )
    }

    /// Normalizer with a caller-chosen id and creation time
    pub fn with_id(stream_id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            created,
            model: model.into(),
            next_index: 0,
            state: StreamState::default(),
            finished: false,
        }
    }

    /// Stream identifier carried by every event
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Current stream state
    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Whether the terminal frames were produced
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wire events for one raw chunk, in order
    ///
    /// Records that cannot be coerced are logged and skipped. Only the last
    /// assistant text in a chunk is diffed: list chunks repeat earlier
    /// messages, and the newest one is the one still growing.
    pub fn transform(&mut self, chunk: &RawChunk) -> Vec<WireFrame> {
        if self.finished {
            tracing::warn!(
                stream_id = %self.stream_id,
                chunk_kind = chunk.kind(),
                "Chunk after stream finished, ignoring"
            );
            return Vec::new();
        }

        let records: Vec<ChunkRecord> = normalize(chunk)
            .into_iter()
            .enumerate()
            .filter_map(|(position, result)| {
                result
                    .map_err(|e| {
                        tracing::warn!(
                            stream_id = %self.stream_id,
                            chunk_kind = chunk.kind(),
                            record = position,
                            error = %e,
                            "Dropping malformed record"
                        );
                    })
                    .ok()
            })
            .collect();

        let text_at = records.iter().rposition(|record| {
            record.role == Role::Assistant && record.text.as_deref().is_some_and(|t| !t.is_empty())
        });

        let mut frames = Vec::new();
        let mut pending_calls = Vec::new();

        for (position, record) in records.into_iter().enumerate() {
            match record.role {
                Role::Assistant => {
                    if Some(position) == text_at {
                        if let Some(unsent) = record.text.as_deref().and_then(|t| self.diff_text(t)) {
                            self.flush_tool_calls(&mut pending_calls, &mut frames);
                            let delta = WireDelta {
                                content: Some(unsent.text),
                                content_resent: unsent.resent,
                                ..WireDelta::default()
                            };
                            frames.push(self.event(delta, None));
                        }
                    }
                    for call in &record.tool_calls {
                        if let Some(delta) = self.diff_tool_call(call) {
                            pending_calls.push(delta);
                        }
                    }
                }
                Role::Function => {
                    tracing::debug!(
                        stream_id = %self.stream_id,
                        text_len = record.text.as_deref().map_or(0, str::len),
                        "Tool result consumed, not forwarded"
                    );
                }
                Role::User | Role::System => {
                    tracing::debug!(
                        stream_id = %self.stream_id,
                        role = %record.role,
                        "Ignoring non-assistant record"
                    );
                }
            }
        }
        self.flush_tool_calls(&mut pending_calls, &mut frames);

        tracing::trace!(
            stream_id = %self.stream_id,
            chunk_kind = chunk.kind(),
            frames = frames.len(),
            "Chunk transformed"
        );
        frames
    }

    /// Terminal frames: a `finish_reason=stop` event, then `[DONE]`
    ///
    /// Produced once; later calls return nothing.
    pub fn finish(&mut self) -> Vec<WireFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![
            self.event(WireDelta::default(), Some(FinishReason::Stop)),
            WireFrame::Done,
        ]
    }

    /// Terminal frames after a specialist failure
    ///
    /// The message goes out as content on the stop event, so the stream still
    /// ends with exactly one stop event and `[DONE]`.
    pub fn fail(&mut self, message: &str) -> Vec<WireFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let delta = WireDelta {
            content: Some(message.to_string()),
            ..WireDelta::default()
        };
        vec![
            self.event(delta, Some(FinishReason::Stop)),
            WireFrame::Done,
        ]
    }

    fn diff_text(&mut self, text: &str) -> Option<Unsent> {
        let stored = &mut self.state.accumulated_text;
        if let Some(suffix) = text.strip_prefix(stored.as_str()) {
            if suffix.is_empty() {
                return None;
            }
            let unsent = Unsent::suffix(suffix);
            *stored = text.to_string();
            return Some(unsent);
        }

        tracing::warn!(
            stream_id = %self.stream_id,
            stored_len = stored.len(),
            new_len = text.len(),
            "Cumulative text is not an extension of what was sent, resending in full"
        );
        *stored = text.to_string();
        Some(Unsent::whole(text))
    }

    fn diff_tool_call(&mut self, call: &ToolCallFragment) -> Option<ToolCallDelta> {
        // Position-based ids collide if two id-less calls swap places
        let id = call
            .id
            .clone()
            .unwrap_or_else(|| format!("call_{}", call.position));
        self.state
            .tool_calls
            .diff(&id, &call.name, &call.arguments)
    }

    fn flush_tool_calls(&mut self, pending: &mut Vec<ToolCallDelta>, frames: &mut Vec<WireFrame>) {
        if pending.is_empty() {
            return;
        }
        let delta = WireDelta {
            tool_calls: Some(std::mem::take(pending)),
            ..WireDelta::default()
        };
        frames.push(self.event(delta, None));
    }

    fn event(&mut self, mut delta: WireDelta, finish_reason: Option<FinishReason>) -> WireFrame {
        if !self.state.role_emitted {
            delta.role = Some(ASSISTANT_ROLE.to_string());
            self.state.role_emitted = true;
        }
        let index = self.next_index;
        self.next_index += 1;

        WireFrame::Event(WireEvent::new(
            self.stream_id.clone(),
            self.created,
            self.model.clone(),
            index,
            delta,
            finish_reason,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn normalizer() -> StreamNormalizer {
        StreamNormalizer::with_id("chatcmpl-test", 1_700_000_000, "chat")
    }

    fn events(frames: &[WireFrame]) -> Vec<&WireEvent> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                WireFrame::Event(event) => Some(event),
                WireFrame::Done => None,
            })
            .collect()
    }

    fn contents(frames: &[WireFrame]) -> Vec<String> {
        events(frames)
            .iter()
            .filter_map(|event| event.delta().and_then(|d| d.content.clone()))
            .collect()
    }

    fn run(normalizer: &mut StreamNormalizer, chunks: &[RawChunk]) -> Vec<WireFrame> {
        let mut frames: Vec<WireFrame> = chunks
            .iter()
            .flat_map(|chunk| normalizer.transform(chunk))
            .collect();
        frames.extend(normalizer.finish());
        frames
    }

    #[test]
    fn test_cumulative_strings_become_deltas() {
        let mut normalizer = normalizer();
        let frames = run(
            &mut normalizer,
            &["H".into(), "He".into(), "Hello".into()],
        );
        let deltas = contents(&frames);
        assert_eq!(deltas, vec!["H", "e", "llo"]);
        assert_eq!(deltas.concat(), "Hello");
        assert_eq!(normalizer.state().accumulated_text, "Hello");
    }

    #[test]
    fn test_repeated_chunk_emits_nothing() {
        let mut normalizer = normalizer();
        assert_eq!(normalizer.transform(&"Hi".into()).len(), 1);
        assert!(normalizer.transform(&"Hi".into()).is_empty());
    }

    #[test]
    fn test_divergent_text_is_resent_whole() {
        let mut normalizer = normalizer();
        let frames = run(
            &mut normalizer,
            &["Hello".into(), "Help".into(), "Help me".into()],
        );
        assert_eq!(contents(&frames), vec!["Hello", "Help", " me"]);

        let resent: Vec<bool> = events(&frames)
            .iter()
            .filter_map(|event| event.delta().filter(|d| d.content.is_some()))
            .map(|delta| delta.content_resent)
            .collect();
        assert_eq!(resent, vec![false, true, false]);
    }

    #[test]
    fn test_tool_call_arguments_are_diffed() {
        let mut normalizer = normalizer();
        let call = |arguments: &str| {
            RawChunk::from(json!({
                "role": "assistant",
                "content": "",
                "function_call": {"name": "lookup", "arguments": arguments},
                "extra": {"function_id": "fn-1"}
            }))
        };

        let first = normalizer.transform(&call("{\"a\":1"));
        let second = normalizer.transform(&call("{\"a\":1,\"b\":2}"));

        let first_calls = events(&first)[0].delta().unwrap().tool_calls.clone().unwrap();
        assert_eq!(first_calls[0].function.name.as_deref(), Some("lookup"));
        assert_eq!(first_calls[0].function.arguments.as_deref(), Some("{\"a\":1"));
        assert_eq!(first_calls[0].id, "fn-1");
        assert_eq!(first_calls[0].index, 0);

        let second_calls = events(&second)[0].delta().unwrap().tool_calls.clone().unwrap();
        assert_eq!(second_calls[0].function.arguments.as_deref(), Some(",\"b\":2}"));
        assert_eq!(second_calls[0].function.name, None);
        assert_eq!(second_calls[0].index, 0);
        assert!(!second_calls[0].function.arguments_resent);

        let third = normalizer.transform(&call("{\"a\":2}"));
        let third_calls = events(&third)[0].delta().unwrap().tool_calls.clone().unwrap();
        assert_eq!(third_calls[0].function.arguments.as_deref(), Some("{\"a\":2}"));
        assert!(third_calls[0].function.arguments_resent);
        assert!(!third_calls[0].function.name_resent);
    }

    #[test]
    fn test_role_is_on_first_event_only() {
        let mut normalizer = normalizer();
        let frames = run(
            &mut normalizer,
            &[
                "a".into(),
                RawChunk::from(json!({"role": "assistant", "tool_calls": [
                    {"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
                ]})),
                "ab".into(),
            ],
        );
        let roles: Vec<Option<String>> = events(&frames)
            .iter()
            .map(|event| event.delta().unwrap().role.clone())
            .collect();
        assert_eq!(roles[0].as_deref(), Some("assistant"));
        assert!(roles[1..].iter().all(Option::is_none));
        assert_eq!(roles.len(), 4);
    }

    #[test]
    fn test_empty_stream_still_finishes_with_role() {
        let mut normalizer = normalizer();
        let frames = normalizer.finish();
        assert_eq!(frames.len(), 2);
        let stop = events(&frames)[0];
        assert_eq!(stop.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(stop.delta().unwrap().role.as_deref(), Some("assistant"));
        assert_eq!(frames[1], WireFrame::Done);
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn test_malformed_chunks_are_skipped() {
        let mut normalizer = normalizer();
        let frames = run(
            &mut normalizer,
            &[
                "Hi".into(),
                RawChunk::from(json!({"foo": "bar"})),
                RawChunk::Other(json!(42)),
                RawChunk::from(json!({"role": "assistant", "content": 3.5})),
                "Hi there".into(),
            ],
        );
        assert_eq!(contents(&frames), vec!["Hi", " there"]);
        let indexes: Vec<u64> = events(&frames).iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_exactly_one_stop_then_done() {
        let mut normalizer = normalizer();
        let frames = run(&mut normalizer, &["x".into(), "xy".into()]);
        let stops = events(&frames)
            .iter()
            .filter(|event| event.finish_reason().is_some())
            .count();
        assert_eq!(stops, 1);
        assert_eq!(frames.last(), Some(&WireFrame::Done));
        assert!(matches!(
            &frames[frames.len() - 2],
            WireFrame::Event(event) if event.finish_reason() == Some(FinishReason::Stop)
        ));
        assert!(normalizer.transform(&"xyz".into()).is_empty());
    }

    #[test]
    fn test_tool_results_are_not_forwarded() {
        let mut normalizer = normalizer();
        let frames = normalizer.transform(&RawChunk::from(json!({
            "role": "function",
            "name": "weather",
            "content": "{\"temp\": 21}"
        })));
        assert!(frames.is_empty());
        assert!(!normalizer.state().role_emitted);
    }

    #[test]
    fn test_cumulative_message_lists() {
        let mut normalizer = normalizer();
        let call = json!({
            "role": "assistant",
            "content": "",
            "function_call": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}
        });
        let result = json!({"role": "function", "name": "weather", "content": "21C"});

        let chunks = vec![
            RawChunk::Messages(vec![json!({"role": "assistant", "content": "Let me check"})]),
            RawChunk::Messages(vec![
                json!({"role": "assistant", "content": "Let me check."}),
                call.clone(),
            ]),
            RawChunk::Messages(vec![
                json!({"role": "assistant", "content": "Let me check."}),
                call.clone(),
                result.clone(),
                json!({"role": "assistant", "content": "It is 21C"}),
            ]),
            RawChunk::Messages(vec![
                json!({"role": "assistant", "content": "Let me check."}),
                call,
                result,
                json!({"role": "assistant", "content": "It is 21C in Paris."}),
            ]),
        ];
        let frames = run(&mut normalizer, &chunks);
        let events = events(&frames);

        assert_eq!(events[0].delta().unwrap().content.as_deref(), Some("Let me check"));
        assert_eq!(events[1].delta().unwrap().content.as_deref(), Some("."));
        let calls = events[2].delta().unwrap().tool_calls.clone().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].function.arguments.as_deref(), Some("{\"city\":\"Paris\"}"));
        assert_eq!(events[3].delta().unwrap().content.as_deref(), Some("It is 21C"));
        assert_eq!(events[4].delta().unwrap().content.as_deref(), Some(" in Paris."));
        assert_eq!(events[5].finish_reason(), Some(FinishReason::Stop));
        assert_eq!(events.len(), 6);
        assert_eq!(normalizer.state().tool_calls.len(), 1);
    }

    #[test]
    fn test_ordinals_are_stable_and_increasing() {
        let mut tracker = ToolCallTracker::default();
        let a = tracker.diff("a", "first", "").unwrap();
        let b = tracker.diff("b", "second", "{").unwrap();
        let a_again = tracker.diff("a", "first", "{\"x\"").unwrap();
        assert_eq!((a.index, b.index, a_again.index), (0, 1, 0));
        assert!(tracker.diff("b", "second", "{").is_none());
        assert_eq!(tracker.get("b").unwrap().arguments_sent, "{");
    }

    #[test]
    fn test_fail_emits_message_then_done() {
        let mut normalizer = normalizer();
        let mut frames = normalizer.transform(&"partial".into());
        frames.extend(normalizer.fail("Sorry, something went wrong."));
        let events = events(&frames);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].delta().unwrap().content.as_deref(),
            Some("Sorry, something went wrong.")
        );
        assert_eq!(events[1].finish_reason(), Some(FinishReason::Stop));
        assert_eq!(frames.last(), Some(&WireFrame::Done));
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn test_events_share_stream_identity() {
        let mut normalizer = normalizer();
        let frames = run(&mut normalizer, &["a".into()]);
        for event in events(&frames) {
            assert_eq!(event.id, "chatcmpl-test");
            assert_eq!(event.model, "chat");
            assert_eq!(event.created, 1_700_000_000);
        }
        assert!(StreamNormalizer::new("chat").stream_id().starts_with("chatcmpl-"));
    }
}
