//! Continuation Heuristic
//!
//! Cheap text check that keeps a follow-up turn with the specialist that
//! answered last, without a classifier round-trip. Pure: no I/O, no state.
//!
//! # Algorithm
//!
//! ```text
//! newest -> oldest: last assistant `name`        -> last_specialist
//! newest -> oldest: last non-empty user text    -> user_text
//! user_text contains a continuation phrase?      -> Some(last_specialist)
//! ```

use crate::messages::{Role, Turn};

/// Built-in continuation phrases, matched as case-insensitive substrings
pub const DEFAULT_CONTINUATION_PHRASES: &[&str] = &[
    "继续",
    "接着",
    "再来一个",
    "再来一张",
    "再画一个",
    "再生成一张",
    "这张图",
    "这个图",
    "这张图片",
    "这个图片",
    "这个文档",
    "继续翻译",
    "接着翻译",
    "按刚才的来",
    "continue",
    "keep going",
    "go on",
    "again",
    "one more",
    "this image",
    "this picture",
    "this document",
    "same as before",
];

/// Decides whether the previous specialist should keep the conversation
#[derive(Clone, Debug)]
pub struct ContinuationHeuristic {
    /// Lowercased phrases
    phrases: Vec<String>,
}

impl Default for ContinuationHeuristic {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl ContinuationHeuristic {
    /// Built-in phrases plus `extra`
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases: Vec<String> = DEFAULT_CONTINUATION_PHRASES
            .iter()
            .map(|phrase| phrase.to_lowercase())
            .collect();
        for phrase in extra {
            let phrase = phrase.as_ref().trim().to_lowercase();
            if !phrase.is_empty() && !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
        Self { phrases }
    }

    /// Phrases in match order
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Name of the specialist to continue with, or `None` to decline
    #[must_use]
    pub fn decide(&self, turn: &Turn) -> Option<String> {
        let messages = turn.messages();

        let last_specialist = messages
            .iter()
            .rev()
            .filter(|message| message.role == Role::Assistant)
            .find_map(|message| message.name.as_deref().filter(|name| !name.trim().is_empty()))?;

        let user_text = messages
            .iter()
            .rev()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.flatten_text())
            .find(|text| !text.is_empty())?;

        let lowered = user_text.to_lowercase();
        let phrase = self
            .phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))?;

        tracing::debug!(
            specialist = %last_specialist,
            phrase = %phrase,
            "Continuation phrase matched"
        );
        Some(last_specialist.to_string())
    }
}
