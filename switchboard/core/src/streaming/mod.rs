//! Stream Normalization
//!
//! Adapts whatever the selected specialist emits into the outbound wire
//! protocol.
//!
//! # Architecture
//!
//! ```text
//!  specialist output (cumulative, mixed shapes)
//!          |
//!          v
//! +-------------------+
//! |  chunk::normalize |  <-- RawChunk -> [ChunkRecord], bad records dropped
//! +---------+---------+
//!           |
//!           v
//! +-------------------+
//! | StreamNormalizer  |  <-- text / tool-call diffing, role once
//! |   (StreamState)   |
//! +---------+---------+
//!           |
//!           v
//!   WireFrame::Event ... WireFrame::Event(stop), WireFrame::Done
//! ```
//!
//! # Example
//!
//! ```ignore
//! use switchboard_core::streaming::StreamNormalizer;
//!
//! let mut normalizer = StreamNormalizer::new("chat");
//! for chunk in ["H", "He", "Hello"] {
//!     for frame in normalizer.transform(&chunk.into()) {
//!         print!("{}", frame.encode()?);
//!     }
//! }
//! for frame in normalizer.finish() {
//!     print!("{}", frame.encode()?);
//! }
//! ```

pub mod chunk;
mod normalizer;
pub mod wire;

pub use chunk::{ChunkRecord, NormalizeError, ToolCallFragment};
pub use normalizer::{StreamNormalizer, StreamState, ToolCallState, ToolCallTracker};
pub use wire::{
    FinishReason, FunctionDelta, ToolCallDelta, WireChoice, WireDelta, WireEvent, WireFrame,
    CHUNK_OBJECT, DONE_SENTINEL,
};
