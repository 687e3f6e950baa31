//! Specialist Routing
//!
//! Decides, once per turn, which specialist answers it.
//!
//! # Architecture
//!
//! ```text
//! +------------------------+
//! |         Router         |  <-- select(turn) -> RoutingDecision
//! +-----------+------------+
//!             |
//!     +-------+--------+
//!     |                |
//!     v                v
//! +----------+   +------------+
//! |Heuristic |   | Classifier |  <-- one LLM call, `Call: <name>`
//! +----------+   +------+-----+
//!                       |
//!                       v
//!              +------------------+
//!              |SpecialistRegistry|  <-- validation + default
//!              +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Cheap first**: follow-ups skip the LLM entirely
//! 2. **One attempt**: at most one classifier call, no retry loop
//! 3. **Never fails**: every failure path degrades to the default specialist

pub mod classifier;
pub mod heuristic;
pub mod router;

#[cfg(test)]
pub mod test_utils;

pub use classifier::{parse_call_line, ClassifyError, TurnClassifier};
pub use heuristic::{ContinuationHeuristic, DEFAULT_CONTINUATION_PHRASES};
pub use router::{Router, RouterConfig, RoutingDecision, RoutingMethod};
