//! Agent core: the conversation loop between the model and the tools.
//!
//! Submodules:
//! - `orchestrator`: the per-run state machine, duplicate-call detection,
//!   and the async driver that runs it

pub mod orchestrator;

// Re-exports for convenience
pub use orchestrator::{
    call_key, canonical_json, run_turn, tool_definitions, DedupSet, Effect, Event, Note, Turn,
    TurnOutcome, TurnSettings,
};
