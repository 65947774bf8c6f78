//! Per-chat message handling on top of a configured back-end.

mod orchestrator;

pub use orchestrator::{HandleOutcome, Orchestrator, NEW_CONVERSATION_REPLY};
