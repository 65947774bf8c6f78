//! Per-chat conversation sessions and the registry that owns them.

mod registry;
mod session;

pub use registry::{SessionRegistry, SlotState};
pub use session::{ChatSession, ProviderKind, SessionHandle, SessionState, Turn, TurnRole};
