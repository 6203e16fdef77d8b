//! Pure state containers.
//!
//! Both stores are plain owned structs with synchronous mutation methods:
//! no locks, no I/O of their own, no references to each other. The session
//! orchestrator is the only component that couples them to the transport
//! and to the remote API.

mod conversations;
mod messages;
mod optimistic;

pub use conversations::{ConversationStore, DEFAULT_SUGGESTED_ACTIONS};
pub use messages::{MessageStore, StreamingMessage};
pub use optimistic::run_optimistic;
