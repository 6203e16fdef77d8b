//! formcoach client core.
//!
//! The streaming chat session engine behind the formcoach fitness client:
//! a state-machine orchestrator coordinating a WebSocket transport, a pure
//! message store, and a conversation store over a remote REST backend.
//! Rendering, navigation, and everything else presentational consumes this
//! crate's surface and lives elsewhere.
//!
//! Quick tour:
//! - [`session::ChatSession`] — send/cancel/connect, the phase machine.
//! - [`transport::Transport`] / [`transport::WsTransport`] — the duplex
//!   streaming connection with reconnect.
//! - [`store::MessageStore`] / [`store::ConversationStore`] — pure state.
//! - [`api::CoachApi`] / [`api::HttpApi`] — remote CRUD contract.
//! - [`cache`] — persisted local snapshot.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod transport;

pub use config::ChatConfig;
pub use error::{ApiError, ChatError, Notice, TransportError};
pub use session::{ChatSession, GREETING, SessionPhase};

// Re-export the protocol crate: consumers of the core almost always need
// the canonical types too.
pub use formcoach_protocol as protocol;
