//! Canonical types for the formcoach chat client.
//!
//! Everything that crosses a boundary lives here: the persisted data model
//! (conversations and messages) and the wire frames exchanged with the chat
//! backend over the streaming connection. The client core and any future
//! consumer (UI layers, test harnesses) share these definitions so there is
//! exactly one source of truth for shapes.

pub mod frames;
pub mod messages;

pub use frames::{CancelReason, ClientFrame, ServerFrame};
pub use messages::{
    Conversation, ConversationKind, ConversationStatus, FALLBACK_TITLE, Message, Sender,
    TITLE_MAX_CHARS, derive_title,
};
