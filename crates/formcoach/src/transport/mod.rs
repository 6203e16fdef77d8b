//! Streaming transport abstraction.
//!
//! The session orchestrator talks to the chat backend through the
//! [`Transport`] trait and consumes everything the backend produces from a
//! single typed event channel. Each successful `connect` hands out a fresh
//! receiver and implicitly retires the previous one, so there is no
//! subscribe/unsubscribe bookkeeping to get wrong.

mod ws;

pub use ws::WsTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use formcoach_protocol::{ClientFrame, ServerFrame};

/// Size of the event channel handed to the orchestrator.
pub(crate) const EVENT_BUFFER_SIZE: usize = 256;

/// Size of the outbound frame buffer.
pub(crate) const OUTBOUND_BUFFER_SIZE: usize = 64;

/// Lifecycle state of the logical streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Everything the transport can tell the orchestrator, as one tagged union.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One fragment of the streaming response.
    Content { chunk: String },

    /// Human-readable progress text.
    Status { text: String },

    /// The streaming response finished.
    Complete,

    /// The backend deliberately cut the response off.
    Terminated { reason: String },

    /// The stream failed.
    Error { message: String },

    /// The connection changed lifecycle state.
    StateChanged(ConnectionState),
}

impl From<ServerFrame> for TransportEvent {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::Content { chunk } => Self::Content { chunk },
            ServerFrame::Status { text } => Self::Status { text },
            ServerFrame::Complete => Self::Complete,
            ServerFrame::Terminated { reason } => Self::Terminated { reason },
            ServerFrame::Error { message } => Self::Error { message },
        }
    }
}

/// A single logical duplex streaming connection to the chat backend.
///
/// Implementations own reconnection and framing. At most one target is
/// connected at a time; connecting to a new target tears the previous
/// connection down first.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection for the given conversation target.
    ///
    /// Returns the event receiver for this logical connection. Fails with
    /// [`TransportError::Timeout`] if the connection does not open within
    /// the configured window.
    async fn connect(&self, target: &str) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Send a frame to the backend.
    ///
    /// Fails immediately with [`TransportError::NotConnected`] when invoked
    /// while disconnected; this is a caller contract violation, never
    /// retried here.
    async fn send(&self, frame: ClientFrame) -> Result<(), TransportError>;

    /// Close the connection. Idempotent; always succeeds.
    async fn disconnect(&self);

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_event_from_server_frame() {
        let ev = TransportEvent::from(ServerFrame::Content {
            chunk: "rep ".to_string(),
        });
        assert_eq!(
            ev,
            TransportEvent::Content {
                chunk: "rep ".to_string()
            }
        );

        let ev = TransportEvent::from(ServerFrame::Complete);
        assert_eq!(ev, TransportEvent::Complete);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
