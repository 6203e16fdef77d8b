//! Error taxonomy for the chat client core.
//!
//! Three layers, matching the component boundaries: transport faults,
//! remote CRUD faults, and orchestrator-level contract violations. Events
//! that are user-visible information rather than failures (a server-side
//! cutoff, a cancel cooldown) are modelled as [`Notice`], not as errors.

use thiserror::Error;

use formcoach_protocol::CancelReason;

/// Faults raised by the streaming transport connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connection did not open within the configured timeout.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A send was attempted while disconnected. Caller contract violation:
    /// the orchestrator must ensure connection before sending.
    #[error("not connected")]
    NotConnected,
}

/// Faults raised by the remote CRUD contract.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request itself failed (DNS, TLS, connect, body).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("remote call failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Orchestrator-level errors surfaced to callers of the session API.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A send was attempted while a response is already in flight for the
    /// active conversation.
    #[error("a response is already in flight for this conversation")]
    SendInFlight,

    /// Disconnect was refused because an exchange is in flight.
    #[error("cannot disconnect while a response is in flight")]
    StreamInFlight,

    /// Cancel was requested again within the cooldown window.
    #[error("cancellation is cooling down, please wait")]
    CancelCooldown,

    /// Transport fault bubbled up from a user-initiated operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Remote CRUD fault bubbled up from a store operation.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Conversation creation failed; no local state was retained.
    #[error("failed to create conversation: {0}")]
    Creation(String),
}

/// User-visible informational notices. These are state, not errors: the UI
/// renders them, but no operation failed from the caller's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The backend deliberately cut off the response; partial content was
    /// discarded.
    StreamTerminated { reason: String },

    /// The in-flight response was cancelled locally.
    Cancelled { reason: CancelReason },

    /// A repeat cancel request was rejected inside the cooldown window.
    CancelCooldown,

    /// The stream failed; partial content was discarded.
    StreamFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::SendInFlight;
        assert_eq!(
            err.to_string(),
            "a response is already in flight for this conversation"
        );

        let err = ChatError::Transport(TransportError::NotConnected);
        assert_eq!(err.to_string(), "not connected");

        let err = ApiError::Status {
            status: 503,
            message: "maintenance".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote call failed with status 503: maintenance"
        );
    }
}
