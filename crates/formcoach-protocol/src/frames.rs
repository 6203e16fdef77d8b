//! Wire frames for the streaming chat connection.
//!
//! These types define the JSON protocol between the client and the chat
//! backend over the duplex streaming connection. All frames are tagged
//! unions keyed by `type`.

use serde::{Deserialize, Serialize};

use crate::messages::Message;

/// Why a streaming response is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The user asked to stop the response.
    UserRequested,
    /// The client lost its network path mid-stream.
    NetworkFailure,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user_requested"),
            Self::NetworkFailure => write!(f, "network_failure"),
        }
    }
}

/// Frames sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A user chat message plus the conversation history for context.
    Message {
        message: String,
        conversation_history: Vec<Message>,
    },

    /// Best-effort request to stop the in-flight response.
    Cancel { reason: CancelReason },

    /// Seed the backend's streaming context after (re)connecting.
    Initialize { data: Vec<Message> },
}

/// Frames sent from the backend to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// One token/fragment of the streaming response.
    Content { chunk: String },

    /// Human-readable progress line ("Reviewing your squat log...").
    Status { text: String },

    /// The streaming response finished; accumulated content is final.
    Complete,

    /// The backend deliberately cut the response off. Not an error: partial
    /// content is discarded, not lost.
    Terminated { reason: String },

    /// The backend hit a failure producing the response.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Sender;
    use chrono::Utc;

    #[test]
    fn test_message_frame_serialization() {
        let history = vec![Message {
            id: "m-1".to_string(),
            conversation_id: "conv-1".to_string(),
            content: "hello".to_string(),
            sender: Sender::User,
            sequence: 1,
            created_at: Utc::now(),
        }];
        let frame = ClientFrame::Message {
            message: "plan my week".to_string(),
            conversation_history: history,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"message\""));
        assert!(json.contains("\"message\":\"plan my week\""));
        assert!(json.contains("\"conversation_history\""));
    }

    #[test]
    fn test_cancel_frame_reason_tag() {
        let frame = ClientFrame::Cancel {
            reason: CancelReason::UserRequested,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"cancel","reason":"user_requested"}"#);
    }

    #[test]
    fn test_server_frame_deserialization() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"content","chunk":"Hi "}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Content {
                chunk: "Hi ".to_string()
            }
        );

        let frame: ServerFrame = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Complete);

        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"terminated","reason":"forced cutoff"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Terminated {
                reason: "forced cutoff".to_string()
            }
        );
    }
}
