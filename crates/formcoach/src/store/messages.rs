//! Per-conversation message lists and in-flight streaming state.

use std::collections::HashMap;

use chrono::Utc;

use formcoach_protocol::{Message, Sender};

/// The not-yet-finalized assistant response for one conversation.
///
/// Ephemeral: never serialized, deleted (not marked) once folded into a
/// [`Message`] or discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingMessage {
    pub conversation_id: String,
    /// Accumulated content, append-only.
    pub content: String,
    /// Set while the terminal fold is in progress; a completed stream never
    /// outlives the fold.
    pub complete: bool,
}

/// Pure container for messages, keyed by conversation id.
///
/// Callers must supply messages in order for `add_message`; only
/// `set_bulk_messages` re-sorts. At most one [`StreamingMessage`] exists per
/// conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: HashMap<String, Vec<Message>>,
    streaming: HashMap<String, StreamingMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace per-conversation message lists wholesale, sorting each by
    /// sequence. Idempotent.
    pub fn set_bulk_messages(&mut self, by_conversation: HashMap<String, Vec<Message>>) {
        self.messages = by_conversation;
        for list in self.messages.values_mut() {
            list.sort_by_key(|m| m.sequence);
        }
    }

    /// Ordered messages for a conversation. Empty slice if unknown.
    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append a message. Precondition: callers supply messages in sequence
    /// order; no re-sort happens here.
    pub fn add_message(&mut self, conversation_id: &str, message: Message) {
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }

    /// Remove a message by id. No-op if absent.
    pub fn remove_message(&mut self, conversation_id: &str, message_id: &str) {
        if let Some(list) = self.messages.get_mut(conversation_id) {
            list.retain(|m| m.id != message_id);
        }
    }

    /// Swap an optimistic local message for its persisted identity, keeping
    /// its position.
    pub fn reconcile_message(
        &mut self,
        conversation_id: &str,
        local_id: &str,
        persisted: Message,
    ) {
        if let Some(list) = self.messages.get_mut(conversation_id) {
            if let Some(slot) = list.iter_mut().find(|m| m.id == local_id) {
                *slot = persisted;
            }
        }
    }

    /// Append a chunk to the conversation's streaming state, creating it on
    /// the first chunk. Chunks are never dropped or reordered here; in-order
    /// delivery is the caller's obligation.
    pub fn update_streaming(&mut self, conversation_id: &str, chunk: &str) {
        self.streaming
            .entry(conversation_id.to_string())
            .and_modify(|s| s.content.push_str(chunk))
            .or_insert_with(|| StreamingMessage {
                conversation_id: conversation_id.to_string(),
                content: chunk.to_string(),
                complete: false,
            });
    }

    /// Current streaming state, if any.
    pub fn streaming(&self, conversation_id: &str) -> Option<&StreamingMessage> {
        self.streaming.get(conversation_id)
    }

    /// Fold the streaming state into a persisted-shape assistant message at
    /// the next sequence number and delete the state. No-op on duplicate
    /// completion signals.
    pub fn complete_streaming(&mut self, conversation_id: &str) -> Option<Message> {
        let mut stream = self.streaming.remove(conversation_id)?;
        stream.complete = true;

        let message = Message {
            id: format!("assistant-{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            content: stream.content,
            sender: Sender::Assistant,
            sequence: self.next_sequence(conversation_id),
            created_at: Utc::now(),
        };
        self.add_message(conversation_id, message.clone());
        Some(message)
    }

    /// Delete streaming state without producing a message. Partial content
    /// is discarded, never partially persisted.
    pub fn clear_streaming(&mut self, conversation_id: &str) {
        self.streaming.remove(conversation_id);
    }

    /// Reset a conversation's message list to empty.
    pub fn clear_messages(&mut self, conversation_id: &str) {
        self.messages.remove(conversation_id);
    }

    /// Next free sequence number for a conversation (max + 1, starting at 1).
    pub fn next_sequence(&self, conversation_id: &str) -> u32 {
        self.messages(conversation_id)
            .iter()
            .map(|m| m.sequence)
            .max()
            .map(|s| s + 1)
            .unwrap_or(1)
    }

    /// Copy of the message map for cache snapshots. Streaming state is not
    /// part of the snapshot type at all.
    pub fn snapshot(&self) -> HashMap<String, Vec<Message>> {
        self.messages.clone()
    }
}
