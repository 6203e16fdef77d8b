//! Conversation metadata, active-conversation selection, and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::optimistic::run_optimistic;
use crate::api::{CoachApi, CreateConversationRequest, NewMessage};
use crate::error::ChatError;
use formcoach_protocol::{
    Conversation, ConversationKind, ConversationStatus, Message, Sender, derive_title,
};

/// Fallback quick replies used when the remote suggestion call fails.
pub const DEFAULT_SUGGESTED_ACTIONS: [&str; 3] = [
    "Plan my next workout",
    "Review my last session",
    "How is my weekly volume trending?",
];

/// Owns conversation metadata and the active-conversation pointer.
///
/// The local map is a cache over the backend: mutations are optimistic with
/// compensation, except creation, which is create-then-insert because there
/// is no pre-existing entity to patch.
pub struct ConversationStore {
    api: Arc<dyn CoachApi>,
    conversations: HashMap<String, Conversation>,
    active: Option<String>,
    idle_timeout: chrono::Duration,
}

impl ConversationStore {
    pub fn new(api: Arc<dyn CoachApi>, idle_timeout: chrono::Duration) -> Self {
        Self {
            api,
            conversations: HashMap::new(),
            active: None,
            idle_timeout,
        }
    }

    /// Create a conversation seeded with the given messages and mark it
    /// active. The title derives from the first user message. All-or-nothing:
    /// a remote failure leaves no local state behind.
    ///
    /// Seeding the message store with the returned conversation's messages
    /// is the caller's job; stores do not reach into each other.
    pub async fn create_with_messages(
        &mut self,
        messages: &[NewMessage],
        kind: ConversationKind,
    ) -> Result<Conversation, ChatError> {
        let seed = messages
            .iter()
            .find(|m| m.sender == Sender::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let title = derive_title(seed, Utc::now());

        let conversation = self
            .api
            .create_conversation(CreateConversationRequest {
                title,
                kind,
                initial_messages: messages.to_vec(),
            })
            .await
            .map_err(|e| ChatError::Creation(e.to_string()))?;

        info!(id = %conversation.id, title = %conversation.title, "conversation created");
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        self.active = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// Refresh one conversation's metadata from the backend and merge it in.
    pub async fn get_conversation(&mut self, id: &str) -> Result<Conversation, ChatError> {
        let conversation = self.api.get_conversation(id).await?;
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    /// Refresh the conversation list. Merges into the local map without
    /// discarding entries the backend did not return.
    pub async fn get_conversations(&mut self) -> Result<Vec<Conversation>, ChatError> {
        let fetched = self.api.list_conversations().await?;
        for conversation in fetched {
            self.conversations
                .insert(conversation.id.clone(), conversation);
        }
        let mut all: Vec<Conversation> = self.conversations.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    /// Delete a conversation: removed locally first, restored if the remote
    /// delete fails.
    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        let api = Arc::clone(&self.api);
        let id_owned = id.to_string();
        let patch_id = id_owned.clone();

        run_optimistic(
            self,
            move |store| {
                let removed = store.conversations.remove(&patch_id);
                let was_active = store.active.as_deref() == Some(patch_id.as_str());
                if was_active {
                    store.active = None;
                }
                Box::new(move |store: &mut ConversationStore| {
                    if let Some(conversation) = removed {
                        if was_active {
                            store.active = Some(conversation.id.clone());
                        }
                        store
                            .conversations
                            .insert(conversation.id.clone(), conversation);
                    }
                })
            },
            async move { api.delete_conversation(&id_owned).await },
        )
        .await?;

        debug!(%id, "conversation deleted");
        Ok(())
    }

    /// Pointer swap only; existence of the id is the caller's concern.
    pub fn set_active(&mut self, id: Option<String>) {
        self.active = id;
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Bump `updated_at` and force the conversation active. Called on every
    /// successful send.
    pub fn touch(&mut self, id: &str) {
        if let Some(conversation) = self.conversations.get_mut(id) {
            conversation.updated_at = Utc::now();
            conversation.status = ConversationStatus::Active;
        }
    }

    /// Archive the active conversation if it has idled past the timeout.
    /// Returns true if an archival happened. Pure: no I/O, meant to be
    /// driven by a periodic external timer.
    pub fn check_timeout(&mut self) -> bool {
        self.check_timeout_at(Utc::now())
    }

    pub fn check_timeout_at(&mut self, now: DateTime<Utc>) -> bool {
        let Some(active_id) = self.active.clone() else {
            return false;
        };
        let Some(conversation) = self.conversations.get_mut(&active_id) else {
            return false;
        };
        if now - conversation.updated_at <= self.idle_timeout {
            return false;
        }

        info!(id = %active_id, "archiving idle conversation");
        conversation.status = ConversationStatus::Archived;
        self.active = None;
        true
    }

    /// Reactivate an archived conversation and make it active.
    pub fn resume(&mut self, id: &str) {
        if let Some(conversation) = self.conversations.get_mut(id) {
            conversation.status = ConversationStatus::Active;
            conversation.updated_at = Utc::now();
            self.active = Some(id.to_string());
        }
    }

    /// Quick-reply suggestions from recent context. Non-critical: a remote
    /// failure degrades to the fixed default set, never to an error.
    pub async fn suggested_actions(&self, context: &[Message]) -> Vec<String> {
        match self.api.suggested_actions(context).await {
            Ok(suggestions) if !suggestions.is_empty() => suggestions,
            Ok(_) => DEFAULT_SUGGESTED_ACTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            Err(e) => {
                warn!("suggested actions unavailable, using defaults: {e}");
                DEFAULT_SUGGESTED_ACTIONS
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }
        }
    }

    /// Copy of the conversation map for cache snapshots.
    pub fn snapshot(&self) -> HashMap<String, Conversation> {
        self.conversations.clone()
    }

    /// Replace local state from a cache snapshot. Startup only.
    pub fn load_snapshot(&mut self, conversations: HashMap<String, Conversation>) {
        self.conversations = conversations;
    }
}
