//! Remote CRUD contract.
//!
//! The backend persists conversations and messages; this module defines the
//! client-side seam ([`CoachApi`]) and the HTTP implementation over reqwest.
//! Stores receive the trait object by injection so tests run against fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use formcoach_protocol::{Conversation, ConversationKind, Message, Sender};

/// A message not yet persisted: content and sender only. The backend
/// assigns id and sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub sender: Sender,
}

/// Request body for conversation creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest {
    pub title: String,
    pub kind: ConversationKind,
    pub initial_messages: Vec<NewMessage>,
}

/// Client-side view of the backend's conversation/message CRUD.
#[async_trait]
pub trait CoachApi: Send + Sync {
    /// Create a conversation with its seed messages. Returns the persisted
    /// conversation with its server-assigned id.
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApiError>;

    /// Fetch all conversations for the signed-in user.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// Fetch one conversation's metadata.
    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError>;

    /// Fetch a conversation's persisted messages.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;

    /// Persist a single message. Returns it with server-assigned id and
    /// sequence.
    async fn persist_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ApiError>;

    /// Delete a conversation.
    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;

    /// Derive quick-reply suggestions from recent message context.
    async fn suggested_actions(&self, context: &[Message]) -> Result<Vec<String>, ApiError>;
}

/// HTTP implementation of [`CoachApi`].
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpApi {
    pub fn new(base_url: &str, auth_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if !self.auth_token.is_empty() {
            builder = builder.bearer_auth(&self.auth_token);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CoachApi for HttpApi {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        debug!(title = %request.title, "creating conversation");
        let response = self
            .request(reqwest::Method::POST, "/conversations")
            .json(&request)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let response = self
            .request(reqwest::Method::GET, "/conversations")
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/conversations/{id}"))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/conversations/{conversation_id}/messages"),
            )
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ApiError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/conversations/{conversation_id}/messages"),
            )
            .json(&message)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/conversations/{id}"))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn suggested_actions(&self, context: &[Message]) -> Result<Vec<String>, ApiError> {
        #[derive(Serialize)]
        struct SuggestionRequest<'a> {
            context: &'a [Message],
        }
        #[derive(Deserialize)]
        struct SuggestionResponse {
            suggestions: Vec<String>,
        }

        let response = self
            .request(reqwest::Method::POST, "/suggested-actions")
            .json(&SuggestionRequest { context })
            .send()
            .await?;
        let body: SuggestionResponse = Self::decode(response).await?;
        Ok(body.suggestions)
    }
}
