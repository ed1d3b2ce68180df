//! Fallback path over HTTP using `reqwest`.
//!
//! All endpoints live under `{base}/api/chat/`. Responses are JSON objects
//! with a `success` flag; a non-2xx status, `success: false` and transport
//! failures all come back as [`ApiError`].

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use chatlink_proto::message::{ConversationId, UserId};

use super::{ApiError, MessagingApi, Page, Pagination, RemoteConversation, StoredMessage};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    success: bool,
    message: Option<StoredMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: Vec<StoredMessage>,
    pagination: Option<Pagination>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    conversations: Vec<RemoteConversation>,
    pagination: Option<Pagination>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Talks to the chat backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpMessagingApi {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpMessagingApi {
    /// Client for the backend at `base` (e.g. `http://127.0.0.1:5000`).
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidUrl`] for an unusable base URL,
    /// [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(base: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{base} cannot be a base url")));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "chat", "conversations"])
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

fn rejected(error: Option<String>) -> ApiError {
    ApiError::Rejected(error.unwrap_or_else(|| "success flag not set".to_string()))
}

impl MessagingApi for HttpMessagingApi {
    async fn send_message(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        content: &str,
    ) -> Result<StoredMessage, ApiError> {
        let url = self.endpoint(&[conversation.as_str(), "messages"])?;
        tracing::debug!(%conversation, "sending message via fallback path");
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({ "userId": sender, "content": content }))
            .send()
            .await?;
        let body: SendResponse = Self::read(response).await?;
        match body {
            SendResponse {
                success: true,
                message: Some(message),
                ..
            } => Ok(message),
            SendResponse { error, .. } => Err(rejected(error)),
        }
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<StoredMessage>, ApiError> {
        let mut url = self.endpoint(&[conversation.as_str(), "messages"])?;
        url.query_pairs_mut()
            .append_pair("userId", user.as_str())
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        let response = self.authorize(self.client.get(url)).send().await?;
        let body: MessagesResponse = Self::read(response).await?;
        if !body.success {
            return Err(rejected(body.error));
        }
        Ok(Page {
            items: body.messages,
            pagination: body.pagination,
        })
    }

    async fn list_conversations(
        &self,
        user: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Page<RemoteConversation>, ApiError> {
        let mut url = self.endpoint(&[user.as_str()])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        let response = self.authorize(self.client.get(url)).send().await?;
        let body: ConversationsResponse = Self::read(response).await?;
        if !body.success {
            return Err(rejected(body.error));
        }
        Ok(Page {
            items: body.conversations,
            pagination: body.pagination,
        })
    }

    async fn mark_read(&self, conversation: &ConversationId, user: &UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&[conversation.as_str(), "read"])?;
        let response = self
            .authorize(self.client.put(url))
            .json(&json!({ "userId": user }))
            .send()
            .await?;
        let body: AckResponse = Self::read(response).await?;
        if body.success {
            Ok(())
        } else {
            Err(rejected(body.error))
        }
    }
}
