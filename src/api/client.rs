use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::{AgentId, MessageKind};
use crate::api::error::ApiError;
use crate::api::types::{
    AuthRequest, AuthResponse, ConversationsResponse, DirectoryListing, ErrorBody,
    HistoryResponse, SavedConversation, MAX_SAVED_CONVERSATIONS,
};
use crate::api::HistorySource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the backend's REST endpoints.
///
/// Clones share the session token.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url,
            client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.token().ok_or(ApiError::NotAuthenticated)?;
        Ok(request.bearer_auth(token))
    }

    /// Exchange the PIN for a session token. The token is also kept for
    /// subsequent requests.
    pub async fn authenticate(&self, pin: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url("/api/auth"))
            .json(&AuthRequest { pin })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = error_body(response).await;
            tracing::warn!(remaining = ?body.remaining_attempts, "PIN rejected");
            return Err(ApiError::InvalidPin {
                remaining_attempts: body.remaining_attempts,
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::LOCKED {
            let header = retry_after_header(&response);
            let body = error_body(response).await;
            return Err(ApiError::LockedOut {
                retry_after_secs: body.retry_after.or(header),
            });
        }

        let auth: AuthResponse = read_json(response).await?;
        self.set_token(auth.token.clone());
        tracing::info!("Authenticated");
        Ok(auth.token)
    }

    /// Stored conversation for one agent
    pub async fn messages(&self, cwd: &str, agent_id: &AgentId) -> Result<Vec<MessageKind>, ApiError> {
        let request = self
            .client
            .get(self.url("/api/messages"))
            .query(&[("cwd", cwd), ("agent_id", agent_id.as_str())]);
        let response = self.authorized(request)?.send().await?;
        let history: HistoryResponse = read_json(response).await?;
        Ok(history.into_messages())
    }

    pub async fn clear_messages(&self, cwd: &str, agent_id: &AgentId) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.url("/api/messages"))
            .query(&[("cwd", cwd), ("agent_id", agent_id.as_str())]);
        let response = self.authorized(request)?.send().await?;
        check(response).await.map(|_| ())
    }

    /// List a directory on the server host, for choosing a working directory
    pub async fn browse(&self, path: &str) -> Result<DirectoryListing, ApiError> {
        let request = self
            .client
            .get(self.url("/api/browse"))
            .query(&[("path", path)]);
        let response = self.authorized(request)?.send().await?;
        read_json(response).await
    }

    pub async fn metrics(&self) -> Result<Value, ApiError> {
        let request = self.client.get(self.url("/api/metrics"));
        let response = self.authorized(request)?.send().await?;
        read_json(response).await
    }

    pub async fn saved_conversations(&self) -> Result<Vec<SavedConversation>, ApiError> {
        let request = self.client.get(self.url("/api/history"));
        let response = self.authorized(request)?.send().await?;
        let list: ConversationsResponse = read_json(response).await?;
        Ok(list.into_vec())
    }

    /// Save (or replace, by id) a conversation snapshot
    pub async fn save_conversation(&self, conversation: &SavedConversation) -> Result<(), ApiError> {
        let existing = self.saved_conversations().await?;
        let replaces = existing.iter().any(|c| c.id == conversation.id);
        if !replaces && existing.len() >= MAX_SAVED_CONVERSATIONS {
            return Err(ApiError::LimitExceeded(format!(
                "at most {} saved conversations",
                MAX_SAVED_CONVERSATIONS
            )));
        }

        let request = self.client.post(self.url("/api/history")).json(conversation);
        let response = self.authorized(request)?.send().await?;
        check(response).await.map(|_| ())
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&format!("/api/history/{}", id)));
        let response = self.authorized(request)?.send().await?;
        check(response).await.map(|_| ())
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch(&self, cwd: &str, agent_id: &AgentId) -> Result<Vec<MessageKind>, ApiError> {
        self.messages(cwd, agent_id).await
    }
}

fn retry_after_header(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn error_body(response: Response) -> ErrorBody {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or_default()
}

/// Map non-success statuses to errors, passing successful responses through
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::NotAuthenticated);
    }
    let lowered = text.to_lowercase();
    if status == StatusCode::PAYLOAD_TOO_LARGE
        || (status == StatusCode::TOO_MANY_REQUESTS
            && (lowered.contains("quota") || lowered.contains("limit")))
    {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or(text);
        return Err(ApiError::LimitExceeded(message));
    }

    Err(ApiError::UnexpectedStatus {
        status: status.as_u16(),
        body: text,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check(response).await?;
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}
