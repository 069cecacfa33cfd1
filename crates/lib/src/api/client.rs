//! Webhook API client. All calls are bearer-authenticated JSON over HTTP.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::api::types::{
    Agent, AgentDetail, ChatHistory, CreatedChat, Message, NewChat, OutgoingMessage, Tab,
};
use crate::config::{self, Config, DEFAULT_API_BASE_URL};
use crate::credential::Credential;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("session rejected by server ({0})")]
    Unauthorized(u16),
    #[error("api error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when the server refused the credential (401/403).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Category tabs, agent listings, and agent detail.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn tabs(&self, credential: &Credential) -> Result<Vec<Tab>, ApiError>;

    async fn featured_agents(
        &self,
        credential: &Credential,
        category_id: i64,
    ) -> Result<Vec<Agent>, ApiError>;

    async fn agent_detail(
        &self,
        credential: &Credential,
        agent_id: &str,
    ) -> Result<AgentDetail, ApiError>;
}

/// Chat creation and messaging.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_chat(
        &self,
        credential: &Credential,
        request: &NewChat,
    ) -> Result<CreatedChat, ApiError>;

    async fn send_message(
        &self,
        credential: &Credential,
        request: &OutgoingMessage,
    ) -> Result<(), ApiError>;

    /// Transcript of one chat, oldest first.
    async fn messages(&self, credential: &Credential, chat_id: &str)
        -> Result<Vec<Message>, ApiError>;
}

/// Recent agents and chat history management.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn recent_agents(&self, credential: &Credential) -> Result<Vec<Agent>, ApiError>;

    async fn chat_history(&self, credential: &Credential) -> Result<ChatHistory, ApiError>;

    async fn rename_chat(
        &self,
        credential: &Credential,
        chat_id: &str,
        title: &str,
    ) -> Result<(), ApiError>;

    async fn delete_chat(&self, credential: &Credential, chat_id: &str) -> Result<(), ApiError>;
}

/// Client for the webhook API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Client for the configured base (COACH_API_BASE_URL wins) with the configured timeout.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("api: building http client with timeout failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            base_url: config::resolve_api_base_url(config),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success statuses to errors; 401/403 become Unauthorized.
    async fn check(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(status.as_u16()));
        }
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(res: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let text = res.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{}: {}", what, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(&credential.token)
            .query(query)
            .send()
            .await?;
        let res = Self::check(res).await?;
        Self::decode(res, path).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        credential: &Credential,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(&credential.token)
            .json(body)
            .send()
            .await?;
        Self::check(res).await
    }
}

#[async_trait]
impl CatalogApi for ApiClient {
    /// GET /explore/tabs
    async fn tabs(&self, credential: &Credential) -> Result<Vec<Tab>, ApiError> {
        self.get_json(credential, "/explore/tabs", &[]).await
    }

    /// GET /explore/agents?category_id=
    async fn featured_agents(
        &self,
        credential: &Credential,
        category_id: i64,
    ) -> Result<Vec<Agent>, ApiError> {
        let id = category_id.to_string();
        self.get_json(credential, "/explore/agents", &[("category_id", id.as_str())])
            .await
    }

    /// GET /explore/agent?agent_id=
    async fn agent_detail(
        &self,
        credential: &Credential,
        agent_id: &str,
    ) -> Result<AgentDetail, ApiError> {
        self.get_json(credential, "/explore/agent", &[("agent_id", agent_id)])
            .await
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    /// POST /chat/newid; returns the new chat id.
    async fn create_chat(
        &self,
        credential: &Credential,
        request: &NewChat,
    ) -> Result<CreatedChat, ApiError> {
        let res = self.post(credential, "/chat/newid", request).await?;
        Self::decode(res, "/chat/newid").await
    }

    /// POST /chatbot. The reply body is ignored.
    async fn send_message(
        &self,
        credential: &Credential,
        request: &OutgoingMessage,
    ) -> Result<(), ApiError> {
        self.post(credential, "/chatbot", request).await?;
        Ok(())
    }

    /// GET /chat/messages?chatId=
    async fn messages(
        &self,
        credential: &Credential,
        chat_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        self.get_json(credential, "/chat/messages", &[("chatId", chat_id)])
            .await
    }
}

#[async_trait]
impl HistoryApi for ApiClient {
    /// GET /explore/recent-agents?userId=
    async fn recent_agents(&self, credential: &Credential) -> Result<Vec<Agent>, ApiError> {
        self.get_json(
            credential,
            "/explore/recent-agents",
            &[("userId", credential.user.id.as_str())],
        )
        .await
    }

    /// GET /chat/history?userId=
    async fn chat_history(&self, credential: &Credential) -> Result<ChatHistory, ApiError> {
        self.get_json(
            credential,
            "/chat/history",
            &[("userId", credential.user.id.as_str())],
        )
        .await
    }

    /// POST /chat/rename
    async fn rename_chat(
        &self,
        credential: &Credential,
        chat_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let body = json!({
            "userId": credential.user.id,
            "chatId": chat_id,
            "chatName": title,
        });
        self.post(credential, "/chat/rename", &body).await?;
        Ok(())
    }

    /// POST /chat/delete
    async fn delete_chat(&self, credential: &Credential, chat_id: &str) -> Result<(), ApiError> {
        let body = json!({
            "userId": credential.user.id,
            "chatId": chat_id,
        });
        self.post(credential, "/chat/delete", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = ApiClient::new(Some("http://localhost:5678/webhook/".to_string()));
        assert_eq!(c.base_url(), "http://localhost:5678/webhook");
        assert_eq!(c.url("/chatbot"), "http://localhost:5678/webhook/chatbot");
    }

    #[test]
    fn default_base_url() {
        assert_eq!(ApiClient::new(None).base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn unauthorized_is_detected() {
        assert!(ApiError::Unauthorized(401).is_unauthorized());
        assert!(!ApiError::Api {
            status: 500,
            body: String::new()
        }
        .is_unauthorized());
    }
}
