use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use crate::error::{
    BackendResult, BuildClientSnafu, DecodePayloadSnafu, TransportSnafu, UnexpectedStatusSnafu,
};
use crate::models::{Contact, DirectMessage, MessageKind, NewDirectMessage, UserId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8081";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error bodies are truncated to this many characters when surfaced.
const ERROR_BODY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Peer messaging seam the chat session talks through.
#[async_trait]
pub trait DirectMessageApi: Send + Sync {
    async fn send(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
        kind: MessageKind,
    ) -> BackendResult<DirectMessage>;

    /// Full history between two users, oldest first.
    async fn list(&self, user: UserId, other: UserId) -> BackendResult<Vec<DirectMessage>>;
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct FriendBody {
    #[serde(rename = "userId")]
    user_id: UserId,
    #[serde(rename = "friendId")]
    friend_id: UserId,
}

#[derive(Debug, Serialize)]
struct BlockBody {
    #[serde(rename = "userId")]
    user_id: UserId,
    #[serde(rename = "blockedId")]
    blocked_id: UserId,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context(BuildClientSnafu { stage: "new" })?;
        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        stage: &'static str,
        path: &str,
    ) -> BackendResult<T> {
        let url = self.api_url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context(TransportSnafu {
                stage,
                url: url.clone(),
            })?;
        Self::decode_json(stage, &url, response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        stage: &'static str,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let url = self.api_url(path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .context(TransportSnafu {
                stage,
                url: url.clone(),
            })?;
        Self::decode_json(stage, &url, response).await
    }

    async fn post_expect_success<B: Serialize>(
        &self,
        stage: &'static str,
        path: &str,
        body: Option<&B>,
    ) -> BackendResult<()> {
        let url = self.api_url(path);
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.context(TransportSnafu {
            stage,
            url: url.clone(),
        })?;
        Self::expect_success(stage, &url, response).await
    }

    async fn decode_json<T: DeserializeOwned>(
        stage: &'static str,
        url: &str,
        response: Response,
    ) -> BackendResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UnexpectedStatusSnafu {
                stage,
                url,
                status: status.as_u16(),
                body: truncate_body(&body),
            }
            .fail();
        }
        response.json().await.context(DecodePayloadSnafu { stage, url })
    }

    async fn expect_success(
        stage: &'static str,
        url: &str,
        response: Response,
    ) -> BackendResult<()> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UnexpectedStatusSnafu {
                stage,
                url,
                status: status.as_u16(),
                body: truncate_body(&body),
            }
            .fail();
        }
        Ok(())
    }

    pub async fn contacts(&self) -> BackendResult<Vec<Contact>> {
        self.get_json("contacts", "/contacts").await
    }

    pub async fn friends(&self, user: UserId) -> BackendResult<Vec<Contact>> {
        self.get_json("friends", &format!("/friends/{user}")).await
    }

    pub async fn add_friend(&self, user: UserId, friend: UserId) -> BackendResult<()> {
        let body = FriendBody {
            user_id: user,
            friend_id: friend,
        };
        self.post_expect_success("add-friend", "/friends/add", Some(&body))
            .await
    }

    pub async fn remove_friend(&self, user: UserId, friend: UserId) -> BackendResult<()> {
        let body = FriendBody {
            user_id: user,
            friend_id: friend,
        };
        self.post_expect_success("remove-friend", "/friends/remove", Some(&body))
            .await
    }

    pub async fn blocked(&self, user: UserId) -> BackendResult<Vec<Contact>> {
        self.get_json("blocked", &format!("/blocks/{user}")).await
    }

    pub async fn block(&self, user: UserId, other: UserId) -> BackendResult<()> {
        let body = BlockBody {
            user_id: user,
            blocked_id: other,
        };
        self.post_expect_success("block", "/blocks/add", Some(&body))
            .await
    }

    pub async fn unblock(&self, user: UserId, other: UserId) -> BackendResult<()> {
        let body = BlockBody {
            user_id: user,
            blocked_id: other,
        };
        self.post_expect_success("unblock", "/blocks/remove", Some(&body))
            .await
    }

    pub async fn heartbeat(&self, user: UserId) -> BackendResult<()> {
        self.post_expect_success::<()>("heartbeat", &format!("/heartbeat/{user}"), None)
            .await
    }
}

#[async_trait]
impl DirectMessageApi for BackendClient {
    async fn send(
        &self,
        sender: UserId,
        recipient: UserId,
        content: &str,
        kind: MessageKind,
    ) -> BackendResult<DirectMessage> {
        let body = NewDirectMessage {
            sender_id: sender,
            recipient_id: recipient,
            content: content.to_string(),
            kind,
        };
        self.post_json("send-message", "/messages", &body).await
    }

    async fn list(&self, user: UserId, other: UserId) -> BackendResult<Vec<DirectMessage>> {
        self.get_json("list-messages", &format!("/messages/{user}/{other}"))
            .await
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slash() {
        let config = BackendConfig::new("http://localhost:8081/");
        assert_eq!(config.base_url, "http://localhost:8081");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn api_url_prefixes_api_segment() {
        let client = BackendClient::new(BackendConfig::default()).expect("client");
        assert_eq!(
            client.api_url("/messages/7/9"),
            "http://localhost:8081/api/messages/7/9"
        );
    }

    #[test]
    fn friend_body_serializes_backend_casing() {
        let body = FriendBody {
            user_id: UserId::new(1),
            friend_id: UserId::new(2),
        };
        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(value, serde_json::json!({"userId": 1, "friendId": 2}));
    }

    #[test]
    fn block_body_serializes_backend_casing() {
        let body = BlockBody {
            user_id: UserId::new(1),
            blocked_id: UserId::new(2),
        };
        let value = serde_json::to_value(&body).expect("encode");
        assert_eq!(value, serde_json::json!({"userId": 1, "blockedId": 2}));
    }

    #[test]
    fn error_body_truncation_keeps_char_boundaries() {
        let long = "й".repeat(200);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 100);
    }
}
