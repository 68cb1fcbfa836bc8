//! Avito messenger client — lists chats, fetches messages, sends replies.
//!
//! Pure transport behind the `ChatPlatform` trait; all funnel logic
//! lives in the engine. Authenticates with OAuth2 client credentials
//! and caches the bearer token until shortly before it expires.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AvitoConfig;
use crate::engine::types::{ChatPlatform, ChatRef, Direction, Message, MessageKind};
use crate::error::ChannelError;

const DEFAULT_BASE_URL: &str = "https://api.avito.ru";

/// Refresh the token this many seconds before the reported expiry.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

struct CachedToken {
    value: SecretString,
    expires_at: i64,
}

/// Avito messenger API client.
pub struct AvitoClient {
    http: reqwest::Client,
    base_url: String,
    config: AvitoConfig,
    token: Mutex<Option<CachedToken>>,
}

impl AvitoClient {
    pub fn new(config: AvitoConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Override the API host (tests point this at a local server).
    pub fn with_base_url(config: AvitoConfig, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a fresh one when the cached token
    /// is missing or about to expire.
    async fn bearer_token(&self) -> Result<SecretString, ChannelError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_EXPIRY_SLACK_SECS > now {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting fresh Avito access token");
        let response = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!(
                "token request failed with status {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        let value = SecretString::from(token.access_token);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: now + token.expires_in,
        });
        Ok(value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, ChannelError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatPlatform for AvitoClient {
    async fn list_chats(&self, limit: usize) -> Result<Vec<ChatRef>, ChannelError> {
        let endpoint = format!(
            "/messenger/v2/accounts/{}/chats?limit={limit}&unread_only=false",
            self.config.user_id
        );
        let page: ChatsPage = self.get_json(&endpoint).await?;
        Ok(page
            .chats
            .into_iter()
            .map(|chat| ChatRef { id: chat.id })
            .collect())
    }

    async fn fetch_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ChannelError> {
        let endpoint = format!(
            "/messenger/v3/accounts/{}/chats/{chat_id}/messages/?limit={limit}",
            self.config.user_id
        );
        let page: MessagesPage = self.get_json(&endpoint).await?;
        Ok(page
            .messages
            .into_iter()
            .filter_map(wire_to_message)
            .collect())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<bool, ChannelError> {
        let endpoint = format!(
            "/messenger/v1/accounts/{}/chats/{chat_id}/messages",
            self.config.user_id
        );
        let token = self.bearer_token().await?;
        let body = serde_json::json!({
            "message": { "text": text },
            "type": "text",
        });

        let response = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(chat = chat_id, status, body = %body, "Avito rejected the message");
            return Ok(false);
        }
        Ok(true)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    // Avito tokens live 24h; assume that when the field is omitted.
    86_400
}

#[derive(Debug, Deserialize)]
struct ChatsPage {
    #[serde(default)]
    chats: Vec<WireChat>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    direction: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: WireContent,
    #[serde(default)]
    created: i64,
}

#[derive(Debug, Default, Deserialize)]
struct WireContent {
    #[serde(default)]
    text: String,
}

/// Convert a wire message into the engine's model. Messages with an
/// unknown direction are dropped.
fn wire_to_message(wire: WireMessage) -> Option<Message> {
    let direction = match wire.direction.as_str() {
        "in" => Direction::In,
        "out" => Direction::Out,
        other => {
            debug!(id = %wire.id, direction = other, "Dropping message with unknown direction");
            return None;
        }
    };
    let kind = if wire.kind == "text" {
        MessageKind::Text
    } else {
        MessageKind::Other
    };
    Some(Message {
        id: wire.id,
        direction,
        kind,
        text: wire.content.text,
        created: wire.created,
    })
}
