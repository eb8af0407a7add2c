//! Discord channel implementation.
//!
//! Posts through the Discord REST API (v10). `connect` verifies the bot
//! token and resolves the target text channel before anything is sent. In
//! tests, a trait abstraction provides mock implementations.

use super::{Channel, ChannelStatus, MessageId};
use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

/// Discord channel types that accept plain text posts: guild text and
/// announcement channels.
const TEXT_CHANNEL_TYPES: [u8; 2] = [0, 5];

/// Configuration for a Discord channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub channel_id: u64,
}

/// A failed Discord API call. `status` is `None` when no HTTP response was
/// received at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordApiError {
    pub status: Option<u16>,
    /// Discord's JSON error code, `0` when absent.
    pub code: i64,
    pub message: String,
}

impl DiscordApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: 0,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DiscordApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {} (code {}): {}", status, self.code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// The bot's own user, from `GET /users/@me`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
}

/// A channel, from `GET /channels/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordChannelInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
}

/// Trait for Discord API interactions.
#[async_trait]
pub trait DiscordHttpClient: Send + Sync {
    async fn get_current_user(&self) -> Result<DiscordUser, DiscordApiError>;
    async fn get_channel(&self, channel_id: u64) -> Result<DiscordChannelInfo, DiscordApiError>;
    async fn send_message(&self, channel_id: u64, text: &str) -> Result<String, DiscordApiError>;
}

/// Discord channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    status: ChannelStatus,
    http_client: Box<dyn DiscordHttpClient>,
    name: String,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig, http_client: Box<dyn DiscordHttpClient>) -> Self {
        Self {
            config,
            status: ChannelStatus::Disconnected,
            http_client,
            name: "discord".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.config.bot_token.trim().is_empty() {
            return Err(ChannelError::AuthFailed {
                name: self.name.clone(),
            });
        }

        let user = self.http_client.get_current_user().await.map_err(|e| {
            if e.status == Some(401) {
                ChannelError::AuthFailed {
                    name: self.name.clone(),
                }
            } else {
                ChannelError::ConnectionFailed {
                    name: self.name.clone(),
                    message: e.to_string(),
                }
            }
        })?;
        tracing::info!(user = %user.username, id = %user.id, "Logged in to Discord");

        let target = self.config.channel_id.to_string();
        let info = self
            .http_client
            .get_channel(self.config.channel_id)
            .await
            .map_err(|e| ChannelError::NotFound {
                name: self.name.clone(),
                target: target.clone(),
                message: e.to_string(),
            })?;
        if !TEXT_CHANNEL_TYPES.contains(&info.kind) {
            return Err(ChannelError::NotFound {
                name: self.name.clone(),
                target,
                message: format!("not a text channel (type {})", info.kind),
            });
        }

        tracing::info!(
            channel = info.name.as_deref().unwrap_or("?"),
            id = %info.id,
            "Resolved Discord channel"
        );
        self.status = ChannelStatus::Connected;
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<MessageId, ChannelError> {
        if self.status != ChannelStatus::Connected {
            return Err(ChannelError::NotConnected {
                name: self.name.clone(),
            });
        }
        self.http_client
            .send_message(self.config.channel_id, text)
            .await
            .map(MessageId::new)
            .map_err(|e| match e.status {
                Some(status) => ChannelError::SendRejected {
                    name: self.name.clone(),
                    status,
                    code: e.code,
                    message: e.message,
                },
                None => ChannelError::SendFailed {
                    name: self.name.clone(),
                    message: e.message,
                },
            })
    }

    fn status(&self) -> ChannelStatus {
        self.status
    }

    fn max_message_length(&self) -> Option<usize> {
        Some(DISCORD_MAX_MESSAGE_LEN)
    }
}

/// Real Discord HTTP client using reqwest.
pub struct RealDiscordHttp {
    client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl RealDiscordHttp {
    pub fn new(bot_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            base_url: DISCORD_API_BASE.to_string(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn request_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, DiscordApiError> {
        let resp = request
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| DiscordApiError::transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DiscordApiError::transport(format!("failed to read body: {e}")))?;
        let body: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() {
            return Err(DiscordApiError {
                status: Some(status.as_u16()),
                code: body["code"].as_i64().unwrap_or(0),
                message: body["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        status.canonical_reason().unwrap_or("unknown error").to_string()
                    }),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl DiscordHttpClient for RealDiscordHttp {
    async fn get_current_user(&self) -> Result<DiscordUser, DiscordApiError> {
        let url = format!("{}/users/@me", self.base_url);
        let body = self.request_json(self.client.get(&url)).await?;
        serde_json::from_value(body)
            .map_err(|e| DiscordApiError::transport(format!("JSON parse error: {e}")))
    }

    async fn get_channel(&self, channel_id: u64) -> Result<DiscordChannelInfo, DiscordApiError> {
        let url = format!("{}/channels/{}", self.base_url, channel_id);
        let body = self.request_json(self.client.get(&url)).await?;
        serde_json::from_value(body)
            .map_err(|e| DiscordApiError::transport(format!("JSON parse error: {e}")))
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<String, DiscordApiError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "content": text }));
        let body = self.request_json(request).await?;
        Ok(body["id"].as_str().unwrap_or("0").to_string())
    }
}

/// Create a Discord channel with a real HTTP client.
pub fn create_discord_channel(config: DiscordConfig) -> DiscordChannel {
    let http = RealDiscordHttp::new(config.bot_token.clone());
    DiscordChannel::new(config, Box::new(http))
}
