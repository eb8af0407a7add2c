//! # Channels
//!
//! Outbound messaging. Each channel implements [`Channel`] so the delivery
//! loop can post through any platform; Discord is the only one shipped.

pub mod discord;

pub use discord::{
    DiscordApiError, DiscordChannel, DiscordChannelInfo, DiscordConfig, DiscordHttpClient,
    DiscordUser, RealDiscordHttp, create_discord_channel,
};

use async_trait::async_trait;

use crate::error::ChannelError;

/// Platform identifier of a posted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Core trait that all channel implementations must satisfy.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable name of this channel instance.
    fn name(&self) -> &str;

    /// Authenticate and resolve the destination. Must succeed before `send`.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Post `text`. Returns the platform message id.
    async fn send(&self, text: &str) -> Result<MessageId, ChannelError>;

    fn status(&self) -> ChannelStatus;

    fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Largest message the platform accepts, in characters.
    fn max_message_length(&self) -> Option<usize> {
        None
    }
}
