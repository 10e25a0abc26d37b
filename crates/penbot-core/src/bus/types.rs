//! Bus event types — messages flowing between channels and the dispatcher.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a chat channel.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "discord", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier (the Discord channel id).
    pub chat_id: String,
    /// Raw text content, mentions included.
    pub content: String,
    /// Whether the bot was addressed (mentioned) in this message.
    pub addressed: bool,
    /// Guild (server) the message was posted in, if any.
    pub guild_id: Option<String>,
    /// Platform message id, used to thread the reply.
    pub message_id: Option<String>,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata (e.g. username).
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            addressed: false,
            guild_id: None,
            message_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Mark the message as addressed to the bot.
    pub fn addressed(mut self) -> Self {
        self.addressed = true;
        self
    }

    pub fn in_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    /// Build a reply to this message on the same channel and chat.
    pub fn reply(&self, content: impl Into<String>) -> OutboundMessage {
        let mut out = OutboundMessage::new(&self.channel, &self.chat_id, content);
        out.reply_to = self.message_id.clone();
        out
    }
}

/// An outbound message from the dispatcher to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
    /// Channel-specific metadata.
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            metadata: HashMap::new(),
        }
    }
}
