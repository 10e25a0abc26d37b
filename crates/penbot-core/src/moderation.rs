//! Guild moderation capability.
//!
//! The command layer never talks to the chat platform directly; it goes
//! through [`GuildModerator`], which the Discord channel implements over REST.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Errors a moderation call can surface. Rendered back into chat, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// The bot lacks the platform permission (or role position) for the action.
    #[error("missing permission")]
    Forbidden,
    /// Unknown guild, member, or channel.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other platform failure.
    #[error("{0}")]
    Http(String),
}

/// Summary of a guild, for the `serverinfo` command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_count: Option<u64>,
    pub channel_count: Option<usize>,
    pub role_count: usize,
}

/// A channel category, as resolved by [`GuildModerator::find_category`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelCategory {
    pub id: String,
    pub name: String,
}

/// A freshly created text channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedChannel {
    pub id: String,
    pub name: String,
}

/// Moderation actions against a single guild.
#[async_trait]
pub trait GuildModerator: Send + Sync {
    /// Ban `user_id` from the guild.
    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), ModerationError>;

    /// Time out `user_id` until `until`, or lift the timeout when `None`.
    async fn set_timeout(
        &self,
        guild_id: &str,
        user_id: &str,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<(), ModerationError>;

    /// Resolve a category by id or case-insensitive name. `Ok(None)` if absent.
    async fn find_category(
        &self,
        guild_id: &str,
        name_or_id: &str,
    ) -> Result<Option<ChannelCategory>, ModerationError>;

    async fn create_text_channel(
        &self,
        guild_id: &str,
        name: &str,
        category_id: Option<&str>,
    ) -> Result<CreatedChannel, ModerationError>;

    async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, ModerationError>;
}
