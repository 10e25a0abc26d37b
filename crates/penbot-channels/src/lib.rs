//! PenBot Channels — chat platform integrations.
//!
//! - **base**: the `Channel` trait every platform adapter implements
//! - **manager**: `ChannelManager`, which runs channels and routes outbound replies
//! - **discord**: Gateway WebSocket in, REST out; also the guild moderator

pub mod base;
pub mod manager;

#[cfg(feature = "discord")]
pub mod discord;

pub use base::Channel;
pub use manager::ChannelManager;

#[cfg(feature = "discord")]
pub use discord::DiscordChannel;
