//! Channel trait — the interface every chat platform adapter implements.
//!
//! - `start()` — connect and publish inbound messages to the bus (long-running)
//! - `stop()` — graceful shutdown
//! - `send()` — deliver one outbound reply
//! - `name()` — matches `InboundMessage.channel` / `OutboundMessage.channel`

use async_trait::async_trait;
use penbot_core::bus::OutboundMessage;

/// Every chat channel implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` and routes replies by name.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "discord").
    fn name(&self) -> &str;

    /// Connect and listen until `stop()` is called.
    async fn start(&self) -> anyhow::Result<()>;

    /// Graceful shutdown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver a reply. Called by the outbound router.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}
