//! Dispatcher — turns inbound chat messages into replies.
//!
//! Prefix commands go to the [`CommandHandler`]. Messages addressed to the
//! bot have their mention tokens removed and are answered through the
//! [`FallbackOrchestrator`]. Everything else is ignored.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, error, info};

use penbot_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use penbot_core::utils::truncate_reply;
use penbot_providers::FallbackOrchestrator;

use crate::commands::CommandHandler;

/// Reply to a bare mention.
pub const GREETING: &str = "Yes? How can I help?";

/// Default reply cap, leaving room for the truncation marker.
pub const DEFAULT_REPLY_CAP: usize = 1950;

/// User, nickname and role mention tokens.
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[!&]?\d+>").expect("mention pattern is valid"));

/// Remove every mention token and trim what is left.
pub fn strip_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "").trim().to_string()
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

pub struct Dispatcher {
    bus: Arc<MessageBus>,
    orchestrator: Arc<FallbackOrchestrator>,
    commands: Option<Arc<CommandHandler>>,
    reply_cap: usize,
}

impl Dispatcher {
    pub fn new(bus: Arc<MessageBus>, orchestrator: Arc<FallbackOrchestrator>) -> Self {
        Self {
            bus,
            orchestrator,
            commands: None,
            reply_cap: DEFAULT_REPLY_CAP,
        }
    }

    /// Route prefix commands to `commands`.
    pub fn with_commands(mut self, commands: Arc<CommandHandler>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_reply_cap(mut self, reply_cap: usize) -> Self {
        self.reply_cap = reply_cap;
        self
    }

    /// Work out the reply to `msg`, if any.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        if let Some(commands) = self.commands.as_ref().filter(|c| c.is_command(&msg.content)) {
            return commands
                .handle(msg)
                .await
                .map(|text| OutboundMessage::new(&msg.channel, &msg.chat_id, text));
        }

        if !msg.addressed {
            return None;
        }

        let text = strip_mentions(&msg.content);
        if text.is_empty() {
            debug!(sender = %msg.sender_id, "bare mention, greeting");
            return Some(msg.reply(GREETING));
        }

        let reply = self.orchestrator.respond(&msg.sender_id, &text).await;
        info!(
            sender = %msg.sender_id,
            chat_id = %msg.chat_id,
            outcome = ?reply.outcome,
            chars = reply.text.chars().count(),
            "reply ready"
        );
        Some(msg.reply(truncate_reply(&reply.text, self.reply_cap)))
    }

    /// Consume the inbound queue until it closes, one task per message.
    pub async fn run(self: Arc<Self>) {
        info!("dispatcher started, waiting for messages");
        while let Some(msg) = self.bus.consume_inbound().await {
            debug!(channel = %msg.channel, sender = %msg.sender_id, "received message");
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Some(reply) = this.handle(&msg).await {
                    if let Err(e) = this.bus.publish_outbound(reply).await {
                        error!(error = %e, "failed to publish reply");
                    }
                }
            });
        }
        info!("inbound channel closed, dispatcher exiting");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use penbot_core::moderation::{
        ChannelCategory, CreatedChannel, GuildInfo, GuildModerator, ModerationError,
    };
    use penbot_core::utils::TRUNCATION_MARKER;
    use penbot_core::ProviderFamily;
    use penbot_providers::{ChatProvider, ProviderResult};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers with a fixed text and records what it was asked.
    struct EchoProvider {
        reply: String,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl EchoProvider {
        fn new(reply: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        async fn send(&self, user_id: &str, text: &str) -> ProviderResult {
            self.seen.lock().unwrap().push((user_id.into(), text.into()));
            ProviderResult::success(self.reply.clone())
        }
        fn display_name(&self) -> &str {
            "Echo"
        }
        fn model(&self) -> &str {
            "echo-1"
        }
        fn family(&self) -> ProviderFamily {
            ProviderFamily::OpenRouter
        }
    }

    struct InfoOnly;

    #[async_trait]
    impl GuildModerator for InfoOnly {
        async fn ban(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), ModerationError> {
            Err(ModerationError::Forbidden)
        }
        async fn set_timeout(
            &self,
            _: &str,
            _: &str,
            _: Option<DateTime<Utc>>,
            _: Option<&str>,
        ) -> Result<(), ModerationError> {
            Err(ModerationError::Forbidden)
        }
        async fn find_category(&self, _: &str, _: &str) -> Result<Option<ChannelCategory>, ModerationError> {
            Ok(None)
        }
        async fn create_text_channel(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<CreatedChannel, ModerationError> {
            Err(ModerationError::Forbidden)
        }
        async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, ModerationError> {
            Ok(GuildInfo {
                id: guild_id.into(),
                name: "Pen Club".into(),
                ..GuildInfo::default()
            })
        }
    }

    fn dispatcher(provider: Arc<EchoProvider>) -> (Arc<MessageBus>, Dispatcher) {
        let bus = Arc::new(MessageBus::new(16));
        let orchestrator = Arc::new(FallbackOrchestrator::new(vec![provider as Arc<dyn ChatProvider>]));
        let commands = Arc::new(CommandHandler::new(Arc::new(InfoOnly), "100", "!"));
        let d = Dispatcher::new(bus.clone(), orchestrator).with_commands(commands);
        (bus, d)
    }

    fn mention(content: &str) -> InboundMessage {
        let mut msg = InboundMessage::new("discord", "42", "ch1", content)
            .in_guild("g1")
            .addressed();
        msg.message_id = Some("m1".into());
        msg
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@999> hello"), "hello");
        assert_eq!(strip_mentions("<@!999>  what's up <@&55>?"), "what's up ?");
        assert_eq!(strip_mentions("<@999> <@123>"), "");
        assert_eq!(strip_mentions("email me@example.com"), "email me@example.com");
    }

    #[tokio::test]
    async fn test_bare_mention_greets_without_provider() {
        let provider = EchoProvider::new("never");
        let (_, d) = dispatcher(provider.clone());

        let reply = d.handle(&mention("  <@999>  ")).await.unwrap();
        assert_eq!(reply.content, GREETING);
        assert_eq!(reply.reply_to.as_deref(), Some("m1"));
        assert!(provider.seen().is_empty());
    }

    #[tokio::test]
    async fn test_addressed_message_reaches_provider() {
        let provider = EchoProvider::new("Hi there!");
        let (_, d) = dispatcher(provider.clone());

        let reply = d.handle(&mention("<@999> hello bot")).await.unwrap();
        assert_eq!(reply.content, "Hi there!");
        assert_eq!(reply.channel, "discord");
        assert_eq!(reply.chat_id, "ch1");
        assert_eq!(reply.reply_to.as_deref(), Some("m1"));
        assert_eq!(provider.seen(), vec![("42".to_string(), "hello bot".to_string())]);
    }

    #[tokio::test]
    async fn test_unaddressed_message_ignored() {
        let provider = EchoProvider::new("never");
        let (_, d) = dispatcher(provider.clone());

        let msg = InboundMessage::new("discord", "42", "ch1", "just chatting").in_guild("g1");
        assert!(d.handle(&msg).await.is_none());
        assert!(provider.seen().is_empty());
    }

    #[tokio::test]
    async fn test_long_reply_truncated_with_marker() {
        let provider = EchoProvider::new("x".repeat(5000));
        let (_, d) = dispatcher(provider);
        let d = d.with_reply_cap(1950);

        let reply = d.handle(&mention("<@999> essay please")).await.unwrap();
        assert!(reply.content.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            reply.content.chars().count(),
            1950 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn test_prefix_command_routed_even_when_addressed() {
        let provider = EchoProvider::new("never");
        let (_, d) = dispatcher(provider.clone());

        let reply = d.handle(&mention("!serverinfo")).await.unwrap();
        assert!(reply.content.starts_with("**Pen Club**"));
        assert_eq!(reply.reply_to, None);
        assert!(provider.seen().is_empty());

        // Unknown commands stay silent and never reach the model.
        assert!(d.handle(&mention("!dance <@999>")).await.is_none());
        assert!(provider.seen().is_empty());
    }

    #[tokio::test]
    async fn test_run_publishes_replies() {
        let provider = EchoProvider::new("pong");
        let (bus, d) = dispatcher(provider);
        let d = Arc::new(d);
        let runner = tokio::spawn(d.run());

        bus.publish_inbound(mention("<@999> ping")).await.unwrap();
        let out = tokio::time::timeout(Duration::from_secs(2), bus.consume_outbound())
            .await
            .expect("reply published")
            .unwrap();
        assert_eq!(out.content, "pong");
        runner.abort();
    }
}
