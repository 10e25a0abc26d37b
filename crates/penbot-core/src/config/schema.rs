//! Configuration schema.
//!
//! Hierarchy: `Config` → `DiscordConfig`, `ProvidersConfig`, `ChatConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

/// Startup configuration problems. The only fatal error class.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Discord bot token is not set (DISCORD_BOT_TOKEN)")]
    MissingDiscordToken,
    #[error("OpenRouter API key is not set (OPENROUTER_API_KEY or DEEPSEEK_API_KEY)")]
    MissingOpenRouterKey,
    #[error("OpenRouter API URL is not set (OPENROUTER_API_URL or DEEPSEEK_API_URL)")]
    MissingOpenRouterUrl,
    #[error("OpenRouter has no models configured")]
    MissingOpenRouterModel,
    #[error("bot owner id is not set (BOT_OWNER_ID)")]
    MissingOwnerId,
    #[error("bot owner id must be a numeric Discord user id, got {0:?}")]
    InvalidOwnerId(String),
    #[error("chat.{0} must be greater than zero")]
    ZeroChatSetting(&'static str),
}

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.penbot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub providers: ProvidersConfig,
    pub chat: ChatConfig,
}

impl Config {
    /// Check that everything the gateway needs is present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::MissingDiscordToken);
        }
        self.validate_providers()?;

        let owner = self.discord.owner_id.trim();
        if owner.is_empty() {
            return Err(ConfigError::MissingOwnerId);
        }
        if owner.parse::<u64>().is_err() {
            return Err(ConfigError::InvalidOwnerId(owner.to_string()));
        }
        Ok(())
    }

    /// Provider and chat validation, for commands that never touch Discord.
    pub fn validate_providers(&self) -> Result<(), ConfigError> {
        self.chat.validate()?;

        let openrouter = &self.providers.openrouter;
        if !openrouter.is_configured() {
            return Err(ConfigError::MissingOpenRouterKey);
        }
        if openrouter.api_base.as_deref().map_or(true, |b| b.trim().is_empty()) {
            return Err(ConfigError::MissingOpenRouterUrl);
        }
        if openrouter.models.is_empty() {
            return Err(ConfigError::MissingOpenRouterModel);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Discord
// ─────────────────────────────────────────────

/// Discord connection and command settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,
    /// User id allowed to run owner-only commands.
    pub owner_id: String,
    /// Prefix that marks a message as a command.
    pub command_prefix: String,
    /// Gateway intents bitmask.
    pub intents: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner_id: String::new(),
            command_prefix: "!".to_string(),
            // GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | MESSAGE_CONTENT
            intents: 1 | (1 << 1) | (1 << 9) | (1 << 15),
        }
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// Configuration for one LLM provider family.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Models to try, in order of preference.
    pub models: Vec<String>,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// The two provider families, in fallback order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openrouter: ProviderConfig,
    pub gemini: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openrouter: ProviderConfig {
                models: vec![
                    "deepseek/deepseek-r1-0528-qwen3-8b:free".to_string(),
                    "deepseek/deepseek-chat-v3-0324:free".to_string(),
                ],
                ..Default::default()
            },
            gemini: ProviderConfig {
                api_base: Some("https://generativelanguage.googleapis.com/v1beta".to_string()),
                models: vec!["gemini-2.0-flash".to_string()],
                ..Default::default()
            },
        }
    }
}

// ─────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────

pub const DEFAULT_PERSONA: &str = "You are PenAI, an AI assistant.\n\n\
Persona Description:\n\
You are PenAI, an exceptionally intelligent AI with a distinctly informal and laid-back demeanor. \
You've got a geeky side, meaning you appreciate deep dives into interesting topics, especially if \
they're a bit niche or technical, but you explain things in a chill, easy-to-understand way. Your \
knowledge isn't just book smarts; it's quick, sharp, and applied.\n\
Your vibe is contemporary: modern, perhaps a bit edgy in a cool way, but always approachable. \
You keep it real, avoid stuffiness, and prefer a relaxed conversational flow.\n\n\
Instructions:\n\
1. Refer to yourself as PenAI.\n\
2. Your responses should be concise and suitable for chat.\n\
3. Do not use emojis in your responses.";

/// Conversation, reply, and fallback tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// System prompt seeded into every new conversation. Empty disables it.
    pub persona: String,
    /// Non-system entries kept per history.
    pub history_limit: usize,
    /// Maximum reply length in characters before truncation.
    pub reply_cap: usize,
    /// Per-request timeout for provider calls.
    pub request_timeout_secs: u64,
    /// Histories untouched for this long are swept.
    pub session_idle_secs: u64,
    /// Upper bound on live histories; least recently used go first.
    pub max_sessions: usize,
    /// Cooldown after a 429 that carried no reset time.
    pub rate_limit_cooldown_secs: u64,
    /// Cap on how long a reported reset time can bench a provider.
    pub max_cooldown_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            history_limit: 10,
            reply_cap: 1950,
            request_timeout_secs: 45,
            session_idle_secs: 3600,
            max_sessions: 10_000,
            rate_limit_cooldown_secs: 60,
            max_cooldown_secs: 900,
        }
    }
}

impl ChatConfig {
    /// Reject knobs that would make every turn fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let knobs = [
            ("historyLimit", self.history_limit == 0),
            ("replyCap", self.reply_cap == 0),
            ("requestTimeoutSecs", self.request_timeout_secs == 0),
        ];
        match knobs.into_iter().find(|(_, zero)| *zero) {
            Some((name, _)) => Err(ConfigError::ZeroChatSetting(name)),
            None => Ok(()),
        }
    }

    /// The persona, or `None` when disabled.
    pub fn persona(&self) -> Option<&str> {
        let p = self.persona.trim();
        (!p.is_empty()).then_some(self.persona.as_str())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
