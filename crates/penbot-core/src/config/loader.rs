//! Config loader — reads `~/.penbot/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.penbot/config.json`
//! 3. Environment variables (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ProviderConfig};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the given or default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed;
/// `Config::validate` is what decides whether the result is usable.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    apply_env_overrides(load_file(&config_path))
}

/// Read the JSON layer only.
fn load_file(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Apply process environment overrides on top of a loaded config.
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Supported variables:
/// - `DISCORD_BOT_TOKEN` → `discord.token`
/// - `BOT_OWNER_ID` → `discord.owner_id`
/// - `OPENROUTER_API_KEY` (or `DEEPSEEK_API_KEY`) → `providers.openrouter.api_key`
/// - `OPENROUTER_API_URL` (or `DEEPSEEK_API_URL`) → `providers.openrouter.api_base`
/// - `GEMINI_API_KEY` / `GEMINI_API_URL` → `providers.gemini`
/// - `PENBOT_PROVIDERS__<NAME>__MODELS` → comma-separated model list
/// - `PENBOT_DISCORD__COMMAND_PREFIX`
/// - `PENBOT_CHAT__<FIELD>` → `chat.<field>`
fn apply_overrides<F>(mut config: Config, var: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let first = |keys: &[&str]| keys.iter().find_map(|k| var(k).filter(|v| !v.is_empty()));

    // Discord
    if let Some(val) = first(&["DISCORD_BOT_TOKEN"]) {
        config.discord.token = val;
    }
    if let Some(val) = first(&["BOT_OWNER_ID"]) {
        config.discord.owner_id = val;
    }
    if let Some(val) = first(&["PENBOT_DISCORD__COMMAND_PREFIX"]) {
        config.discord.command_prefix = val;
    }

    // Providers
    if let Some(val) = first(&["OPENROUTER_API_KEY", "DEEPSEEK_API_KEY"]) {
        config.providers.openrouter.api_key = val;
    }
    if let Some(val) = first(&["OPENROUTER_API_URL", "DEEPSEEK_API_URL"]) {
        config.providers.openrouter.api_base = Some(val);
    }
    if let Some(val) = first(&["GEMINI_API_KEY"]) {
        config.providers.gemini.api_key = val;
    }
    if let Some(val) = first(&["GEMINI_API_URL"]) {
        config.providers.gemini.api_base = Some(val);
    }
    apply_models_env(&mut config.providers.openrouter, first(&["PENBOT_PROVIDERS__OPENROUTER__MODELS"]));
    apply_models_env(&mut config.providers.gemini, first(&["PENBOT_PROVIDERS__GEMINI__MODELS"]));

    // Chat tuning
    let chat = &mut config.chat;
    if let Some(val) = first(&["PENBOT_CHAT__PERSONA"]) {
        chat.persona = val;
    }
    parse_into(first(&["PENBOT_CHAT__HISTORY_LIMIT"]), &mut chat.history_limit);
    parse_into(first(&["PENBOT_CHAT__REPLY_CAP"]), &mut chat.reply_cap);
    parse_into(first(&["PENBOT_CHAT__REQUEST_TIMEOUT_SECS"]), &mut chat.request_timeout_secs);
    parse_into(first(&["PENBOT_CHAT__SESSION_IDLE_SECS"]), &mut chat.session_idle_secs);
    parse_into(first(&["PENBOT_CHAT__MAX_SESSIONS"]), &mut chat.max_sessions);
    parse_into(first(&["PENBOT_CHAT__RATE_LIMIT_COOLDOWN_SECS"]), &mut chat.rate_limit_cooldown_secs);
    parse_into(first(&["PENBOT_CHAT__MAX_COOLDOWN_SECS"]), &mut chat.max_cooldown_secs);

    config
}

fn apply_models_env(provider: &mut ProviderConfig, val: Option<String>) {
    if let Some(val) = val {
        provider.models = val
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
    }
}

/// Overwrite `slot` when `val` parses; a malformed value is logged and ignored.
fn parse_into<T: std::str::FromStr>(val: Option<String>, slot: &mut T) {
    if let Some(val) = val {
        match val.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(value = %val, "Ignoring unparseable numeric config override"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
