//! `penbot status` — show configuration and provider status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use penbot_core::config::{get_config_path, Config};
use penbot_providers::PROVIDERS;

fn mark(ok: bool, detail: &str) -> String {
    if ok {
        format!("{} {detail}", "✓".green())
    } else {
        format!("{}", "· not set".dimmed())
    }
}

/// Render the status report for `config`.
pub fn report(config: &Config, config_path: &Path) -> Vec<String> {
    let mut lines = Vec::new();

    let found = config_path.exists();
    lines.push(format!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if found {
            "✓".green().to_string()
        } else {
            "(not found, using env + defaults)".dimmed().to_string()
        }
    ));

    lines.push(String::new());
    lines.push(format!("  {}", "Discord:".bold()));
    let discord = &config.discord;
    lines.push(format!("    {:<20} {}", "Token", mark(!discord.token.trim().is_empty(), "(set)")));
    lines.push(format!(
        "    {:<20} {}",
        "Owner id",
        mark(!discord.owner_id.trim().is_empty(), &discord.owner_id)
    ));
    lines.push(format!("    {:<20} {}", "Prefix", discord.command_prefix));

    lines.push(String::new());
    lines.push(format!("  {}", "Providers (fallback order):".bold()));
    for spec in PROVIDERS {
        let provider = spec.config(config);
        let base = provider
            .api_base
            .as_deref()
            .or(spec.default_api_base)
            .unwrap_or("-");
        let status = if provider.is_configured() {
            format!("{} key set, {}", "✓".green(), base.dimmed())
        } else {
            format!("{} (set {})", "· disabled".dimmed(), spec.env_key)
        };
        lines.push(format!("    {:<20} {}", spec.display_name, status));
        for model in &provider.models {
            lines.push(format!("      - {model}"));
        }
    }

    let chat = &config.chat;
    lines.push(String::new());
    lines.push(format!("  {}", "Chat:".bold()));
    lines.push(format!(
        "    {:<20} {}",
        "Persona",
        if chat.persona().is_some() { "on" } else { "off" }
    ));
    lines.push(format!("    {:<20} {} entries", "History", chat.history_limit));
    lines.push(format!("    {:<20} {} chars", "Reply cap", chat.reply_cap));
    lines.push(format!("    {:<20} {}s", "Request timeout", chat.request_timeout_secs));
    lines.push(format!(
        "    {:<20} {}s (max {}s)",
        "429 cooldown", chat.rate_limit_cooldown_secs, chat.max_cooldown_secs
    ));

    if let Err(e) = config.validate() {
        lines.push(String::new());
        lines.push(format!("  {} {e}", "Gateway cannot start:".red().bold()));
    }

    lines
}

/// Run the status command.
pub fn run(config: &Config, explicit_path: Option<&Path>) -> Result<()> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);

    println!();
    println!("{}", "PenBot Status".cyan().bold());
    println!();
    for line in report(config, &path) {
        println!("{line}");
    }
    println!();
    Ok(())
}
