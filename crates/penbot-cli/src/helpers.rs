//! Shared CLI helpers — runtime wiring, response printing, banner.

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use penbot_agent::Dispatcher;
use penbot_core::bus::MessageBus;
use penbot_core::config::Config;
use penbot_core::{ConversationStore, ProviderFamily};
use penbot_providers::{build_chain, FallbackOrchestrator};

/// Inbound/outbound queue depth.
const BUS_CAPACITY: usize = 100;

/// Everything a front end needs to answer messages.
pub struct Runtime {
    pub bus: Arc<MessageBus>,
    pub store: Arc<ConversationStore>,
    pub orchestrator: Arc<FallbackOrchestrator>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    /// Build the store, the provider chain, and a dispatcher without commands.
    pub fn build(config: &Config) -> Result<Self> {
        let bus = Arc::new(MessageBus::new(BUS_CAPACITY));
        let (store, orchestrator) = build_orchestrator(config)?;
        let dispatcher = Arc::new(
            Dispatcher::new(bus.clone(), orchestrator.clone()).with_reply_cap(config.chat.reply_cap),
        );
        Ok(Self {
            bus,
            store,
            orchestrator,
            dispatcher,
        })
    }
}

/// Conversation store plus the fallback chain over it.
pub fn build_orchestrator(
    config: &Config,
) -> Result<(Arc<ConversationStore>, Arc<FallbackOrchestrator>)> {
    let chat = &config.chat;

    let mut store =
        ConversationStore::new(chat.history_limit).with_max_partitions(chat.max_sessions);
    if let Some(persona) = chat.persona() {
        store = store.with_persona(ProviderFamily::OpenRouter, persona);
    }
    let store = Arc::new(store);

    let chain = build_chain(config, store.clone())?;
    info!(
        chain = ?chain.iter().map(|p| p.label()).collect::<Vec<_>>(),
        "provider chain ready"
    );

    let orchestrator = FallbackOrchestrator::new(chain).with_cooldowns(
        seconds(chat.rate_limit_cooldown_secs),
        seconds(chat.max_cooldown_secs),
    );
    Ok((store, Arc::new(orchestrator)))
}

/// Config seconds as a chrono duration, saturating on absurd values.
pub fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Print a bot reply to stdout.
pub fn print_response(response: &str) {
    println!();
    println!("{}", "PenAI".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();
}

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "PenBot".cyan().bold(), version.dimmed());
    println!(
        "{}",
        "Type a message, \"/reset\" to start over, or \"exit\" to quit.".dimmed()
    );
    println!();
}

/// Print a "thinking" placeholder while the chain works.
pub fn print_thinking() {
    eprint!("{}", "thinking...".dimmed());
}

pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
