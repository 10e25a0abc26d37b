//! Gateway command — wires Discord, the dispatcher, and the provider chain.
//!
//! Startup sequence:
//! 1. Validate config (fatal on missing credentials)
//! 2. Build store, provider chain, dispatcher
//! 3. Register the Discord channel; it also serves as the guild moderator
//! 4. Run dispatcher, channels, and the idle-session sweep until Ctrl+C

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use penbot_agent::{CommandHandler, Dispatcher};
use penbot_channels::{ChannelManager, DiscordChannel};
use penbot_core::config::{get_config_path, Config};
use penbot_core::ConversationStore;
use penbot_providers::FallbackOrchestrator;

use crate::helpers::{self, Runtime};

/// How often idle conversations are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Run the gateway until Ctrl+C.
pub async fn run(config: Config) -> Result<()> {
    config.validate().context("invalid configuration")?;

    println!();
    println!("  PenBot gateway");
    println!();

    let runtime = Runtime::build(&config)?;

    let discord = Arc::new(
        DiscordChannel::new(&config.discord, runtime.bus.clone())
            .context("failed to create discord channel")?,
    );
    let commands = Arc::new(CommandHandler::new(
        discord.clone(),
        config.discord.owner_id.clone(),
        config.discord.command_prefix.clone(),
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(runtime.bus.clone(), runtime.orchestrator.clone())
            .with_commands(commands)
            .with_reply_cap(config.chat.reply_cap),
    );

    let mut channel_manager = ChannelManager::new(runtime.bus.clone());
    channel_manager.register(discord);

    let chain: Vec<String> = runtime.orchestrator.chain().iter().map(|p| p.label()).collect();
    info!(
        config = %get_config_path().display(),
        chain = ?chain,
        prefix = %config.discord.command_prefix,
        "gateway starting"
    );

    println!("  Primary:   {}", chain.first().map_or("-", String::as_str));
    for backup in chain.iter().skip(1) {
        println!("  Backup:    {backup}");
    }
    println!("  Channels:  {}", channel_manager.channel_names().join(", "));
    println!("  Prefix:    {}", config.discord.command_prefix);
    println!();
    println!("  Ctrl+C to stop");
    println!();

    let handles = channel_manager.start_all();
    let sweeper = tokio::spawn(sweep_idle(
        runtime.store.clone(),
        runtime.orchestrator.clone(),
        helpers::seconds(config.chat.session_idle_secs),
    ));

    tokio::select! {
        _ = dispatcher.run() => {
            info!("dispatcher exited");
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
        }
    }

    sweeper.abort();
    channel_manager.stop_all().await;
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

/// Periodically drop conversations nobody has touched for `max_idle`.
async fn sweep_idle(
    store: Arc<ConversationStore>,
    orchestrator: Arc<FallbackOrchestrator>,
    max_idle: chrono::Duration,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let histories = store.evict_idle(max_idle);
        let sessions = orchestrator.evict_idle(max_idle);
        if histories + sessions > 0 {
            info!(histories, sessions, "swept idle conversations");
        } else {
            debug!(live = store.len(), "idle sweep found nothing");
        }
    }
}
