//! PenBot CLI — entry point.
//!
//! # Commands
//!
//! - `penbot gateway` — connect to Discord and answer mentions
//! - `penbot chat [-m MESSAGE] [-u USER]` — talk to the provider chain locally
//! - `penbot status` — show configuration and provider status

mod gateway;
mod helpers;
mod repl;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use penbot_core::bus::InboundMessage;
use penbot_core::config::load_config;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// PenBot — a Discord chat bot with LLM provider fallback
#[derive(Parser)]
#[command(name = "penbot", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.penbot/config.json)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and serve until Ctrl+C
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Emit logs as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Chat with the provider chain (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// User id the conversation is kept under
        #[arg(short, long, default_value = "cli-user")]
        user: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Gateway { logs, json } => {
            init_logging(logs, json);
            gateway::run(config).await
        }
        Commands::Chat {
            message,
            user,
            logs,
        } => {
            init_logging(logs, false);
            config
                .validate_providers()
                .context("invalid configuration")?;
            let runtime = helpers::Runtime::build(&config)?;

            match message {
                Some(text) => {
                    info!(user = %user, "processing single message");
                    let msg = InboundMessage::new("cli", &user, "cli", text).addressed();
                    let reply = runtime.dispatcher.handle(&msg).await;
                    helpers::print_response(reply.as_ref().map_or("", |r| r.content.as_str()));
                    Ok(())
                }
                None => repl::run(&runtime, &user).await,
            }
        }
        Commands::Status => status::run(&config, cli.config.as_deref()),
    }
}

/// Initialize tracing. `RUST_LOG` wins over the flags when set.
fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("penbot=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
