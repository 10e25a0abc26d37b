//! Interactive REPL — chat with the provider chain from a terminal.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! Each line goes through the same dispatcher as a Discord mention.

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use penbot_core::bus::InboundMessage;

use crate::helpers::{self, Runtime};

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Forget the conversation so far.
const RESET_COMMAND: &str = "/reset";

/// Run the interactive REPL loop as `user_id`.
pub async fn run(runtime: &Runtime, user_id: &str) -> Result<()> {
    helpers::print_banner();

    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_exit_command(trimmed) {
            println!("\nGoodbye!");
            break;
        }

        let _ = editor.add_history_entry(&input);

        if is_reset_command(trimmed) {
            runtime.orchestrator.reset(user_id).await;
            println!("{}", "Conversation history cleared.".dimmed());
            continue;
        }

        debug!(user = user_id, chars = trimmed.chars().count(), "processing input");
        helpers::print_thinking();

        let msg = InboundMessage::new("cli", user_id, "cli", trimmed).addressed();
        let reply = runtime.dispatcher.handle(&msg).await;

        helpers::clear_thinking();
        helpers::print_response(reply.as_ref().map_or("", |r| r.content.as_str()));
    }

    save_history(&mut editor);
    Ok(())
}

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!(path = %history_path.display(), "loaded REPL history");
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!(error = %e, "failed to save history");
    }
}

/// `~/.penbot/history/chat_history`
fn history_path() -> std::path::PathBuf {
    penbot_core::utils::get_data_path()
        .join("history")
        .join("chat_history")
}

fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

fn is_reset_command(input: &str) -> bool {
    input.eq_ignore_ascii_case(RESET_COMMAND)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
