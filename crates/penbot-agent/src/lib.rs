//! PenBot Agent — turns chat traffic into replies.
//!
//! - **dispatcher**: mention handling, provider fallback, reply truncation
//! - **commands**: prefix moderation commands (`!ban`, `!mute`, ...)

pub mod commands;
pub mod dispatcher;

pub use commands::{Command, CommandError, CommandHandler, CommandKind};
pub use dispatcher::{strip_mentions, Dispatcher, GREETING};
