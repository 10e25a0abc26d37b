//! Prefix commands — guild moderation and help.
//!
//! A command message looks like `!mute @user 10m spamming`. Parsing happens
//! in two steps so that owner-only commands reject strangers before their
//! arguments are even looked at.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use penbot_core::bus::InboundMessage;
use penbot_core::moderation::{GuildModerator, ModerationError};

pub const NOT_OWNER_MESSAGE: &str = "Sorry, only the bot owner can use this command.";

const DEFAULT_REASON: &str = "No reason provided.";

/// Longest timeout Discord accepts.
const MAX_MUTE_SECS: i64 = 28 * 24 * 60 * 60;

// ─────────────────────────────────────────────
// Command kinds and arguments
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Ban,
    Mute,
    Unmute,
    CreateChannel,
    ServerInfo,
    Help,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Ban,
        CommandKind::Mute,
        CommandKind::Unmute,
        CommandKind::CreateChannel,
        CommandKind::ServerInfo,
        CommandKind::Help,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Ban => "ban",
            CommandKind::Mute => "mute",
            CommandKind::Unmute => "unmute",
            CommandKind::CreateChannel => "createchannel",
            CommandKind::ServerInfo => "serverinfo",
            CommandKind::Help => "help",
        }
    }

    pub fn owner_only(self) -> bool {
        !matches!(self, CommandKind::ServerInfo | CommandKind::Help)
    }

    /// One-line help for `prefix`.
    fn help_line(self, prefix: &str) -> String {
        match self {
            CommandKind::Ban => format!("Bans a user. Usage: {prefix}ban @user [reason]"),
            CommandKind::Mute => {
                format!("Timeouts a user. Usage: {prefix}mute @user duration[s/m/h/d] [reason]")
            }
            CommandKind::Unmute => format!("Removes timeout. Usage: {prefix}unmute @user"),
            CommandKind::CreateChannel => format!(
                "Creates a text channel. Usage: {prefix}createchannel channel-name [Category Name or ID]"
            ),
            CommandKind::ServerInfo => format!("Shows server details. Usage: {prefix}serverinfo"),
            CommandKind::Help => format!("Shows this message. Usage: {prefix}help [command]"),
        }
    }
}

/// A fully parsed command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ban {
        target: String,
        reason: String,
    },
    Mute {
        target: String,
        duration: Duration,
        /// The duration as typed, echoed back in the reply.
        label: String,
        reason: String,
    },
    Unmute {
        target: String,
    },
    CreateChannel {
        name: String,
        category: Option<String>,
    },
    ServerInfo,
    Help {
        topic: Option<String>,
    },
}

/// Why a command's arguments were rejected. Each renders as a chat reply.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("missing argument `{param}` for `{command}`")]
    MissingArgument {
        command: &'static str,
        param: &'static str,
    },
    #[error("invalid argument for `{command}`")]
    BadArgument { command: &'static str },
    #[error("Invalid duration value (e.g., 10m, 1h).")]
    InvalidDurationValue,
    #[error("Invalid duration unit (s, m, h, or d).")]
    InvalidDurationUnit,
    #[error("Duration must be positive and not exceed 28 days.")]
    DurationOutOfRange,
}

impl CommandError {
    pub fn reply(&self, prefix: &str) -> String {
        match self {
            CommandError::MissingArgument { command, param } => {
                format!("Missing: `{param}`. Usage: `{prefix}help {command}`")
            }
            CommandError::BadArgument { command } => {
                format!("Invalid argument. Usage: `{prefix}help {command}`.")
            }
            other => other.to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────

/// Split off the first argument. A leading `"` groups words up to the next `"`.
fn next_arg(input: &str) -> Option<(String, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    if let Some(quoted) = input.strip_prefix('"') {
        if let Some(end) = quoted.find('"') {
            return Some((quoted[..end].to_string(), &quoted[end + 1..]));
        }
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((input[..end].to_string(), &input[end..]))
}

/// Accept `<@id>`, `<@!id>`, or a bare numeric id.
pub fn parse_user_target(raw: &str) -> Option<String> {
    let id = raw
        .strip_prefix("<@")
        .and_then(|r| r.strip_suffix('>'))
        .map(|r| r.strip_prefix('!').unwrap_or(r))
        .unwrap_or(raw);
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

/// `<n>[s|m|h|d]`, positive and at most 28 days.
pub fn parse_duration(raw: &str) -> Result<Duration, CommandError> {
    let Some(unit) = raw.chars().last() else {
        return Err(CommandError::InvalidDurationValue);
    };
    let value: i64 = raw[..raw.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| CommandError::InvalidDurationValue)?;

    let secs = match unit.to_ascii_lowercase() {
        's' => Some(value),
        'm' => value.checked_mul(60),
        'h' => value.checked_mul(60 * 60),
        'd' => value.checked_mul(24 * 60 * 60),
        _ => return Err(CommandError::InvalidDurationUnit),
    };

    match secs {
        Some(secs) if secs > 0 && secs <= MAX_MUTE_SECS => Ok(Duration::seconds(secs)),
        _ => Err(CommandError::DurationOutOfRange),
    }
}

fn rest_or_default(rest: &str) -> String {
    match rest.trim() {
        "" => DEFAULT_REASON.to_string(),
        r => r.to_string(),
    }
}

/// Split `body` (text after the prefix) into a command and its raw arguments.
pub fn split_command(body: &str) -> Option<(CommandKind, &str)> {
    let body = body.trim_start();
    let end = body.find(char::is_whitespace).unwrap_or(body.len());
    CommandKind::from_name(&body[..end]).map(|kind| (kind, &body[end..]))
}

/// Parse the arguments for `kind`.
pub fn parse_args(kind: CommandKind, args: &str) -> Result<Command, CommandError> {
    let command = kind.name();
    let target = |args: &str| -> Result<(String, String), CommandError> {
        let (raw, rest) = next_arg(args).ok_or(CommandError::MissingArgument {
            command,
            param: "member",
        })?;
        let id = parse_user_target(&raw).ok_or(CommandError::BadArgument { command })?;
        Ok((id, rest.to_string()))
    };

    match kind {
        CommandKind::Ban => {
            let (target, rest) = target(args)?;
            Ok(Command::Ban {
                target,
                reason: rest_or_default(&rest),
            })
        }
        CommandKind::Mute => {
            let (target, rest) = target(args)?;
            let (label, rest) = next_arg(&rest).ok_or(CommandError::MissingArgument {
                command,
                param: "duration_str",
            })?;
            let duration = parse_duration(&label)?;
            Ok(Command::Mute {
                target,
                duration,
                label,
                reason: rest_or_default(rest),
            })
        }
        CommandKind::Unmute => {
            let (target, _) = target(args)?;
            Ok(Command::Unmute { target })
        }
        CommandKind::CreateChannel => {
            let (raw_name, rest) = next_arg(args).ok_or(CommandError::MissingArgument {
                command,
                param: "channel_name",
            })?;
            let name = raw_name.trim().to_lowercase().replace(' ', "-");
            if name.is_empty() {
                return Err(CommandError::BadArgument { command });
            }
            let category = Some(rest.trim()).filter(|c| !c.is_empty()).map(str::to_string);
            Ok(Command::CreateChannel { name, category })
        }
        CommandKind::ServerInfo => Ok(Command::ServerInfo),
        CommandKind::Help => Ok(Command::Help {
            topic: next_arg(args).map(|(t, _)| t),
        }),
    }
}

// ─────────────────────────────────────────────
// CommandHandler
// ─────────────────────────────────────────────

/// Executes prefix commands against a [`GuildModerator`].
pub struct CommandHandler {
    moderator: Arc<dyn GuildModerator>,
    owner_id: String,
    prefix: String,
}

impl CommandHandler {
    pub fn new(
        moderator: Arc<dyn GuildModerator>,
        owner_id: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            moderator,
            owner_id: owner_id.into(),
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `content` should be treated as a command message.
    pub fn is_command(&self, content: &str) -> bool {
        !self.prefix.is_empty() && content.starts_with(&self.prefix)
    }

    /// Run the command in `msg`. `None` means stay silent.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<String> {
        let Some(guild_id) = msg.guild_id.as_deref() else {
            debug!(sender = %msg.sender_id, "command outside a guild, ignoring");
            return None;
        };
        let body = msg.content.strip_prefix(&self.prefix)?;
        let Some((kind, args)) = split_command(body) else {
            debug!(content = %msg.content, "unknown command, ignoring");
            return None;
        };

        if kind.owner_only() && msg.sender_id != self.owner_id {
            info!(command = kind.name(), sender = %msg.sender_id, "owner-only command refused");
            return Some(NOT_OWNER_MESSAGE.to_string());
        }

        let command = match parse_args(kind, args) {
            Ok(c) => c,
            Err(e) => {
                debug!(command = kind.name(), error = %e, "bad command arguments");
                return Some(e.reply(&self.prefix));
            }
        };

        info!(command = kind.name(), sender = %msg.sender_id, guild = %guild_id, "running command");
        let author = msg
            .metadata
            .get("username")
            .cloned()
            .unwrap_or_else(|| msg.sender_id.clone());
        Some(self.execute(command, guild_id, &msg.sender_id, &author).await)
    }

    fn is_protected(&self, invoker: &str, target: &str) -> bool {
        target == invoker || target == self.owner_id
    }

    async fn execute(&self, command: Command, guild_id: &str, invoker: &str, author: &str) -> String {
        match command {
            Command::Ban { target, reason } => {
                if self.is_protected(invoker, &target) {
                    return "You cannot ban yourself or the bot owner.".into();
                }
                let audit = format!("Banned by {author}. Reason: {reason}");
                match self.moderator.ban(guild_id, &target, Some(&audit)).await {
                    Ok(()) => format!("<@{target}> has been banned. Reason: {reason}"),
                    Err(e) => failure_reply(&e, "ban that user", "ban user"),
                }
            }
            Command::Mute {
                target,
                duration,
                label,
                reason,
            } => {
                if self.is_protected(invoker, &target) {
                    return "You cannot mute yourself or the bot owner.".into();
                }
                let audit = format!("Muted by {author}. Reason: {reason}");
                let until = Utc::now() + duration;
                match self
                    .moderator
                    .set_timeout(guild_id, &target, Some(until), Some(&audit))
                    .await
                {
                    Ok(()) => format!("<@{target}> has been timed out for {label}."),
                    Err(e) => failure_reply(&e, "timeout that user", "timeout user"),
                }
            }
            Command::Unmute { target } => {
                let audit = format!("Timeout removed by {author}.");
                match self
                    .moderator
                    .set_timeout(guild_id, &target, None, Some(&audit))
                    .await
                {
                    Ok(()) => format!("<@{target}> has been unmuted."),
                    Err(e) => failure_reply(&e, "modify that user's timeout", "unmute user"),
                }
            }
            Command::CreateChannel { name, category } => {
                self.create_channel(guild_id, &name, category.as_deref()).await
            }
            Command::ServerInfo => match self.moderator.guild_info(guild_id).await {
                Ok(info) => {
                    let count = |n: Option<String>| n.unwrap_or_else(|| "unknown".into());
                    format!(
                        "**{}**\nOwner: <@{}>\nMembers: {}\nChannels: {}\nRoles: {}",
                        info.name,
                        info.owner_id,
                        count(info.member_count.map(|n| n.to_string())),
                        count(info.channel_count.map(|n| n.to_string())),
                        info.role_count
                    )
                }
                Err(e) => failure_reply(&e, "view this server", "fetch server info"),
            },
            Command::Help { topic } => self.help(topic.as_deref()),
        }
    }

    async fn create_channel(&self, guild_id: &str, name: &str, category: Option<&str>) -> String {
        let mut notes = Vec::new();

        let target = match category {
            Some(input) => match self.moderator.find_category(guild_id, input).await {
                Ok(Some(found)) => Some(found),
                Ok(None) => {
                    notes.push(format!(
                        "Category '{input}' not found. Creating channel without category."
                    ));
                    None
                }
                Err(e) => {
                    warn!(guild = %guild_id, error = %e, "category lookup failed");
                    notes.push(format!(
                        "Category '{input}' not found. Creating channel without category."
                    ));
                    None
                }
            },
            None => None,
        };

        let outcome = match self
            .moderator
            .create_text_channel(guild_id, name, target.as_ref().map(|c| c.id.as_str()))
            .await
        {
            Ok(created) => match &target {
                Some(cat) => format!("Channel <#{}> created in category \"{}\"!", created.id, cat.name),
                None => format!("Channel <#{}> created!", created.id),
            },
            Err(ModerationError::Forbidden) => {
                if target.is_some() {
                    "I don't have permission to create channels in that category.".into()
                } else {
                    "I don't have permission to create channels.".into()
                }
            }
            Err(e) => format!("Failed to create channel: {e}"),
        };

        notes.push(outcome);
        notes.join("\n")
    }

    fn help(&self, topic: Option<&str>) -> String {
        let prefix = &self.prefix;
        if let Some(topic) = topic {
            let topic = topic.strip_prefix(prefix.as_str()).unwrap_or(topic);
            return match CommandKind::from_name(topic) {
                Some(kind) => kind.help_line(prefix),
                None => format!("No command called \"{topic}\" found."),
            };
        }

        let mut lines = vec!["**PenAI commands**".to_string()];
        for kind in CommandKind::ALL {
            let owner = if kind.owner_only() { " (owner only)" } else { "" };
            lines.push(format!("`{prefix}{}`{owner}: {}", kind.name(), kind.help_line(prefix)));
        }
        lines.push("Mention me with a question to chat.".into());
        lines.join("\n")
    }
}

/// "I don't have permission to {forbidden}." or "Failed to {failed}: {e}".
fn failure_reply(err: &ModerationError, forbidden: &str, failed: &str) -> String {
    match err {
        ModerationError::Forbidden => format!("I don't have permission to {forbidden}."),
        other => format!("Failed to {failed}: {other}"),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
