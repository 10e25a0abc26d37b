//! Discord channel — raw Gateway WebSocket + REST API.
//!
//! Receives `MESSAGE_CREATE` events over Gateway v10 and answers through
//! `POST /channels/{id}/messages`. Guild moderation (bans, timeouts, channel
//! creation, guild info) goes through the same REST client.
//!
//! - heartbeat with zombie detection, resume on reconnect
//! - only guild messages from humans are published
//! - typing indicator while a reply to an addressed message is pending
//! - HTTP 429 retried after `retry_after`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use penbot_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use penbot_core::config::DiscordConfig;
use penbot_core::moderation::{
    ChannelCategory, CreatedChannel, GuildInfo, GuildModerator, ModerationError,
};

use crate::base::Channel;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Discord REST API base URL.
const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord message length limit.
const DISCORD_MAX_LEN: usize = 2000;

/// Typing indicator refresh interval (Discord typing lasts ~10s).
const TYPING_INTERVAL_SECS: u64 = 8;

/// Attempts for non-429 REST failures.
const MAX_SEND_ATTEMPTS: u32 = 3;

const CHANNEL_TYPE_TEXT: u64 = 0;
const CHANNEL_TYPE_CATEGORY: u64 = 4;

// Gateway opcodes
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RESUME: u64 = 6;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

// ─────────────────────────────────────────────
// DiscordChannel
// ─────────────────────────────────────────────

/// Discord channel using raw Gateway WebSocket + REST API.
pub struct DiscordChannel {
    token: String,
    bus: Arc<MessageBus>,
    gateway_url: String,
    api_base: String,
    intents: u64,
    /// Prefix-command messages never get a typing indicator.
    command_prefix: String,
    shutdown: watch::Sender<bool>,
    http: reqwest::Client,
    /// Active typing indicator tasks keyed by channel_id.
    typing_tasks: Arc<RwLock<HashMap<String, tokio::task::JoinHandle<()>>>>,
    /// Last gateway sequence number, echoed in heartbeats and RESUME.
    seq: Arc<Mutex<Option<u64>>>,
    heartbeat_acked: Arc<Mutex<bool>>,
    session_id: Mutex<Option<String>>,
    resume_url: Mutex<Option<String>>,
    /// Our own user id, learned from READY.
    bot_user_id: RwLock<Option<String>>,
}

impl DiscordChannel {
    pub fn new(config: &DiscordConfig, bus: Arc<MessageBus>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            token: config.token.clone(),
            bus,
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            api_base: DISCORD_API_BASE.into(),
            intents: config.intents,
            command_prefix: config.command_prefix.clone(),
            shutdown,
            http,
            typing_tasks: Arc::new(RwLock::new(HashMap::new())),
            seq: Arc::new(Mutex::new(None)),
            heartbeat_acked: Arc::new(Mutex::new(true)),
            session_id: Mutex::new(None),
            resume_url: Mutex::new(None),
            bot_user_id: RwLock::new(None),
        })
    }

    /// Point REST calls at a different base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// The bot's user id, once READY has been received.
    pub async fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().await.clone()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ─────────────────────────────────────────
    // Gateway
    // ─────────────────────────────────────────

    /// Run gateway sessions until shutdown, reconnecting on failure.
    async fn run_gateway(&self) -> anyhow::Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        while !self.is_shutting_down() {
            match self.gateway_session().await {
                Ok(()) if self.is_shutting_down() => break,
                Ok(()) => info!("discord gateway session ended, reconnecting"),
                Err(e) => {
                    warn!(error = %e, "discord gateway error, reconnecting in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!("discord gateway stopped");
        Ok(())
    }

    /// One WebSocket session: HELLO → IDENTIFY/RESUME → dispatch loop.
    async fn gateway_session(&self) -> anyhow::Result<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let url = self
            .resume_url
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| self.gateway_url.clone());

        debug!(url = %url, "connecting to discord gateway");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        // All frames go through one writer task.
        let (ws_tx, mut ws_rx) = mpsc::channel::<WsMessage>(16);
        let writer = tokio::spawn(async move {
            while let Some(frame) = ws_rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = write.send(frame).await {
                    warn!(error = %e, "discord ws write error");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let mut heartbeat: Option<tokio::task::JoinHandle<()>> = None;
        let mut shutdown = self.shutdown.subscribe();

        let result = loop {
            if *shutdown.borrow() {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break Ok(());
            }

            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(t))) => t.to_string(),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("discord ws closed");
                            break Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break Err(e.into()),
                    };

                    let payload: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "discord ws invalid json");
                            continue;
                        }
                    };

                    if let Some(s) = payload["s"].as_u64() {
                        *self.seq.lock().await = Some(s);
                    }

                    match payload["op"].as_u64().unwrap_or(u64::MAX) {
                        OP_HELLO => {
                            let interval = payload["d"]["heartbeat_interval"].as_u64().unwrap_or(41_250);
                            debug!(interval_ms = interval, "discord HELLO received");

                            if let Some(h) = heartbeat.take() {
                                h.abort();
                            }
                            *self.heartbeat_acked.lock().await = true;
                            heartbeat = Some(self.spawn_heartbeat(interval, ws_tx.clone()));

                            let hello_reply = self.identify_or_resume().await;
                            if ws_tx.send(WsMessage::text(hello_reply)).await.is_err() {
                                break Err(anyhow::anyhow!("discord ws writer closed"));
                            }
                        }
                        OP_DISPATCH => {
                            self.handle_dispatch(payload["t"].as_str().unwrap_or(""), &payload["d"]).await;
                        }
                        OP_HEARTBEAT_ACK => {
                            *self.heartbeat_acked.lock().await = true;
                        }
                        OP_HEARTBEAT => {
                            let s = *self.seq.lock().await;
                            let hb = json!({"op": OP_HEARTBEAT, "d": s}).to_string();
                            let _ = ws_tx.send(WsMessage::text(hb)).await;
                        }
                        OP_RECONNECT => {
                            info!("discord server requested reconnect");
                            break Ok(());
                        }
                        OP_INVALID_SESSION => {
                            let resumable = payload["d"].as_bool().unwrap_or(false);
                            warn!(resumable, "discord invalid session");
                            if !resumable {
                                *self.session_id.lock().await = None;
                                *self.resume_url.lock().await = None;
                            }
                            break Err(anyhow::anyhow!("invalid session"));
                        }
                        op => debug!(op, "discord opcode ignored"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("discord shutdown signal received");
                }
            }

            if !*shutdown.borrow() && heartbeat.as_ref().is_some_and(|h| h.is_finished()) {
                break Err(anyhow::anyhow!("heartbeat not acknowledged"));
            }
        };

        if let Some(h) = heartbeat.take() {
            h.abort();
        }
        drop(ws_tx);
        let _ = writer.await;
        result
    }

    /// Heartbeat task. Exits when an ACK is missed or the writer is gone.
    fn spawn_heartbeat(
        &self,
        interval_ms: u64,
        ws_tx: mpsc::Sender<tokio_tungstenite::tungstenite::Message>,
    ) -> tokio::task::JoinHandle<()> {
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let seq = self.seq.clone();
        let acked = self.heartbeat_acked.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let jitter = (interval_ms as f64 * rand_jitter()) as u64;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            loop {
                {
                    let mut acked = acked.lock().await;
                    if !*acked {
                        warn!("discord heartbeat not ACKed, reconnecting");
                        break;
                    }
                    *acked = false;
                }

                let s = *seq.lock().await;
                let hb = json!({"op": OP_HEARTBEAT, "d": s}).to_string();
                if ws_tx.send(WsMessage::text(hb)).await.is_err() {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    async fn identify_or_resume(&self) -> String {
        match self.session_id.lock().await.clone() {
            Some(session_id) => {
                let seq = *self.seq.lock().await;
                json!({
                    "op": OP_RESUME,
                    "d": { "token": self.token, "session_id": session_id, "seq": seq }
                })
                .to_string()
            }
            None => json!({
                "op": OP_IDENTIFY,
                "d": {
                    "token": self.token,
                    "intents": self.intents,
                    "properties": { "os": std::env::consts::OS, "browser": "penbot", "device": "penbot" }
                }
            })
            .to_string(),
        }
    }

    async fn handle_dispatch(&self, event: &str, data: &Value) {
        match event {
            "READY" => {
                if let Some(sid) = data["session_id"].as_str() {
                    *self.session_id.lock().await = Some(sid.to_string());
                }
                if let Some(url) = data["resume_gateway_url"].as_str() {
                    *self.resume_url.lock().await = Some(url.to_string());
                }
                if let Some(id) = data["user"]["id"].as_str() {
                    *self.bot_user_id.write().await = Some(id.to_string());
                }
                let user = data["user"]["username"].as_str().unwrap_or("unknown");
                info!(user, "discord bot READY");
            }
            "RESUMED" => info!("discord session resumed"),
            "MESSAGE_CREATE" => self.handle_message_create(data).await,
            _ => debug!(event, "discord event (unhandled)"),
        }
    }

    /// Turn a `MESSAGE_CREATE` payload into an [`InboundMessage`].
    async fn handle_message_create(&self, data: &Value) {
        if data["author"]["bot"].as_bool().unwrap_or(false) {
            return;
        }

        let Some(sender_id) = data["author"]["id"].as_str() else {
            return;
        };
        let Some(channel_id) = data["channel_id"].as_str() else {
            return;
        };
        // DMs carry no guild id.
        let Some(guild_id) = data["guild_id"].as_str() else {
            debug!(sender = %sender_id, "ignoring direct message");
            return;
        };

        let bot_id = self.bot_user_id.read().await.clone();
        if bot_id.as_deref() == Some(sender_id) {
            return;
        }

        let addressed = bot_id.as_deref().is_some_and(|id| {
            data["mentions"]
                .as_array()
                .is_some_and(|mentions| mentions.iter().any(|m| m["id"].as_str() == Some(id)))
        });

        let content = data["content"].as_str().unwrap_or("");
        let mut inbound = InboundMessage::new("discord", sender_id, channel_id, content).in_guild(guild_id);
        inbound.addressed = addressed;
        inbound.message_id = data["id"].as_str().map(str::to_string);
        if let Some(username) = data["author"]["username"].as_str() {
            inbound.metadata.insert("username".into(), username.to_string());
        }

        debug!(
            sender = %sender_id,
            channel = %channel_id,
            guild = %guild_id,
            addressed,
            chars = content.chars().count(),
            "discord inbound message"
        );

        if addressed && !content.starts_with(&self.command_prefix) {
            self.start_typing(channel_id).await;
        }

        if let Err(e) = self.bus.publish_inbound(inbound).await {
            error!(error = %e, "failed to publish discord message to bus");
        }
    }

    // ─────────────────────────────────────────
    // Typing indicator
    // ─────────────────────────────────────────

    async fn start_typing(&self, channel_id: &str) {
        self.stop_typing(channel_id).await;

        let url = format!("{}/channels/{channel_id}/typing", self.api_base);
        let auth = self.auth_header();
        let http = self.http.clone();
        let mut shutdown = self.shutdown.subscribe();
        let channel = channel_id.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let _ = http.post(&url).header("Authorization", &auth).send().await;
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(TYPING_INTERVAL_SECS)) => {}
                    _ = shutdown.changed() => break,
                }
            }
            debug!(channel = %channel, "typing indicator stopped");
        });

        self.typing_tasks
            .write()
            .await
            .insert(channel_id.to_string(), handle);
    }

    async fn stop_typing(&self, channel_id: &str) {
        if let Some(handle) = self.typing_tasks.write().await.remove(channel_id) {
            handle.abort();
        }
    }

    async fn stop_all_typing(&self) {
        for (_, handle) in self.typing_tasks.write().await.drain() {
            handle.abort();
        }
    }

    // ─────────────────────────────────────────
    // REST
    // ─────────────────────────────────────────

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Issue a REST request, sleeping through 429s and retrying 5xx.
    ///
    /// Returns the final response whatever its status; the caller maps it.
    async fn rest(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        reason: Option<&str>,
    ) -> reqwest::Result<reqwest::Response> {
        let url = format!("{}{path}", self.api_base);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", self.auth_header());
            if let Some(reason) = reason {
                req = req.header(
                    "X-Audit-Log-Reason",
                    urlencoding::encode(reason).into_owned(),
                );
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = req.send().await?;
            let status = resp.status();

            if status.as_u16() == 429 {
                let retry_after = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v["retry_after"].as_f64())
                    .unwrap_or(1.0);
                warn!(path, retry_after_s = retry_after, attempt = attempts, "discord rate limited");
                tokio::time::sleep(Duration::from_secs_f64(retry_after.max(0.0))).await;
                continue;
            }

            if status.is_server_error() && attempts < MAX_SEND_ATTEMPTS {
                warn!(path, status = %status, attempt = attempts, "discord server error, retrying in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            return Ok(resp);
        }
    }

    /// Post one message, threaded onto `reply_to` when given.
    async fn send_rest(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "content": content });
        if let Some(ref_id) = reply_to {
            body["message_reference"] = json!({ "message_id": ref_id, "fail_if_not_exists": false });
            body["allowed_mentions"] = json!({ "replied_user": false });
        }

        let resp = self
            .rest(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(&body),
                None,
            )
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let err_text = resp.text().await.unwrap_or_default();
        Err(anyhow::anyhow!("discord send failed (HTTP {status}): {err_text}"))
    }

    /// Run a moderation request and map its status onto [`ModerationError`].
    async fn moderate(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        reason: Option<&str>,
    ) -> Result<reqwest::Response, ModerationError> {
        let resp = self
            .rest(method, path, body, reason)
            .await
            .map_err(|e| ModerationError::Http(e.to_string()))?;

        match resp.status().as_u16() {
            200..=299 => Ok(resp),
            403 => Err(ModerationError::Forbidden),
            404 => Err(ModerationError::NotFound(path.to_string())),
            status => {
                let detail = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v["message"].as_str().map(str::to_string))
                    .unwrap_or_default();
                Err(ModerationError::Http(format!("HTTP {status} {detail}").trim_end().to_string()))
            }
        }
    }

    async fn fetch_channels(&self, guild_id: &str) -> Result<Vec<Value>, ModerationError> {
        let resp = self
            .moderate(reqwest::Method::GET, &format!("/guilds/{guild_id}/channels"), None, None)
            .await?;
        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| ModerationError::Http(e.to_string()))
    }
}

/// Cut `text` to Discord's hard limit on a char boundary.
fn clamp_to_limit(text: &str) -> &str {
    match text.char_indices().nth(DISCORD_MAX_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A random fraction in `[0, 1)` for the first heartbeat.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / 1_000_000_000.0
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.token.is_empty() {
            return Err(anyhow::anyhow!("discord token is empty"));
        }

        info!(intents = self.intents, "starting discord channel (gateway v10)");
        self.run_gateway().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping discord channel");
        self.shutdown.send_replace(true);
        self.stop_all_typing().await;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let content = clamp_to_limit(&msg.content);
        if content.len() < msg.content.len() {
            warn!(chat_id = %msg.chat_id, "reply over discord limit, clamped");
        }

        let result = self.send_rest(&msg.chat_id, content, msg.reply_to.as_deref()).await;
        self.stop_typing(&msg.chat_id).await;
        result?;

        debug!(chat_id = %msg.chat_id, "discord message sent");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Moderation over REST
// ─────────────────────────────────────────────

#[async_trait]
impl GuildModerator for DiscordChannel {
    async fn ban(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), ModerationError> {
        info!(guild = %guild_id, user = %user_id, "banning member");
        self.moderate(
            reqwest::Method::PUT,
            &format!("/guilds/{guild_id}/bans/{user_id}"),
            Some(&json!({})),
            reason,
        )
        .await?;
        Ok(())
    }

    async fn set_timeout(
        &self,
        guild_id: &str,
        user_id: &str,
        until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<(), ModerationError> {
        let until = until.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
        info!(guild = %guild_id, user = %user_id, until = ?until, "updating member timeout");
        self.moderate(
            reqwest::Method::PATCH,
            &format!("/guilds/{guild_id}/members/{user_id}"),
            Some(&json!({ "communication_disabled_until": until })),
            reason,
        )
        .await?;
        Ok(())
    }

    async fn find_category(
        &self,
        guild_id: &str,
        name_or_id: &str,
    ) -> Result<Option<ChannelCategory>, ModerationError> {
        let wanted = name_or_id.trim();
        let found = self
            .fetch_channels(guild_id)
            .await?
            .into_iter()
            .filter(|c| c["type"].as_u64() == Some(CHANNEL_TYPE_CATEGORY))
            .find(|c| {
                c["id"].as_str() == Some(wanted)
                    || c["name"]
                        .as_str()
                        .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
            })
            .and_then(|c| {
                Some(ChannelCategory {
                    id: c["id"].as_str()?.to_string(),
                    name: c["name"].as_str().unwrap_or_default().to_string(),
                })
            });
        Ok(found)
    }

    async fn create_text_channel(
        &self,
        guild_id: &str,
        name: &str,
        category_id: Option<&str>,
    ) -> Result<CreatedChannel, ModerationError> {
        let mut body = json!({ "name": name, "type": CHANNEL_TYPE_TEXT });
        if let Some(parent) = category_id {
            body["parent_id"] = json!(parent);
        }

        let created: Value = self
            .moderate(
                reqwest::Method::POST,
                &format!("/guilds/{guild_id}/channels"),
                Some(&body),
                None,
            )
            .await?
            .json()
            .await
            .map_err(|e| ModerationError::Http(e.to_string()))?;

        let id = created["id"]
            .as_str()
            .ok_or_else(|| ModerationError::Http("channel created without an id".into()))?;
        info!(guild = %guild_id, channel = %id, "created text channel");
        Ok(CreatedChannel {
            id: id.to_string(),
            name: created["name"].as_str().unwrap_or(name).to_string(),
        })
    }

    async fn guild_info(&self, guild_id: &str) -> Result<GuildInfo, ModerationError> {
        let guild: Value = self
            .moderate(
                reqwest::Method::GET,
                &format!("/guilds/{guild_id}?with_counts=true"),
                None,
                None,
            )
            .await?
            .json()
            .await
            .map_err(|e| ModerationError::Http(e.to_string()))?;

        // A failed channel listing only loses the count.
        let channel_count = match self.fetch_channels(guild_id).await {
            Ok(channels) => Some(channels.len()),
            Err(e) => {
                warn!(guild = %guild_id, error = %e, "could not list guild channels");
                None
            }
        };

        Ok(GuildInfo {
            id: guild["id"].as_str().unwrap_or(guild_id).to_string(),
            name: guild["name"].as_str().unwrap_or_default().to_string(),
            owner_id: guild["owner_id"].as_str().unwrap_or_default().to_string(),
            member_count: guild["approximate_member_count"].as_u64(),
            channel_count,
            role_count: guild["roles"].as_array().map_or(0, Vec::len),
        })
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> DiscordConfig {
        DiscordConfig {
            token: "test_token".into(),
            owner_id: "1".into(),
            ..DiscordConfig::default()
        }
    }

    fn create_test_channel(bus: Arc<MessageBus>) -> DiscordChannel {
        DiscordChannel::new(&config(), bus).unwrap()
    }

    async fn ready_channel(bus: Arc<MessageBus>) -> DiscordChannel {
        let ch = create_test_channel(bus);
        ch.handle_dispatch(
            "READY",
            &json!({
                "session_id": "sess",
                "resume_gateway_url": "wss://resume.example",
                "user": { "id": "999", "username": "PenAI" }
            }),
        )
        .await;
        ch
    }

    fn message(author: &str, content: &str, mentions: &[&str]) -> Value {
        json!({
            "id": "msg1",
            "author": { "id": author, "username": "testuser" },
            "channel_id": "ch1",
            "guild_id": "guild1",
            "content": content,
            "mentions": mentions.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_channel_name_and_intents() {
        let ch = create_test_channel(Arc::new(MessageBus::new(4)));
        assert_eq!(ch.name(), "discord");
        assert_eq!(ch.intents, 33283);
    }

    #[test]
    fn test_clamp_to_limit() {
        assert_eq!(clamp_to_limit("hello"), "hello");
        let long = "é".repeat(2100);
        assert_eq!(clamp_to_limit(&long).chars().count(), DISCORD_MAX_LEN);
    }

    #[test]
    fn test_rand_jitter_range() {
        assert!((0.0..1.0).contains(&rand_jitter()));
    }

    #[tokio::test]
    async fn test_ready_captures_session_and_bot_id() {
        let ch = ready_channel(Arc::new(MessageBus::new(4))).await;
        assert_eq!(ch.bot_user_id().await.as_deref(), Some("999"));
        assert_eq!(ch.session_id.lock().await.as_deref(), Some("sess"));
        assert_eq!(ch.resume_url.lock().await.as_deref(), Some("wss://resume.example"));

        let resume: Value = serde_json::from_str(&ch.identify_or_resume().await).unwrap();
        assert_eq!(resume["op"], OP_RESUME);
        assert_eq!(resume["d"]["session_id"], "sess");
    }

    #[tokio::test]
    async fn test_identify_before_ready() {
        let ch = create_test_channel(Arc::new(MessageBus::new(4)));
        let identify: Value = serde_json::from_str(&ch.identify_or_resume().await).unwrap();
        assert_eq!(identify["op"], OP_IDENTIFY);
        assert_eq!(identify["d"]["token"], "test_token");
        assert_eq!(identify["d"]["intents"], 33283);
    }

    #[tokio::test]
    async fn test_mention_marks_addressed() {
        let bus = Arc::new(MessageBus::new(4));
        let ch = ready_channel(bus.clone()).await;

        ch.handle_message_create(&message("42", "<@999> hello", &["999"])).await;

        let msg = bus.consume_inbound().await.unwrap();
        assert!(msg.addressed);
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "ch1");
        assert_eq!(msg.content, "<@999> hello");
        assert_eq!(msg.guild_id.as_deref(), Some("guild1"));
        assert_eq!(msg.message_id.as_deref(), Some("msg1"));
        assert_eq!(msg.metadata.get("username").unwrap(), "testuser");
        assert!(ch.typing_tasks.read().await.contains_key("ch1"));
        ch.stop_all_typing().await;
    }

    #[tokio::test]
    async fn test_unaddressed_message_still_published() {
        let bus = Arc::new(MessageBus::new(4));
        let ch = ready_channel(bus.clone()).await;

        ch.handle_message_create(&message("42", "!serverinfo", &["555"])).await;

        let msg = bus.consume_inbound().await.unwrap();
        assert!(!msg.addressed);
        assert!(ch.typing_tasks.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ignores_bots_self_and_dms() {
        let bus = Arc::new(MessageBus::new(4));
        let ch = ready_channel(bus.clone()).await;

        let mut from_bot = message("42", "hi", &["999"]);
        from_bot["author"]["bot"] = json!(true);
        ch.handle_message_create(&from_bot).await;

        ch.handle_message_create(&message("999", "echo", &["999"])).await;

        let mut dm = message("42", "<@999> hi", &["999"]);
        dm.as_object_mut().unwrap().remove("guild_id");
        ch.handle_message_create(&dm).await;

        // Only this one gets through.
        ch.handle_message_create(&message("43", "marker", &[])).await;
        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.content, "marker");
    }

    #[tokio::test]
    async fn test_send_threads_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/messages"))
            .and(header("Authorization", "Bot test_token"))
            .and(body_json(json!({
                "content": "pong",
                "message_reference": { "message_id": "msg1", "fail_if_not_exists": false },
                "allowed_mentions": { "replied_user": false }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m2" })))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let mut out = OutboundMessage::new("discord", "ch1", "pong");
        out.reply_to = Some("msg1".into());
        ch.send(&out).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_retries_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/messages"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 0.05, "global": false })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m2" })))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        ch.send(&OutboundMessage::new("discord", "ch1", "pong")).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_clamps_oversized_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/messages"))
            .and(body_json(json!({ "content": "x".repeat(DISCORD_MAX_LEN) })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m2" })))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        ch.send(&OutboundMessage::new("discord", "ch1", "x".repeat(2500))).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_client_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let err = ch
            .send(&OutboundMessage::new("discord", "ch1", "pong"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_ban_sends_encoded_reason() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/guilds/g1/bans/42"))
            .and(header("X-Audit-Log-Reason", "too%20loud%20%26%20r%C3%BCde"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        ch.ban("g1", "42", Some("too loud & rüde")).await.unwrap();
    }

    #[tokio::test]
    async fn test_ban_forbidden_maps() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/guilds/g1/bans/42"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "message": "Missing Permissions", "code": 50013 })),
            )
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let err = ch.ban("g1", "42", None).await.unwrap_err();
        assert!(matches!(err, ModerationError::Forbidden));
    }

    #[tokio::test]
    async fn test_set_and_clear_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/g1/members/42"))
            .and(body_json(json!({ "communication_disabled_until": "2030-01-01T00:00:00Z" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/g1/members/42"))
            .and(body_json(json!({ "communication_disabled_until": null })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let until = "2030-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        ch.set_timeout("g1", "42", Some(until), None).await.unwrap();
        ch.set_timeout("g1", "42", None, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_member_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/g1/members/42"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Unknown Member" })))
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let err = ch.set_timeout("g1", "42", None, None).await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_category_by_name_or_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "10", "name": "general", "type": 0 },
                { "id": "20", "name": "Projects", "type": 4 },
                { "id": "30", "name": "projects", "type": 2 }
            ])))
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let projects = ChannelCategory {
            id: "20".into(),
            name: "Projects".into(),
        };
        assert_eq!(ch.find_category("g1", "projects").await.unwrap(), Some(projects.clone()));
        assert_eq!(ch.find_category("g1", "20").await.unwrap(), Some(projects));
        assert_eq!(ch.find_category("g1", "general").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_text_channel_under_category() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/guilds/g1/channels"))
            .and(body_partial_json(json!({ "name": "dev-chat", "type": 0, "parent_id": "20" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "77", "name": "dev-chat" })))
            .expect(1)
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let created = ch.create_text_channel("g1", "dev-chat", Some("20")).await.unwrap();
        assert_eq!(
            created,
            CreatedChannel {
                id: "77".into(),
                name: "dev-chat".into()
            }
        );
    }

    #[tokio::test]
    async fn test_guild_info_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1"))
            .and(query_param("with_counts", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "g1",
                "name": "Pen Club",
                "owner_id": "1",
                "approximate_member_count": 12,
                "roles": [{ "id": "r1" }, { "id": "r2" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/g1/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "1" }, { "id": "2" }, { "id": "3" }])))
            .mount(&server)
            .await;

        let ch = create_test_channel(Arc::new(MessageBus::new(4))).with_api_base(server.uri());
        let info = ch.guild_info("g1").await.unwrap();
        assert_eq!(info.name, "Pen Club");
        assert_eq!(info.owner_id, "1");
        assert_eq!(info.member_count, Some(12));
        assert_eq!(info.channel_count, Some(3));
        assert_eq!(info.role_count, 2);
    }

    #[tokio::test]
    async fn test_stop_before_start_returns_promptly() {
        let ch = create_test_channel(Arc::new(MessageBus::new(4)));
        ch.stop().await.unwrap();
        let done = tokio::time::timeout(Duration::from_secs(1), ch.run_gateway()).await;
        assert!(done.is_ok());
    }
}
