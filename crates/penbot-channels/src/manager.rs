//! Channel Manager — runs channels and routes outbound replies.
//!
//! Each registered channel's `start()` runs on its own task. A router task
//! drains the bus's outbound queue and hands each reply to the channel named
//! in it. Shutdown is a `watch` flag so that late subscribers still see it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use penbot_core::bus::MessageBus;

use crate::base::Channel;

// ─────────────────────────────────────────────
// ChannelManager
// ─────────────────────────────────────────────

pub struct ChannelManager {
    /// Registered channels, keyed by name.
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            channels: HashMap::new(),
            bus,
            shutdown_tx,
        }
    }

    /// Register a channel. Replaces any previous channel with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    /// Get a registered channel by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// Names of all registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel plus the outbound router.
    ///
    /// Returns the spawned task handles; they finish after [`stop_all`](Self::stop_all).
    pub fn start_all(&self) -> Vec<JoinHandle<()>> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
            return Vec::new();
        }

        info!(channels = ?self.channel_names(), "starting channels");
        let mut handles = Vec::with_capacity(self.channels.len() + 1);

        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel exited with error");
                }
                info!(channel = %ch_name, "channel stopped");
            }));
        }

        handles.push(tokio::spawn(Self::route_outbound(
            self.bus.clone(),
            self.channels.clone(),
            self.shutdown_tx.subscribe(),
        )));

        handles
    }

    /// Signal shutdown and stop every channel.
    pub async fn stop_all(&self) {
        info!("stopping all channels");
        self.shutdown_tx.send_replace(true);

        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }
    }

    /// Deliver replies until shutdown or until the bus closes.
    async fn route_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("outbound router started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                msg = bus.consume_outbound() => {
                    let Some(outbound) = msg else {
                        info!("outbound bus closed, router exiting");
                        break;
                    };

                    debug!(
                        channel = %outbound.channel,
                        chat_id = %outbound.chat_id,
                        chars = outbound.content.chars().count(),
                        "routing outbound message"
                    );

                    match channels.get(&outbound.channel) {
                        Some(channel) => {
                            if let Err(e) = channel.send(&outbound).await {
                                error!(channel = %outbound.channel, error = %e, "failed to send reply");
                            }
                        }
                        None => warn!(channel = %outbound.channel, "no channel registered for reply"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("outbound router stopped");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
