//! Fallback orchestrator — walks the provider chain until one answers.
//!
//! The chain is fixed at startup. Each call tries providers in order:
//! a success returns at once, a rate limit or failure is remembered and the
//! next provider is tried. When every provider has been tried, the most
//! relevant remembered message is returned with a note.
//!
//! A provider that answers 429 is benched until its reported reset time
//! (bounded by `max_cooldown`), or for `default_cooldown` if it gave none.
//! Benched providers are skipped and their stored rate-limit message stands
//! in for a fresh one. If every enabled provider is benched, they are all
//! tried anyway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::traits::{ChatProvider, ProviderResult};

/// Appended when every backend was tried without success.
pub const EXHAUSTED_NOTE: &str = "*(All AI backends were tried and none could answer right now.)*";

/// Reply used when the chain ends with no message at all to surface.
const NO_BACKEND_MESSAGE: &str = "Sorry, no AI backend is available right now.";

// ─────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────

/// How the chain ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainOutcome {
    /// `provider` answered; `switched` when an enabled provider ahead of it
    /// was tried or skipped for cooldown first.
    Answered { provider: String, switched: bool },
    /// Nobody answered.
    Exhausted,
}

/// What the orchestrator hands back to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainReply {
    /// Text to show the user, notes included.
    pub text: String,
    pub outcome: ChainOutcome,
    /// Most recent rate-limit message seen along the way.
    pub last_rate_limit: Option<String>,
}

// ─────────────────────────────────────────────
// Cooldowns
// ─────────────────────────────────────────────

#[derive(Clone, Debug)]
struct Cooldown {
    until: DateTime<Utc>,
    message: String,
}

// ─────────────────────────────────────────────
// FallbackOrchestrator
// ─────────────────────────────────────────────

pub struct FallbackOrchestrator {
    chain: Vec<Arc<dyn ChatProvider>>,
    /// Chain index → active cooldown.
    cooldowns: Mutex<HashMap<usize, Cooldown>>,
    default_cooldown: Duration,
    max_cooldown: Duration,
}

impl FallbackOrchestrator {
    /// Create an orchestrator over a fixed chain.
    pub fn new(chain: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self {
            chain,
            cooldowns: Mutex::new(HashMap::new()),
            default_cooldown: Duration::seconds(60),
            max_cooldown: Duration::seconds(900),
        }
    }

    /// Bench length after a 429 without a reset time, and the cap on a
    /// reported reset time.
    pub fn with_cooldowns(mut self, default_cooldown: Duration, max_cooldown: Duration) -> Self {
        self.default_cooldown = default_cooldown;
        self.max_cooldown = max_cooldown;
        self
    }

    pub fn chain(&self) -> &[Arc<dyn ChatProvider>] {
        &self.chain
    }

    /// Answer `text` for `user_id` using the first provider that can.
    pub async fn respond(&self, user_id: &str, text: &str) -> ChainReply {
        let benched = self.active_cooldowns(Utc::now());
        let all_benched = self
            .chain
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_enabled())
            .all(|(idx, _)| benched.contains_key(&idx));
        if all_benched && !benched.is_empty() {
            info!("Every provider is cooling down, trying all of them anyway");
        }

        let mut last_rate_limit: Option<String> = None;
        let mut last_failure: Option<String> = None;
        let mut passed_over = false;

        for (idx, provider) in self.chain.iter().enumerate() {
            if !provider.is_enabled() {
                debug!(provider = %provider.label(), "Skipping disabled provider");
                continue;
            }

            if !all_benched {
                if let Some(cooldown) = benched.get(&idx) {
                    debug!(
                        provider = %provider.label(),
                        until = %cooldown.until,
                        "Skipping provider on cooldown"
                    );
                    last_rate_limit = Some(cooldown.message.clone());
                    passed_over = true;
                    continue;
                }
            }

            match provider.send(user_id, text).await {
                ProviderResult::Success { text: reply } => {
                    self.clear_cooldown(idx);
                    let switched = passed_over;
                    let text = if switched {
                        info!(provider = %provider.label(), "Answered by fallback provider");
                        format!(
                            "{reply}\n\n*(Switched to backup AI backend {} because the primary was unavailable.)*",
                            provider.label()
                        )
                    } else {
                        reply
                    };
                    return ChainReply {
                        text,
                        outcome: ChainOutcome::Answered {
                            provider: provider.label(),
                            switched,
                        },
                        last_rate_limit,
                    };
                }
                ProviderResult::RateLimited {
                    message,
                    reset_time,
                } => {
                    self.start_cooldown(idx, reset_time, &message);
                    last_rate_limit = Some(message);
                    passed_over = true;
                }
                ProviderResult::Failure { message } => {
                    if !message.is_empty() {
                        last_failure = Some(message);
                    }
                    passed_over = true;
                }
            }
        }

        warn!(user = user_id, "Provider chain exhausted");
        let headline = last_rate_limit
            .clone()
            .or(last_failure)
            .unwrap_or_else(|| NO_BACKEND_MESSAGE.to_string());
        ChainReply {
            text: format!("{headline}\n\n{EXHAUSTED_NOTE}"),
            outcome: ChainOutcome::Exhausted,
            last_rate_limit,
        }
    }

    /// Drop `user_id`'s conversation with every provider in the chain.
    pub async fn reset(&self, user_id: &str) {
        for provider in &self.chain {
            provider.reset(user_id).await;
        }
        info!(user = user_id, "Conversation reset");
    }

    /// Sweep idle private sessions held by providers.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.chain.iter().map(|p| p.evict_idle(max_idle)).sum()
    }

    fn active_cooldowns(&self, now: DateTime<Utc>) -> HashMap<usize, Cooldown> {
        let mut cooldowns = self.lock_cooldowns();
        cooldowns.retain(|_, c| c.until > now);
        (*cooldowns).clone()
    }

    fn start_cooldown(&self, idx: usize, reset_time: Option<DateTime<Utc>>, message: &str) {
        let now = Utc::now();
        let after = |d: Duration| now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let cap = after(self.max_cooldown);
        let until = match reset_time {
            Some(at) => at.min(cap),
            None => after(self.default_cooldown),
        };
        if until <= now {
            return;
        }
        debug!(index = idx, until = %until, "Provider benched");
        self.lock_cooldowns().insert(
            idx,
            Cooldown {
                until,
                message: message.to_string(),
            },
        );
    }

    fn clear_cooldown(&self, idx: usize) {
        self.lock_cooldowns().remove(&idx);
    }

    fn lock_cooldowns(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Cooldown>> {
        self.cooldowns.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
