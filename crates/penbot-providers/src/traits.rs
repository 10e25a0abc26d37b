//! Provider trait — the uniform capability every LLM backend implements.
//!
//! A provider owns its own conversation bookkeeping: callers only hand it a
//! user id and the new message text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use penbot_core::ProviderFamily;

/// Outcome of one provider call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderResult {
    /// The model answered.
    Success { text: String },
    /// The backend refused with HTTP 429.
    RateLimited {
        message: String,
        reset_time: Option<DateTime<Utc>>,
    },
    /// Any other problem: timeout, HTTP error, transport error, bad body.
    Failure { message: String },
}

impl ProviderResult {
    pub fn success(text: impl Into<String>) -> Self {
        ProviderResult::Success { text: text.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ProviderResult::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProviderResult::Success { .. })
    }
}

/// Trait that all chat providers must implement.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send `text` on behalf of `user_id` and return the outcome.
    ///
    /// Implementations never panic or return an error; every failure mode is
    /// a [`ProviderResult`] variant. On success the exchange is recorded in
    /// the user's history; on failure nothing is committed.
    async fn send(&self, user_id: &str, text: &str) -> ProviderResult;

    /// Display name for logs and user-facing notes (e.g. "OpenRouter").
    fn display_name(&self) -> &str;

    /// Model identifier this handle talks to.
    fn model(&self) -> &str;

    /// Which history table this provider reads and writes.
    fn family(&self) -> ProviderFamily;

    /// Whether the provider has the credentials it needs.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Drop per-user state the provider keeps privately and that has gone
    /// unused for `max_idle`. Returns how many sessions were dropped.
    fn evict_idle(&self, _max_idle: chrono::Duration) -> usize {
        0
    }

    /// Forget everything said so far with `user_id`.
    async fn reset(&self, _user_id: &str) {}

    /// "Display (model)" label used in notes and logs.
    fn label(&self) -> String {
        format!("{} ({})", self.display_name(), self.model())
    }
}
