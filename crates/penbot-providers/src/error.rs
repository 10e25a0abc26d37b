//! Provider error taxonomy.
//!
//! None of these are fatal: the fallback chain turns every one of them into a
//! [`ProviderResult`] and moves on to the next backend.

use chrono::{DateTime, Utc};
use penbot_core::utils::{format_reset_time, parse_reset_header};
use reqwest::StatusCode;

use crate::traits::ProviderResult;

/// Header carrying the quota reset instant, in epoch milliseconds.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider} ({model}) is rate limited")]
    RateLimited {
        provider: String,
        model: String,
        reset_time: Option<DateTime<Utc>>,
    },

    #[error("{provider} returned a response without reply text")]
    MalformedResponse { provider: String },

    #[error("{provider} ({model}) returned HTTP {status}")]
    Http {
        provider: String,
        model: String,
        status: u16,
    },

    #[error("request to {provider} failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} is not configured")]
    Disabled { provider: String },
}

impl ProviderError {
    /// Text suitable for showing to the chat user.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Timeout { .. } => {
                "Sorry, the AI is taking too long to respond.".to_string()
            }
            ProviderError::RateLimited {
                provider,
                model,
                reset_time: Some(at),
            } => format!(
                "{provider} ({model}) has hit its rate limit. Quota resets at {}.",
                format_reset_time(at)
            ),
            ProviderError::RateLimited { provider, model, .. } => format!(
                "{provider} ({model}) has hit its rate limit. Please try again later."
            ),
            ProviderError::MalformedResponse { .. } => {
                "Sorry, I received an unusual response from the AI.".to_string()
            }
            ProviderError::Http {
                provider,
                model,
                status,
            } => format!("Sorry, {provider} ({model}) returned an error (HTTP {status})."),
            ProviderError::Transport { .. } => {
                "Sorry, I'm having trouble connecting to the AI service.".to_string()
            }
            ProviderError::Disabled { .. } => String::new(),
        }
    }

    /// Classify a reqwest send/read failure.
    pub(crate) fn from_reqwest(provider: &str, secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                secs,
            }
        } else {
            ProviderError::Transport {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<ProviderError> for ProviderResult {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::RateLimited { reset_time, .. } => ProviderResult::RateLimited {
                message: err.user_message(),
                reset_time: *reset_time,
            },
            _ => ProviderResult::Failure {
                message: err.user_message(),
            },
        }
    }
}

/// Turn a non-success HTTP response into the matching error.
///
/// Returns the response untouched when the status is a success.
pub(crate) async fn check_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let reset_time = response
            .headers()
            .get(RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_reset_header);
        tracing::warn!(
            provider,
            model,
            reset = ?reset_time,
            "Rate limited"
        );
        return Err(ProviderError::RateLimited {
            provider: provider.to_string(),
            model: model.to_string(),
            reset_time,
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    tracing::error!(provider, model, status = %status, body = %body, "API error");
    Err(ProviderError::Http {
        provider: provider.to_string(),
        model: model.to_string(),
        status: status.as_u16(),
    })
}
