//! Gemini `generateContent` client.
//!
//! Gemini keeps a chat session per user in its own pool, separate from the
//! shared conversation store. A session holds at most `2 × history_limit`
//! turns' worth of entries and is thrown away whenever a call fails for a
//! reason other than rate limiting, so the next message starts fresh.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use penbot_core::config::ProviderConfig;
use penbot_core::types::ConversationEntry;
use penbot_core::{ConversationStore, ProviderFamily, Role};

use crate::error::{check_status, ProviderError};
use crate::registry::ProviderSpec;
use crate::traits::{ChatProvider, ProviderResult};

// ─────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentRequest {
    /// Map a stored session onto Gemini's shape: the persona becomes the
    /// system instruction, assistant turns become `model` turns.
    fn from_entries(entries: &[ConversationEntry]) -> Self {
        let mut system_instruction = None;
        let mut contents = Vec::with_capacity(entries.len());

        for entry in entries {
            let part = Part {
                text: Some(entry.content.clone()),
            };
            match entry.role {
                Role::System => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: vec![part],
                    })
                }
                Role::User => contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![part],
                }),
                Role::Assistant => contents.push(Content {
                    role: Some("model".to_string()),
                    parts: vec![part],
                }),
            }
        }

        GenerateContentRequest {
            system_instruction,
            contents,
        }
    }
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn text(self) -> Option<String> {
        let parts = self.candidates.into_iter().next()?.content?.parts;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

// ─────────────────────────────────────────────
// GeminiProvider
// ─────────────────────────────────────────────

pub struct GeminiProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    extra_headers: HeaderMap,
    timeout: Duration,
    spec: &'static ProviderSpec,
    /// Per-user chat sessions.
    sessions: ConversationStore,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(
        config: &ProviderConfig,
        spec: &'static ProviderSpec,
        model: &str,
        persona: Option<&str>,
        history_limit: usize,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let api_base = config
            .api_base
            .as_deref()
            .or(spec.default_api_base)
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
            .trim_end_matches('/');

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                match (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(val)) => {
                        extra_headers.insert(name, val);
                    }
                    _ => warn!("Invalid header: {}={}", key, value),
                }
            }
        }

        let mut sessions = ConversationStore::new(history_limit * 2);
        if let Some(persona) = persona {
            sessions = sessions.with_persona(ProviderFamily::Gemini, persona);
        }

        Ok(GeminiProvider {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: format!("{api_base}/models/{model}:generateContent"),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            extra_headers,
            timeout,
            spec,
            sessions,
        })
    }

    /// The per-user session pool, for idle sweeps.
    pub fn sessions(&self) -> &ConversationStore {
        &self.sessions
    }

    async fn generate(&self, entries: &[ConversationEntry]) -> Result<String, ProviderError> {
        let provider = self.spec.display_name;
        let body = GenerateContentRequest::from_entries(entries);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .headers(self.extra_headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(provider, self.timeout.as_secs(), e))?;

        let response = check_status(provider, &self.model, response).await?;

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::from_reqwest(provider, self.timeout.as_secs(), e)
                } else {
                    error!(provider, error = %e, "Failed to parse Gemini response");
                    ProviderError::MalformedResponse {
                        provider: provider.to_string(),
                    }
                }
            })?;

        parsed.text().ok_or_else(|| {
            error!(provider, model = %self.model, "Gemini response has no candidate text");
            ProviderError::MalformedResponse {
                provider: provider.to_string(),
            }
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn send(&self, user_id: &str, text: &str) -> ProviderResult {
        if !self.is_enabled() {
            return ProviderError::Disabled {
                provider: self.label(),
            }
            .into();
        }

        let session = self.sessions.partition(user_id, ProviderFamily::Gemini);
        let mut session = session.lock().await;
        let entries = session.with_user(text);

        debug!(
            provider = self.spec.display_name,
            model = %self.model,
            user = user_id,
            turns = entries.len(),
            "Calling Gemini"
        );

        match self.generate(&entries).await {
            Ok(reply) => {
                session.record_exchange(text, &reply);
                ProviderResult::Success { text: reply }
            }
            Err(e) => {
                if !matches!(e, ProviderError::RateLimited { .. }) {
                    debug!(user = user_id, "Discarding Gemini session after failure");
                    session.clear();
                }
                warn!(provider = self.spec.display_name, model = %self.model, error = %e, "Gemini call failed");
                e.into()
            }
        }
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
    }

    fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn evict_idle(&self, max_idle: chrono::Duration) -> usize {
        self.sessions.evict_idle(max_idle)
    }

    async fn reset(&self, user_id: &str) {
        self.sessions.clear(user_id, ProviderFamily::Gemini).await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
