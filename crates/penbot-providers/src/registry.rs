//! Provider registry — static specs for the supported backends and the
//! builder that turns configuration into an ordered fallback chain.
//!
//! Chain order is fixed: every configured OpenRouter model in the order
//! listed, then every configured Gemini model.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use penbot_core::config::{Config, ProviderConfig};
use penbot_core::{ConversationStore, ProviderFamily};

use crate::error::ProviderError;
use crate::gemini::GeminiProvider;
use crate::http_provider::HttpProvider;
use crate::traits::ChatProvider;

// ─────────────────────────────────────────────
// ProviderSpec — static metadata for one backend
// ─────────────────────────────────────────────

/// Wire protocol spoken by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiShape {
    /// OpenAI-compatible `POST /chat/completions`.
    ChatCompletions,
    /// Google `models/{model}:generateContent`.
    GenerateContent,
}

/// Static specification describing one LLM backend.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Internal name (e.g. `"openrouter"`).
    pub name: &'static str,
    /// Human-readable name for logs and notes. E.g. `"OpenRouter"`.
    pub display_name: &'static str,
    /// History table this backend uses.
    pub family: ProviderFamily,
    pub api: ApiShape,
    /// Environment variable for the API key.
    pub env_key: &'static str,
    /// Default API base URL, when the backend has a well-known one.
    pub default_api_base: Option<&'static str>,
}

/// Supported backends, in fallback order.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openrouter",
        display_name: "OpenRouter",
        family: ProviderFamily::OpenRouter,
        api: ApiShape::ChatCompletions,
        env_key: "OPENROUTER_API_KEY",
        default_api_base: Some("https://openrouter.ai/api/v1"),
    },
    ProviderSpec {
        name: "gemini",
        display_name: "Gemini",
        family: ProviderFamily::Gemini,
        api: ApiShape::GenerateContent,
        env_key: "GEMINI_API_KEY",
        default_api_base: Some("https://generativelanguage.googleapis.com/v1beta"),
    },
];

/// Find a provider spec by exact name.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

impl ProviderSpec {
    /// The config block for this backend.
    pub fn config<'a>(&self, config: &'a Config) -> &'a ProviderConfig {
        match self.family {
            ProviderFamily::OpenRouter => &config.providers.openrouter,
            ProviderFamily::Gemini => &config.providers.gemini,
        }
    }
}

// ─────────────────────────────────────────────
// Chain builder
// ─────────────────────────────────────────────

/// Build the ordered provider chain from configuration.
///
/// Backends without an API key are left out entirely. OpenRouter handles
/// share `store`; Gemini handles each keep their own session pool.
pub fn build_chain(
    config: &Config,
    store: Arc<ConversationStore>,
) -> anyhow::Result<Vec<Arc<dyn ChatProvider>>> {
    let timeout = Duration::from_secs(config.chat.request_timeout_secs);
    let mut chain: Vec<Arc<dyn ChatProvider>> = Vec::new();

    for spec in PROVIDERS {
        let provider_config = spec.config(config);
        if !provider_config.is_configured() {
            let reason = ProviderError::Disabled {
                provider: spec.display_name.to_string(),
            };
            info!(provider = spec.display_name, reason = %reason, "Excluded from chain");
            continue;
        }

        for model in &provider_config.models {
            debug!(provider = spec.display_name, model = %model, "Adding provider to chain");
            let handle: Arc<dyn ChatProvider> = match spec.api {
                ApiShape::ChatCompletions => Arc::new(
                    HttpProvider::new(provider_config, spec, model, store.clone(), timeout)
                        .with_context(|| format!("building {} client", spec.display_name))?,
                ),
                ApiShape::GenerateContent => Arc::new(
                    GeminiProvider::new(
                        provider_config,
                        spec,
                        model,
                        config.chat.persona(),
                        config.chat.history_limit,
                        timeout,
                    )
                    .with_context(|| format!("building {} client", spec.display_name))?,
                ),
            };
            chain.push(handle);
        }
    }

    if chain.is_empty() {
        anyhow::bail!("no provider is configured; set OPENROUTER_API_KEY");
    }
    Ok(chain)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(openrouter: bool, gemini: bool) -> Config {
        let mut config = Config::default();
        if openrouter {
            config.providers.openrouter.api_key = "sk-or-1".into();
            config.providers.openrouter.api_base = Some("https://openrouter.ai/api/v1".into());
        }
        if gemini {
            config.providers.gemini.api_key = "g-1".into();
        }
        config
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find_by_name("openrouter").unwrap().display_name, "OpenRouter");
        assert_eq!(find_by_name("gemini").unwrap().api, ApiShape::GenerateContent);
        assert!(find_by_name("nonexistent").is_none());
    }

    #[test]
    fn test_all_providers_have_unique_names() {
        let mut names: Vec<&str> = PROVIDERS.iter().map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), PROVIDERS.len());
    }

    #[test]
    fn test_chain_order_openrouter_then_gemini() {
        let config = config_with_keys(true, true);
        let chain = build_chain(&config, Arc::new(ConversationStore::default())).unwrap();

        let labels: Vec<(ProviderFamily, String)> = chain
            .iter()
            .map(|p| (p.family(), p.model().to_string()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (ProviderFamily::OpenRouter, "deepseek/deepseek-r1-0528-qwen3-8b:free".to_string()),
                (ProviderFamily::OpenRouter, "deepseek/deepseek-chat-v3-0324:free".to_string()),
                (ProviderFamily::Gemini, "gemini-2.0-flash".to_string()),
            ]
        );
    }

    #[test]
    fn test_chain_excludes_unconfigured_gemini() {
        let config = config_with_keys(true, false);
        let chain = build_chain(&config, Arc::new(ConversationStore::default())).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|p| p.family() == ProviderFamily::OpenRouter));
    }

    #[test]
    fn test_empty_chain_is_an_error() {
        let config = config_with_keys(false, false);
        let err = build_chain(&config, Arc::new(ConversationStore::default())).err().expect("expected an error");
        assert!(err.to_string().contains("no provider"));
    }
}
