//! OpenAI-compatible chat-completion client (OpenRouter and friends).
//!
//! Each call sends the user's stored history plus the new message and, only
//! when the backend answers, commits both halves of the exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, warn};

use penbot_core::config::ProviderConfig;
use penbot_core::types::{ChatCompletionRequest, ChatCompletionResponse, ConversationEntry};
use penbot_core::{ConversationStore, ProviderFamily};

use crate::error::{check_status, ProviderError};
use crate::registry::ProviderSpec;
use crate::traits::{ChatProvider, ProviderResult};

const COMPLETIONS_PATH: &str = "/chat/completions";

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A chat provider that talks to one model on an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// Full chat completions URL.
    url: String,
    /// API key for Bearer authentication.
    api_key: String,
    model: String,
    /// Extra headers to send with each request (e.g. OpenRouter `HTTP-Referer`).
    extra_headers: HeaderMap,
    timeout: Duration,
    spec: &'static ProviderSpec,
    store: Arc<ConversationStore>,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider for one model.
    ///
    /// # Arguments
    /// * `config`  — API key, base URL and extra headers
    /// * `spec`    — Static provider spec from the registry
    /// * `model`   — Model identifier sent in every request
    /// * `store`   — Conversation store holding this family's histories
    /// * `timeout` — Upper bound on one request, body included
    pub fn new(
        config: &ProviderConfig,
        spec: &'static ProviderSpec,
        model: &str,
        store: Arc<ConversationStore>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let api_base = config
            .api_base
            .as_deref()
            .or(spec.default_api_base)
            .unwrap_or("https://openrouter.ai/api/v1");

        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpProvider {
            client,
            url: completions_url(api_base),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            extra_headers,
            timeout,
            spec,
            store,
        })
    }

    /// POST the payload and pull the reply text out of the response.
    async fn complete(&self, messages: Vec<ConversationEntry>) -> Result<String, ProviderError> {
        let provider = self.spec.display_name;
        let request_body = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .headers(self.extra_headers.clone())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(provider, self.timeout.as_secs(), e))?;

        let response = check_status(provider, &self.model, response).await?;

        let body = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::from_reqwest(provider, self.timeout.as_secs(), e)
                } else {
                    error!(provider, error = %e, "Failed to parse LLM response");
                    ProviderError::MalformedResponse {
                        provider: provider.to_string(),
                    }
                }
            })?;

        body.first_content().ok_or_else(|| {
            error!(provider, model = %self.model, "Response has no choices[0].message.content");
            ProviderError::MalformedResponse {
                provider: provider.to_string(),
            }
        })
    }
}

/// `/chat/completions` is appended unless the base already ends with it.
fn completions_url(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    if base.ends_with(COMPLETIONS_PATH) {
        base.to_string()
    } else {
        format!("{base}{COMPLETIONS_PATH}")
    }
}

#[async_trait]
impl ChatProvider for HttpProvider {
    async fn send(&self, user_id: &str, text: &str) -> ProviderResult {
        if !self.is_enabled() {
            return ProviderError::Disabled {
                provider: self.label(),
            }
            .into();
        }

        // Held across the request so concurrent turns for one user serialize.
        let partition = self.store.partition(user_id, self.spec.family);
        let mut history = partition.lock().await;
        let messages = history.with_user(text);

        debug!(
            provider = self.spec.display_name,
            model = %self.model,
            user = user_id,
            messages = messages.len(),
            "Calling LLM"
        );

        match self.complete(messages).await {
            Ok(reply) => {
                history.record_exchange(text, &reply);
                debug!(
                    provider = self.spec.display_name,
                    model = %self.model,
                    chars = reply.chars().count(),
                    "LLM response received"
                );
                ProviderResult::Success { text: reply }
            }
            Err(e) => {
                warn!(provider = self.spec.display_name, model = %self.model, error = %e, "LLM call failed");
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
        self.spec.family
    }

    fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn reset(&self, user_id: &str) {
        self.store.clear(user_id, self.spec.family).await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::find_by_name;
    use penbot_core::Role;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "deepseek/deepseek-r1-0528-qwen3-8b:free";

    fn make_config(api_key: &str, api_base: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.map(String::from),
            models: vec![MODEL.to_string()],
            extra_headers: None,
        }
    }

    fn make_provider(base: &str, store: Arc<ConversationStore>) -> HttpProvider {
        let spec = find_by_name("openrouter").unwrap();
        HttpProvider::new(
            &make_config("test-key-123", Some(base)),
            spec,
            MODEL,
            store,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(10).with_persona(ProviderFamily::OpenRouter, "You are PenAI."))
    }

    fn ok_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://openrouter.ai/api/v1"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://openrouter.ai/api/v1/chat/completions"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn test_default_api_base() {
        let spec = find_by_name("openrouter").unwrap();
        let provider =
            HttpProvider::new(&make_config("k", None), spec, MODEL, store(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(provider.url, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(provider.label(), format!("OpenRouter ({MODEL})"));
    }

    #[test]
    fn test_extra_headers() {
        let spec = find_by_name("openrouter").unwrap();
        let mut headers = HashMap::new();
        headers.insert("HTTP-Referer".to_string(), "https://penbot.dev".to_string());
        let config = ProviderConfig {
            extra_headers: Some(headers),
            ..make_config("k", None)
        };
        let provider =
            HttpProvider::new(&config, spec, MODEL, store(), Duration::from_secs(1)).unwrap();
        assert!(provider.extra_headers.contains_key("http-referer"));
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_send_success_commits_exchange() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .and(body_partial_json(serde_json::json!({
                "model": MODEL,
                "messages": [
                    { "role": "system", "content": "You are PenAI." },
                    { "role": "user", "content": "Hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Yo, PenAI here.")))
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = make_provider(&mock_server.uri(), store.clone());

        let result = provider.send("u1", "Hello").await;
        assert_eq!(result, ProviderResult::success("Yo, PenAI here."));

        let history = store.get("u1", ProviderFamily::OpenRouter).await;
        let roles: Vec<Role> = history.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(history[2].content, "Yo, PenAI here.");
    }

    #[tokio::test]
    async fn test_second_turn_sends_history() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("first")))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    { "role": "system", "content": "You are PenAI." },
                    { "role": "user", "content": "one" },
                    { "role": "assistant", "content": "first" },
                    { "role": "user", "content": "two" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("second")))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri(), store());
        assert!(provider.send("u1", "one").await.is_success());
        assert_eq!(provider.send("u1", "two").await, ProviderResult::success("second"));
    }

    #[tokio::test]
    async fn test_disabled_provider_sends_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("never")))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = HttpProvider::new(
            &make_config("", Some(&mock_server.uri())),
            find_by_name("openrouter").unwrap(),
            MODEL,
            store.clone(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(!provider.is_enabled());
        assert_eq!(provider.send("u1", "Hello").await, ProviderResult::failure(""));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_reset_keeps_only_persona() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("hi")))
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = make_provider(&mock_server.uri(), store.clone());
        assert!(provider.send("u1", "Hello").await.is_success());
        assert_eq!(store.get("u1", ProviderFamily::OpenRouter).await.len(), 3);

        provider.reset("u1").await;
        assert_eq!(
            store.get("u1", ProviderFamily::OpenRouter).await,
            vec![ConversationEntry::system("You are PenAI.")]
        );
    }

    #[tokio::test]
    async fn test_rate_limited_with_reset_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("X-RateLimit-Reset", "1700000000000")
                    .set_body_json(serde_json::json!({"error": {"message": "Rate limit exceeded"}})),
            )
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = make_provider(&mock_server.uri(), store.clone());

        match provider.send("u1", "Hello").await {
            ProviderResult::RateLimited { message, reset_time } => {
                assert!(reset_time.is_some());
                assert!(message.contains("2023-11-14 22:13:20 UTC"));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        // Nothing committed on failure
        assert_eq!(store.get("u1", ProviderFamily::OpenRouter).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_without_reset_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri(), store());
        match provider.send("u1", "Hello").await {
            ProviderResult::RateLimited { message, reset_time } => {
                assert!(reset_time.is_none());
                assert!(message.contains("try again later"));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_names_model_and_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri(), store());
        match provider.send("u1", "Hello").await {
            ProviderResult::Failure { message } => {
                assert!(message.contains("OpenRouter"));
                assert!(message.contains(MODEL));
                assert!(message.contains("503"));
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unusual_response_shape() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = make_provider(&mock_server.uri(), store.clone());
        assert_eq!(
            provider.send("u1", "Hello").await,
            ProviderResult::failure("Sorry, I received an unusual response from the AI.")
        );
        assert_eq!(store.get("u1", ProviderFamily::OpenRouter).await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_unusual_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let provider = make_provider(&mock_server.uri(), store());
        assert_eq!(
            provider.send("u1", "Hello").await,
            ProviderResult::failure("Sorry, I received an unusual response from the AI.")
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let spec = find_by_name("openrouter").unwrap();
        let store = store();
        let provider = HttpProvider::new(
            &make_config("k", Some(&mock_server.uri())),
            spec,
            MODEL,
            store.clone(),
            Duration::from_millis(200),
        )
        .unwrap();

        assert_eq!(
            provider.send("u1", "Hello").await,
            ProviderResult::failure("Sorry, the AI is taking too long to respond.")
        );
        assert_eq!(store.get("u1", ProviderFamily::OpenRouter).await.len(), 1);
    }

    #[tokio::test]
    async fn test_network_error() {
        // Point to a port that's not listening
        let provider = make_provider("http://127.0.0.1:1", store());
        assert_eq!(
            provider.send("u1", "Hello").await,
            ProviderResult::failure("Sorry, I'm having trouble connecting to the AI service.")
        );
    }

    #[tokio::test]
    async fn test_concurrent_turns_never_stack_user_entries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body("ok"))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&mock_server)
            .await;

        let store = store();
        let provider = Arc::new(make_provider(&mock_server.uri(), store.clone()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let p = provider.clone();
                tokio::spawn(async move { p.send("u1", &format!("msg {i}")).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_success());
        }

        let history = store.get("u1", ProviderFamily::OpenRouter).await;
        assert_eq!(history.len(), 9);
        for pair in history.windows(2) {
            assert!(!(pair[0].role == Role::User && pair[1].role == Role::User));
        }
    }
}
