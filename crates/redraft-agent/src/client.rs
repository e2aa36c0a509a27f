//! Anthropic Messages API client
//!
//! Implements [`Generator`]. Rate-limit and server-error retries live here,
//! in the collaborator, so the revision loop itself never retries.

use crate::auth;
use crate::capability::{ChatMessage, ChatRole, Generator};
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AnthropicMessage, AnthropicRequest, AnthropicResponse, Model};
use async_trait::async_trait;
use redraft_core::{ModelConfig, RedraftError, Result};
use std::sync::Arc;
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Generation client for the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f64,
    max_retries: u32,
    initial_backoff: Duration,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AnthropicClient {
    /// Create a client with an explicit API key and model id
    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key: api_key.into(),
            model: Model::resolve(model),
            max_tokens: 4096,
            temperature: 0.9,
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Create a client from model configuration, reading the API key from the environment
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&config.api_key_env)?;
        Ok(Self::new(api_key, &config.name)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Point the client at another endpoint (proxies, tests)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[ChatMessage]) -> AnthropicRequest {
        let (system, messages) = split_system(messages);
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages,
        }
    }
}

/// Separate system messages into the top-level `system` field
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let rest = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| AnthropicMessage {
            role: match m.role {
                ChatRole::Assistant => "assistant".to_string(),
                _ => "user".to_string(),
            },
            content: m.content.clone(),
        })
        .collect();

    (system, rest)
}

#[async_trait]
impl Generator for AnthropicClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        if !self.circuit_breaker.can_execute() {
            return Err(RedraftError::ApiLimit(format!(
                "Circuit breaker is OPEN - too many API failures. Wait {} seconds before retry.",
                self.circuit_breaker.time_until_retry().as_secs()
            )));
        }

        let request = self.build_request(messages);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            tracing::debug!(
                model = %self.model,
                attempt = retries + 1,
                "Sending request to Anthropic API"
            );

            let response = self
                .http
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| RedraftError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            // Rate limited: honor retry-after, otherwise back off exponentially
            if status.as_u16() == 429 {
                retries += 1;
                if retries > self.max_retries {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown".to_string());
                    return Err(RedraftError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        self.max_retries, error_text
                    )));
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "Rate limited (429). Waiting {:?} before retry {}/{}",
                    wait,
                    retries,
                    self.max_retries
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < self.max_retries {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {:?} before retry {}/{}",
                        status,
                        backoff,
                        retries,
                        self.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }

                self.circuit_breaker.record_failure();
                tracing::error!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.circuit_breaker.failure_count()
                );

                return Err(RedraftError::Api(format!(
                    "Anthropic API error {}: {}",
                    status, error_text
                )));
            }

            let body: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| RedraftError::Api(format!("Failed to parse response: {}", e)))?;

            let text: String = body
                .content
                .iter()
                .filter(|c| c.content_type == "text")
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("");

            if text.trim().is_empty() {
                return Err(RedraftError::Generation(
                    "No text content in response".to_string(),
                ));
            }

            self.circuit_breaker.record_success();

            match &body.usage {
                Some(usage) => tracing::info!(
                    "Generation complete ({} chars, {} input tokens, {} output tokens)",
                    text.len(),
                    usage.input_tokens,
                    usage.output_tokens
                ),
                None => tracing::info!("Generation complete ({} chars)", text.len()),
            }

            return Ok(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 12, "output_tokens": 7}
        })
    }

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new("test-key", "sonnet")
            .with_api_url(format!("{}/v1/messages", server.uri()))
            .with_retry_policy(2, Duration::from_millis(1))
    }

    #[test]
    fn test_split_system_moves_instructions() {
        let messages = vec![
            ChatMessage::system("be nice"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be nice"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, "user");
        assert_eq!(rest[1].role, "assistant");
    }

    #[test]
    fn test_alias_resolved_to_api_id() {
        let client = AnthropicClient::new("k", "haiku");
        assert_eq!(client.model(), Model::Haiku.api_name());
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Thanks so much!")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(text, "Thanks so much!");
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::Api(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(matches!(err, RedraftError::ApiLimit(_)));
    }
}
