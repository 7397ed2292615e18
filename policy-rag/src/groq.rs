//! Completion client for Groq and other OpenAI-compatible chat APIs.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::CompletionConfig;
use crate::error::{RagError, Result};
use crate::llm::{CompletionClient, CompletionError};

/// A [`CompletionClient`] calling `{base_url}/chat/completions`.
///
/// Uses `reqwest` directly. The whole request, including reading the body,
/// is bounded by the timeout given at construction.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::{CompletionConfig, GroqCompletionClient};
///
/// let client = GroqCompletionClient::new(CompletionConfig::from_env()?, Duration::from_secs(30))?;
/// let text = client.complete("Say hello").await?;
/// ```
pub struct GroqCompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
    endpoint: String,
    timeout: Duration,
}

impl GroqCompletionClient {
    /// Create a client for the given endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::MissingConfiguration`] if the API key or model is
    /// empty, and [`RagError::ConfigError`] if the HTTP client cannot be built.
    pub fn new(config: CompletionConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::MissingConfiguration("completion API key is empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(RagError::MissingConfiguration("completion model id is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self { client, config, endpoint, timeout })
    }

    /// Create a client from `GROQ_API_KEY` and friends, see [`CompletionConfig::from_env`].
    pub fn from_env(timeout: Duration) -> Result<Self> {
        Self::new(CompletionConfig::from_env()?, timeout)
    }

    /// The full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

// ── OpenAI-compatible request/response types ───────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-success status and its body to a [`CompletionError`].
fn classify_status(status: StatusCode, body: &str) -> CompletionError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Unauthorized(detail),
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(detail),
        _ => CompletionError::Api { status: status.as_u16(), message: detail },
    }
}

/// Extract the first choice's text from a successful response body.
fn parse_completion(body: &str) -> std::result::Result<String, CompletionError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(format!("failed to parse response: {e}")))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CompletionError::MalformedResponse("response has no completion text".into()))
}

#[async_trait]
impl CompletionClient for GroqCompletionClient {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
        debug!(model = %self.config.model, prompt_len = prompt.len(), "sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.config.model, error = %e, "completion request failed");
                if e.is_timeout() {
                    CompletionError::Timeout(self.timeout)
                } else {
                    CompletionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(self.timeout)
            } else {
                CompletionError::Network(format!("failed to read response body: {e}"))
            }
        })?;

        if !status.is_success() {
            error!(model = %self.config.model, %status, "completion endpoint error");
            return Err(classify_status(status, &body));
        }

        parse_completion(&body)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_failure_kinds() {
        let body = r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error"}}"#;
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, body),
            CompletionError::Unauthorized("Invalid API Key".into())
        );
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            CompletionError::RateLimited(ref m) if m == "slow down"
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            CompletionError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn parses_first_choice() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Tuition is due by the 5th."}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Tuition is due by the 5th.");
    }

    #[test]
    fn empty_or_garbled_responses_are_malformed() {
        assert!(matches!(parse_completion("<html>"), Err(CompletionError::MalformedResponse(_))));
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn request_omits_unset_options() {
        let client =
            GroqCompletionClient::new(CompletionConfig::new("gsk_test"), Duration::from_secs(5))
                .unwrap();
        let json = serde_json::to_value(client.request_body("hi")).unwrap();
        assert_eq!(json["model"], "llama-3.1-8b-instant");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json.get("temperature").is_none());
        assert_eq!(client.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn empty_key_is_missing_configuration() {
        let err = GroqCompletionClient::new(CompletionConfig::new(""), Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, RagError::MissingConfiguration(_)));
    }
}
