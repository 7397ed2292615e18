//! Embedding provider for OpenAI-compatible `/embeddings` endpoints.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Width of `text-embedding-3-small` vectors.
const DEFAULT_DIMENSIONS: usize = 1536;

const PROVIDER: &str = "OpenAI";

/// An [`EmbeddingProvider`] calling `{base_url}/embeddings`.
///
/// The model identity recorded in the index is `"{model}/{dimensions}"`, so
/// a Matryoshka width change is treated as a different vector space.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(512);
/// let embedding = provider.embed("When is tuition due?").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    model_id: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for `text-embedding-3-small` on the OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::MissingConfiguration`] for an empty key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::MissingConfiguration("embedding API key is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: OPENAI_API_BASE.into(),
            model: DEFAULT_MODEL.into(),
            model_id: model_id(DEFAULT_MODEL, DEFAULT_DIMENSIONS),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a provider from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::MissingConfiguration("OPENAI_API_KEY is not set".into())
        })?;
        Self::new(api_key)
    }

    /// Set the model name, with its native width.
    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self.request_dimensions = None;
        self.model_id = model_id(&self.model, dimensions);
        self
    }

    /// Ask the API to truncate vectors to `dims` (Matryoshka models only).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self.model_id = model_id(&self.model, dims);
        self
    }

    /// Point at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

fn model_id(model: &str, dimensions: usize) -> String {
    format!("{model}/{dimensions}")
}

fn embedding_error(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: message.into() }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Parse a success body into one vector per input, in input order.
fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| embedding_error(format!("failed to parse response: {e}")))?;
    if response.data.len() != expected {
        return Err(embedding_error(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }

    let mut data = response.data;
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

fn error_detail(body: String) -> String {
    serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body)
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| embedding_error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                embedding_error(format!("request failed: {e}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| embedding_error(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            error!(provider = PROVIDER, %status, "API error");
            return Err(embedding_error(format!("API returned {status}: {}", error_detail(body))));
        }

        parse_embeddings(&body, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
