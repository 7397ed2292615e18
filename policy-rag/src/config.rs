//! Configuration for the RAG pipeline, the assistant and the completion endpoint.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default documents directory, relative to the working directory.
pub const DEFAULT_DOCS_DIR: &str = "policies";

/// Default institution the assistant speaks for.
pub const DEFAULT_INSTITUTION: &str = "Iqra University";

/// Default completion model.
pub const DEFAULT_COMPLETION_MODEL: &str = "llama-3.1-8b-instant";

/// Groq's OpenAI-compatible API base.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Environment variable holding the completion API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Configuration parameters for chunking and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    ///
    /// Cosine similarity never drops below -1.0, so the default keeps every result.
    pub similarity_threshold: f32,
    /// Number of chunks sent to the embedding provider per call.
    pub embed_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 3,
            similarity_threshold: -1.0,
            embed_batch_size: 32,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set how many chunks are embedded per provider call.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How failed index builds are retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total build attempts before the failure is cached for the process.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on the wait between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Wait required after `failures` consecutive failed attempts.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Settings for the assistant as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    /// Chunking and retrieval parameters.
    pub rag: RagConfig,
    /// Directory scanned for `*.pdf` files.
    pub docs_dir: PathBuf,
    /// Institution named in the prompt persona.
    pub institution: String,
    /// Upper bound on one completion call.
    pub completion_timeout: Duration,
    /// Retry behavior for failed index builds.
    pub retry: RetryPolicy,
    /// Where to persist the built index, if anywhere.
    pub index_snapshot: Option<PathBuf>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            rag: RagConfig::default(),
            docs_dir: PathBuf::from(DEFAULT_DOCS_DIR),
            institution: DEFAULT_INSTITUTION.to_string(),
            completion_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            index_snapshot: None,
        }
    }
}

impl AssistantConfig {
    /// Defaults overridden by `POLICY_RAG_DOCS_DIR`, `POLICY_RAG_INSTITUTION`,
    /// `POLICY_RAG_TIMEOUT_SECS` and `POLICY_RAG_INDEX_SNAPSHOT`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable is present but unparsable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup("POLICY_RAG_DOCS_DIR") {
            config.docs_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("POLICY_RAG_INSTITUTION") {
            config.institution = name;
        }
        if let Some(secs) = lookup("POLICY_RAG_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                RagError::ConfigError(format!("POLICY_RAG_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("POLICY_RAG_INDEX_SNAPSHOT") {
            config.index_snapshot = Some(PathBuf::from(path));
        }
        config.validate()?;
        Ok(config)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] on an invalid [`RagConfig`], a zero
    /// timeout, or a retry policy with no attempts.
    pub fn validate(&self) -> Result<()> {
        self.rag.validate()?;
        if self.completion_timeout.is_zero() {
            return Err(RagError::ConfigError("completion_timeout must be non-zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the completion endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionConfig {
    /// Bearer token for the endpoint.
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// OpenAI-compatible API base, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Cap on generated tokens.
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl CompletionConfig {
    /// Groq defaults with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            base_url: GROQ_API_BASE.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Read `GROQ_API_KEY`, plus optional `POLICY_RAG_MODEL` and `POLICY_RAG_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::MissingConfiguration`] if the API key is unset or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(API_KEY_ENV)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RagError::MissingConfiguration(format!("{API_KEY_ENV} is not set")))?;
        let mut config = Self::new(api_key.trim());
        if let Some(model) = lookup("POLICY_RAG_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = lookup("POLICY_RAG_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    /// Set the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
