//! Completion endpoint contract.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failures of the completion endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// No response within the configured bound.
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint rejected the credentials.
    #[error("completion endpoint rejected the API key: {0}")]
    Unauthorized(String),

    /// The endpoint is throttling requests.
    #[error("completion endpoint rate limit reached: {0}")]
    RateLimited(String),

    /// The endpoint could not be reached.
    #[error("completion endpoint unreachable: {0}")]
    Network(String),

    /// The endpoint answered with an error status.
    #[error("completion endpoint returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error detail from the body, or the raw body.
        message: String,
    },

    /// The endpoint answered, but not with a usable completion.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized(_) | Self::MalformedResponse(_) => false,
        }
    }
}

/// An external text-completion service: prompt in, completion out.
///
/// One call per question; no streaming, no tool use.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` and return the completion text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;
}
