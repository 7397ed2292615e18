//! Error types for the `policy-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::CompletionError;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A required setting (API key, model id) is absent.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A single document could not be read or parsed.
    #[error("Document error ({}): {message}", path.display())]
    DocumentError {
        /// The file that failed.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The index and the query-time embedder disagree on the vector space.
    #[error(
        "Embedding model mismatch: index built with '{index_model}' ({index_dimensions} dims), \
         queried with '{query_model}' ({query_dimensions} dims)"
    )]
    EmbeddingMismatch {
        /// Model identity recorded in the index.
        index_model: String,
        /// Dimensionality recorded in the index.
        index_dimensions: usize,
        /// Model identity of the query-time provider.
        query_model: String,
        /// Dimensionality of the query-time provider.
        query_dimensions: usize,
    },

    /// An error occurred in the vector index.
    #[error("Vector index error ({backend}): {message}")]
    IndexError {
        /// The index implementation that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Building the index failed and the retry budget is exhausted.
    #[error("Index build failed after {attempts} attempt(s): {message}")]
    IndexBuildFailed {
        /// Number of build attempts made so far.
        attempts: u32,
        /// The last build error.
        message: String,
    },

    /// The last build failed and the next attempt is still backing off.
    #[error("Index unavailable, next build attempt in {retry_in:?}: {message}")]
    IndexUnavailable {
        /// Time left before a new build may be attempted.
        retry_in: Duration,
        /// The last build error.
        message: String,
    },

    /// The question cannot be answered as submitted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The completion endpoint failed.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// An error in the RAG pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A filesystem error outside per-document loading.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`RagError`] used by the chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing secret or model id. Fatal at startup.
    ConfigurationMissing,
    /// Settings present but inconsistent.
    InvalidConfiguration,
    /// A document failed to parse. Contained by the loader.
    DocumentParseFailure,
    /// Timeout, auth, rate limit or malformed response from the completion endpoint.
    CompletionEndpointFailure,
    /// The index could not be built (embedding or store failure).
    IndexBuildFailure,
    /// Query-time and build-time embedding spaces differ.
    EmbeddingMismatch,
    /// Empty or otherwise unusable question.
    InvalidQuery,
    /// Anything else.
    Internal,
}

impl RagError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingConfiguration(_) => ErrorKind::ConfigurationMissing,
            Self::ConfigError(_) => ErrorKind::InvalidConfiguration,
            Self::DocumentError { .. } => ErrorKind::DocumentParseFailure,
            Self::Completion(_) => ErrorKind::CompletionEndpointFailure,
            Self::EmbeddingError { .. }
            | Self::IndexError { .. }
            | Self::IndexBuildFailed { .. }
            | Self::IndexUnavailable { .. } => ErrorKind::IndexBuildFailure,
            Self::EmbeddingMismatch { .. } => ErrorKind::EmbeddingMismatch,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::PipelineError(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether a later query may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Completion(e) => e.is_transient(),
            Self::IndexUnavailable { .. } | Self::InvalidQuery(_) => true,
            _ => false,
        }
    }

    /// The message shown to the person asking the question.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::CompletionEndpointFailure => {
                format!("The assistant could not produce an answer right now ({self}). Please try again.")
            }
            ErrorKind::IndexBuildFailure => {
                format!("The policy documents could not be prepared ({self}).")
            }
            ErrorKind::InvalidQuery => "Please type a question.".to_string(),
            _ => format!("Error: {self}"),
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
