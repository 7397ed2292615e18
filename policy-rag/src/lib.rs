//! # policy-rag
//!
//! Retrieval-augmented question answering over a folder of institutional
//! policy PDFs.
//!
//! ## Overview
//!
//! On the first question the [`PolicyAssistant`] loads every PDF in its
//! documents directory, splits the page text into overlapping chunks,
//! embeds them and keeps the vectors in an in-memory [`FlatIndex`]. Each
//! question is then embedded, the top-k most similar chunks are rendered
//! into a versioned [`PromptTemplate`] and one completion call produces the
//! [`Answer`]. With no documents loaded the assistant returns a fixed
//! fallback without calling the endpoint.
//!
//! ## Features
//!
//! - `openai` (default): [`GroqCompletionClient`] for Groq or any
//!   OpenAI-compatible chat API, and [`OpenAIEmbeddingProvider`].
//!
//! - `minilm`: [`MiniLmEmbeddingProvider`], local sentence embeddings with
//!   `all-MiniLM-L12-v2` on Candle. The `policy-chat` binary enables it.
//!
//! [`HashingEmbeddingProvider`] is always available as an offline,
//! keyword-only backend for tests and air-gapped runs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use policy_rag::{AssistantConfig, ChatSession, DEFAULT_MINILM_REPO, GroqCompletionClient, MiniLmEmbeddingProvider, PolicyAssistant};
//!
//! let config = AssistantConfig::from_env()?;
//! let assistant = Arc::new(
//!     PolicyAssistant::builder()
//!         .completion_client(Arc::new(GroqCompletionClient::from_env(config.completion_timeout)?))
//!         .embedding_provider(Arc::new(MiniLmEmbeddingProvider::from_hub(DEFAULT_MINILM_REPO)?))
//!         .config(config)
//!         .build()?,
//! );
//!
//! let mut session = ChatSession::new(assistant);
//! let answer = session.send("When is tuition due?").await?;
//! println!("{}", answer.text);
//! ```

#![warn(missing_docs)]

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod flat;
pub mod hashing;
pub mod index;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod session;
pub mod synthesizer;

#[cfg(feature = "openai")]
pub mod groq;
#[cfg(feature = "minilm")]
pub mod minilm;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, RecursiveChunker, chunk_pages};
pub use config::{AssistantConfig, CompletionConfig, RagConfig, RagConfigBuilder, RetryPolicy};
pub use document::{Answer, AnswerKind, Chunk, Page, Provenance, RetrievedContext, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{ErrorKind, RagError, Result};
pub use flat::FlatIndex;
pub use hashing::HashingEmbeddingProvider;
pub use index::{VectorIndex, build_index};
pub use llm::{CompletionClient, CompletionError};
pub use loader::{LoadOutcome, LoadReport, SkippedDocument, load_directory};
pub use pipeline::{IndexState, PolicyAssistant, PolicyAssistantBuilder};
pub use prompt::PromptTemplate;
pub use retriever::Retriever;
pub use session::{ChatMessage, ChatSession, Role};
pub use synthesizer::{AnswerSynthesizer, fallback_answer};

#[cfg(feature = "openai")]
pub use groq::GroqCompletionClient;
#[cfg(feature = "minilm")]
pub use minilm::{DEFAULT_MINILM_REPO, MiniLmEmbeddingProvider};
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
