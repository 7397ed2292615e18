//! Assistant orchestrator.
//!
//! The [`PolicyAssistant`] owns the lazily built index and answers
//! questions with it. The first query (or [`PolicyAssistant::initialize`])
//! triggers the build: load PDFs → chunk → embed → index. Concurrent first
//! queries share one build, and once built the index is never rebuilt for
//! the life of the process.
//!
//! # Example
//!
//! ```rust,ignore
//! use policy_rag::{AssistantConfig, GroqCompletionClient, HashingEmbeddingProvider, PolicyAssistant};
//!
//! let config = AssistantConfig::from_env()?;
//! let assistant = PolicyAssistant::builder()
//!     .completion_client(Arc::new(GroqCompletionClient::from_env(config.completion_timeout)?))
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .config(config)
//!     .build()?;
//!
//! let answer = assistant.ask("When is tuition due?").await?;
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker, chunk_pages};
use crate::config::AssistantConfig;
use crate::document::{Answer, RetrievedContext};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::flat::{FlatIndex, SnapshotSource};
use crate::index::build_index;
use crate::llm::CompletionClient;
use crate::loader::{LoadOutcome, load_directory};
use crate::prompt::PromptTemplate;
use crate::retriever::Retriever;
use crate::synthesizer::{AnswerSynthesizer, fallback_answer};

/// Lifecycle of the index, as reported by [`PolicyAssistant::state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// No build has been attempted yet.
    Uninitialized,
    /// The documents directory yielded no text. Questions get the fallback answer.
    NoDocuments,
    /// The index is built and immutable.
    Ready {
        /// Number of indexed chunks.
        chunks: usize,
    },
    /// The last build failed; see [`RetryPolicy`](crate::RetryPolicy).
    BuildFailed {
        /// Build attempts made so far.
        attempts: u32,
        /// The last build error.
        last_error: String,
    },
}

/// A successful build: either an index or the knowledge that there is nothing to index.
enum Built {
    NoDocuments,
    Ready { index: Arc<FlatIndex>, retriever: Retriever },
}

struct BuildFailure {
    attempts: u32,
    message: String,
    failed_at: Instant,
}

/// Answers policy questions over a lazily built, shared index.
///
/// Construct one via [`PolicyAssistant::builder()`] and share it behind an
/// `Arc`. All methods take `&self`.
pub struct PolicyAssistant {
    config: AssistantConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    synthesizer: AnswerSynthesizer,
    built: OnceCell<Built>,
    build_lock: Mutex<()>,
    failure: StdMutex<Option<BuildFailure>>,
    attempts: AtomicU32,
}

impl PolicyAssistant {
    /// Create a new [`PolicyAssistantBuilder`].
    pub fn builder() -> PolicyAssistantBuilder {
        PolicyAssistantBuilder::default()
    }

    /// Return a reference to the assistant configuration.
    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Number of index builds started so far.
    pub fn build_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Current lifecycle state of the index.
    pub fn state(&self) -> IndexState {
        match self.built.get() {
            Some(Built::NoDocuments) => IndexState::NoDocuments,
            Some(Built::Ready { index, .. }) => IndexState::Ready { chunks: index.chunks().len() },
            None => match self.failure_record().as_ref() {
                Some(failure) => IndexState::BuildFailed {
                    attempts: failure.attempts,
                    last_error: failure.message.clone(),
                },
                None => IndexState::Uninitialized,
            },
        }
    }

    /// The built index, if a build has succeeded with documents present.
    pub fn index(&self) -> Option<Arc<FlatIndex>> {
        match self.built.get() {
            Some(Built::Ready { index, .. }) => Some(Arc::clone(index)),
            _ => None,
        }
    }

    /// Build the index now instead of on the first question.
    ///
    /// # Errors
    ///
    /// Same as the build step of [`ask`](Self::ask).
    pub async fn initialize(&self) -> Result<IndexState> {
        self.ensure_built().await?;
        Ok(self.state())
    }

    /// Retrieve the context for `question`, building the index if needed.
    ///
    /// Returns `None` when no documents are loaded.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] for a blank question,
    /// [`RagError::IndexUnavailable`] inside a retry backoff window,
    /// [`RagError::IndexBuildFailed`] once build attempts are exhausted, or
    /// the build error of the attempt this call made.
    pub async fn retrieve(&self, question: &str) -> Result<Option<RetrievedContext>> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidQuery("question is empty".to_string()));
        }

        match self.ensure_built().await? {
            Built::NoDocuments => Ok(None),
            Built::Ready { retriever, .. } => {
                retriever.retrieve(question, self.config.rag.top_k).await.map(Some)
            }
        }
    }

    /// Answer `question` from the policy documents.
    ///
    /// With no documents loaded this returns the fixed fallback answer and
    /// does not contact the completion endpoint.
    ///
    /// # Errors
    ///
    /// See [`retrieve`](Self::retrieve); completion failures are returned as
    /// [`RagError::Completion`].
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let context = self.retrieve(question).await?;
        self.synthesizer.synthesize(question.trim(), context).await
    }

    fn failure_record(&self) -> std::sync::MutexGuard<'_, Option<BuildFailure>> {
        self.failure.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn ensure_built(&self) -> Result<&Built> {
        if let Some(built) = self.built.get() {
            return Ok(built);
        }

        let _guard = self.build_lock.lock().await;
        if let Some(built) = self.built.get() {
            return Ok(built);
        }
        self.check_retry_budget()?;

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, docs_dir = %self.config.docs_dir.display(), "building policy index");

        match self.build().await {
            Ok(built) => {
                self.failure_record().take();
                let _ = self.built.set(built);
                self.built
                    .get()
                    .ok_or_else(|| RagError::PipelineError("index vanished after build".to_string()))
            }
            Err(e) => {
                error!(attempt, error = %e, "index build failed");
                *self.failure_record() = Some(BuildFailure {
                    attempts: attempt,
                    message: e.to_string(),
                    failed_at: Instant::now(),
                });
                if attempt >= self.config.retry.max_attempts {
                    Err(RagError::IndexBuildFailed { attempts: attempt, message: e.to_string() })
                } else {
                    Err(e)
                }
            }
        }
    }

    fn check_retry_budget(&self) -> Result<()> {
        let record = self.failure_record();
        let Some(failure) = record.as_ref() else {
            return Ok(());
        };

        if failure.attempts >= self.config.retry.max_attempts {
            return Err(RagError::IndexBuildFailed {
                attempts: failure.attempts,
                message: failure.message.clone(),
            });
        }

        let wait = self.config.retry.backoff_after(failure.attempts);
        let elapsed = failure.failed_at.elapsed();
        if elapsed < wait {
            return Err(RagError::IndexUnavailable {
                retry_in: wait - elapsed,
                message: failure.message.clone(),
            });
        }
        Ok(())
    }

    async fn build(&self) -> Result<Built> {
        let docs_dir = self.config.docs_dir.clone();
        let outcome = tokio::task::spawn_blocking(move || load_directory(&docs_dir))
            .await
            .map_err(|e| RagError::PipelineError(format!("document loader task failed: {e}")))??;

        let report = match outcome {
            LoadOutcome::NoDocuments { skipped } => {
                warn!(
                    docs_dir = %self.config.docs_dir.display(),
                    skipped = skipped.len(),
                    "no policy documents loaded"
                );
                return Ok(Built::NoDocuments);
            }
            LoadOutcome::Loaded(report) => report,
        };

        let source = SnapshotSource {
            corpus_fingerprint: report.fingerprint.clone(),
            chunker: self.chunker.identity(),
        };
        let index = match self.load_snapshot(&source).await {
            Some(index) => index,
            None => {
                let chunks = chunk_pages(self.chunker.as_ref(), &report.pages);
                let index = Arc::new(
                    build_index(chunks, self.embedding_provider.as_ref(), self.config.rag.embed_batch_size)
                        .await?,
                );
                self.save_snapshot(&index, &source).await;
                index
            }
        };

        let retriever = Retriever::new(
            index.clone(),
            Arc::clone(&self.embedding_provider),
            self.config.rag.similarity_threshold,
        )?;
        info!(
            documents = report.documents,
            pages = report.pages.len(),
            chunks = index.chunks().len(),
            skipped = report.skipped.len(),
            "policy index ready"
        );
        Ok(Built::Ready { index, retriever })
    }

    async fn load_snapshot(&self, source: &SnapshotSource) -> Option<Arc<FlatIndex>> {
        let path = self.config.index_snapshot.clone().filter(|p| p.exists())?;
        let model = self.embedding_provider.model_id().to_string();
        let dimensions = self.embedding_provider.dimensions();

        let shown = path.display().to_string();
        let loaded =
            tokio::task::spawn_blocking(move || FlatIndex::load_snapshot(&path, &model, dimensions))
                .await;
        match loaded {
            Ok(Ok((index, recorded))) if recorded == *source => {
                info!(path = %shown, chunks = index.chunks().len(), "loaded index snapshot");
                Some(Arc::new(index))
            }
            Ok(Ok((_, recorded))) if recorded.chunker != source.chunker => {
                info!(
                    path = %shown,
                    recorded = %recorded.chunker,
                    current = %source.chunker,
                    "chunk settings changed since snapshot, rebuilding"
                );
                None
            }
            Ok(Ok(_)) => {
                info!(path = %shown, "documents changed since snapshot, rebuilding");
                None
            }
            Ok(Err(e)) => {
                warn!(path = %shown, error = %e, "ignoring unusable index snapshot");
                None
            }
            Err(e) => {
                warn!(path = %shown, error = %e, "snapshot loader task failed");
                None
            }
        }
    }

    async fn save_snapshot(&self, index: &Arc<FlatIndex>, source: &SnapshotSource) {
        let Some(path) = self.config.index_snapshot.clone() else {
            return;
        };
        let index = Arc::clone(index);
        let source = source.clone();
        let shown = path.display().to_string();

        let saved = tokio::task::spawn_blocking(move || index.save_snapshot(&path, &source)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %shown, error = %e, "failed to write index snapshot"),
            Err(e) => warn!(path = %shown, error = %e, "snapshot writer task failed"),
        }
    }
}

/// Builder for constructing a [`PolicyAssistant`].
///
/// The embedding provider and the completion client are required. The
/// config defaults to [`AssistantConfig::default`], the chunker to a
/// [`RecursiveChunker`] sized from the config, and the prompt to
/// [`PromptTemplate::default`].
#[derive(Default)]
pub struct PolicyAssistantBuilder {
    config: Option<AssistantConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    completion_client: Option<Arc<dyn CompletionClient>>,
    prompt_template: Option<PromptTemplate>,
}

impl PolicyAssistantBuilder {
    /// Set the assistant configuration.
    pub fn config(mut self, config: AssistantConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Shorthand for overriding only the documents directory.
    pub fn docs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.get_or_insert_with(AssistantConfig::default).docs_dir = dir.into();
        self
    }

    /// Set the embedding provider used at build and query time.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the page chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the completion endpoint client.
    pub fn completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion_client = Some(client);
        self
    }

    /// Set the prompt template.
    pub fn prompt_template(mut self, template: PromptTemplate) -> Self {
        self.prompt_template = Some(template);
        self
    }

    /// Build the [`PolicyAssistant`]. No documents are read yet.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required part is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<PolicyAssistant> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let completion_client = self
            .completion_client
            .ok_or_else(|| RagError::ConfigError("completion_client is required".to_string()))?;
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(RecursiveChunker::new(config.rag.chunk_size, config.rag.chunk_overlap))
        });

        let synthesizer = AnswerSynthesizer::new(
            completion_client,
            self.prompt_template.unwrap_or_default(),
            config.institution.clone(),
            config.completion_timeout,
        )
        .with_fallback(fallback_answer(&config.docs_dir));

        Ok(PolicyAssistant {
            config,
            embedding_provider,
            chunker,
            synthesizer,
            built: OnceCell::new(),
            build_lock: Mutex::new(()),
            failure: StdMutex::new(None),
            attempts: AtomicU32::new(0),
        })
    }
}
