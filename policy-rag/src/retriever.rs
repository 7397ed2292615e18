//! Question → top-k chunks.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::RetrievedContext;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Embeds questions with the build-time provider and searches the index.
///
/// Construction fails fast if the provider's model identity or width
/// differs from the one recorded in the index.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    similarity_threshold: f32,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("model_id", &self.index.model_id())
            .field("chunks", &self.index.len())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish()
    }
}

impl Retriever {
    /// Pair an index with the provider used to embed questions.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingMismatch`] if the two disagree on model
    /// identity or dimensionality.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        similarity_threshold: f32,
    ) -> Result<Self> {
        if index.model_id() != provider.model_id() || index.dimensions() != provider.dimensions()
        {
            error!(
                index_model = index.model_id(),
                query_model = provider.model_id(),
                "embedding model mismatch"
            );
            return Err(RagError::EmbeddingMismatch {
                index_model: index.model_id().to_string(),
                index_dimensions: index.dimensions(),
                query_model: provider.model_id().to_string(),
                query_dimensions: provider.dimensions(),
            });
        }
        Ok(Self { index, provider, similarity_threshold })
    }

    /// The index being searched.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Return the `top_k` chunks most similar to `question`, best first.
    ///
    /// Results scoring below the similarity threshold are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] for a blank question, and
    /// propagates embedding and search failures.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<RetrievedContext> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidQuery("question is empty".to_string()));
        }

        let embedding = self.provider.embed(question).await?;
        let results = self.index.search(&embedding, top_k).await?;

        let threshold = self.similarity_threshold;
        let results: Vec<_> = results.into_iter().filter(|r| r.score >= threshold).collect();
        debug!(
            result_count = results.len(),
            top_score = results.first().map(|r| r.score),
            "retrieved context"
        );

        Ok(RetrievedContext { question: question.to_string(), results })
    }
}
