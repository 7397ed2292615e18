//! Vector index trait and the index build step.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::document::{Chunk, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::flat::FlatIndex;

/// An immutable, searchable set of embedded chunks.
///
/// Implementations are interchangeable: the retriever only relies on this
/// contract. Indexes are read concurrently by many queries, so they are
/// shared through `Arc` and never mutated after construction.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::{FlatIndex, VectorIndex};
///
/// let index = build_index(chunks, &provider, 32).await?;
/// let results = index.search(&query_embedding, 3).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Search for the `top_k` most similar chunks to the given embedding.
    ///
    /// Returns results ordered by descending similarity score; equal scores
    /// keep insertion order.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    /// Whether the index holds no chunks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of the stored vectors.
    fn dimensions(&self) -> usize;

    /// Identity of the embedding model the vectors came from.
    fn model_id(&self) -> &str;
}

/// Embed `chunks` in batches of `batch_size` and index them.
///
/// This is the expensive step: one provider call per batch.
///
/// # Errors
///
/// Returns [`RagError::EmbeddingError`] if the provider fails, returns the
/// wrong number of vectors, or returns a vector of the wrong width.
pub async fn build_index(
    mut chunks: Vec<Chunk>,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<FlatIndex> {
    let dimensions = provider.dimensions();
    let batch_size = batch_size.max(1);

    for (batch_no, batch) in chunks.chunks_mut(batch_size).enumerate() {
        let embeddings = {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            provider.embed_batch(&texts).await?
        };
        if embeddings.len() != batch.len() {
            return Err(RagError::EmbeddingError {
                provider: provider.model_id().to_string(),
                message: format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                ),
            });
        }

        for (chunk, embedding) in batch.iter_mut().zip(embeddings) {
            if embedding.len() != dimensions {
                return Err(RagError::EmbeddingError {
                    provider: provider.model_id().to_string(),
                    message: format!(
                        "chunk '{}' embedded to {} dimensions, expected {dimensions}",
                        chunk.id,
                        embedding.len()
                    ),
                });
            }
            chunk.embedding = embedding;
        }
        debug!(batch = batch_no, size = batch.len(), "embedded batch");
    }

    info!(chunk_count = chunks.len(), model = provider.model_id(), "index built");
    FlatIndex::new(provider.model_id(), dimensions, chunks)
}
