//! Exact in-memory vector index using cosine similarity.
//!
//! [`FlatIndex`] keeps every chunk in insertion order and answers queries by
//! a linear scan. Policy corpora are small, so this is fast enough and has
//! no approximation error. It can be written to and read back from a JSON
//! snapshot that records the embedding model, the chunker settings and the
//! documents it was built from.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// Snapshot format version; bump when the layout changes.
const SNAPSHOT_FORMAT: u32 = 2;

/// An exact vector index with deterministic ordering.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::{FlatIndex, VectorIndex};
///
/// let index = FlatIndex::new("hashing-bow-v1/384", 384, chunks)?;
/// let top = index.search(&query, 3).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FlatIndex {
    model_id: String,
    dimensions: usize,
    chunks: Vec<Chunk>,
}

/// What an index was built from, besides the embedding model.
///
/// A snapshot is only reusable when both fields match the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    /// Fingerprint of the documents the index was built from.
    pub corpus_fingerprint: String,
    /// [`Chunker::identity`](crate::chunking::Chunker::identity) of the chunker used.
    pub chunker: String,
}

/// On-disk form of a [`FlatIndex`].
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Layout version.
    pub format: u32,
    /// Embedding model identity.
    pub model_id: String,
    /// Vector width.
    pub dimensions: usize,
    /// Documents and chunker the index was built from.
    #[serde(flatten)]
    pub source: SnapshotSource,
    /// The embedded chunks, in insertion order.
    pub chunks: Vec<Chunk>,
}

impl FlatIndex {
    /// Create an index over already-embedded chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if any chunk's embedding width
    /// differs from `dimensions`.
    pub fn new(model_id: impl Into<String>, dimensions: usize, chunks: Vec<Chunk>) -> Result<Self> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimensions) {
            return Err(RagError::IndexError {
                backend: "Flat".to_string(),
                message: format!(
                    "chunk '{}' has {} dimensions, index expects {dimensions}",
                    bad.id,
                    bad.embedding.len()
                ),
            });
        }
        Ok(Self { model_id: model_id.into(), dimensions, chunks })
    }

    /// The indexed chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Write the index to `path` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] or [`RagError::IndexError`] on write or encode failure.
    pub fn save_snapshot(&self, path: impl AsRef<Path>, source: &SnapshotSource) -> Result<()> {
        let path = path.as_ref();
        let snapshot = IndexSnapshot {
            format: SNAPSHOT_FORMAT,
            model_id: self.model_id.clone(),
            dimensions: self.dimensions,
            source: source.clone(),
            chunks: self.chunks.clone(),
        };
        let json = serde_json::to_vec(&snapshot).map_err(|e| RagError::IndexError {
            backend: "Flat".to_string(),
            message: format!("failed to encode snapshot: {e}"),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!(path = %path.display(), chunk_count = self.chunks.len(), "index snapshot written");
        Ok(())
    }

    /// Read a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// Returns the index together with the [`SnapshotSource`] it recorded.
    /// Comparing that against the current documents and chunker is up to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingMismatch`] if the snapshot was built with a
    /// different model or width than `expected_model`/`expected_dimensions`,
    /// and [`RagError::IndexError`] if it is unreadable or of another format.
    pub fn load_snapshot(
        path: impl AsRef<Path>,
        expected_model: &str,
        expected_dimensions: usize,
    ) -> Result<(Self, SnapshotSource)> {
        let bytes = fs::read(path.as_ref())?;
        let snapshot: IndexSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| RagError::IndexError {
                backend: "Flat".to_string(),
                message: format!("failed to decode snapshot: {e}"),
            })?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(RagError::IndexError {
                backend: "Flat".to_string(),
                message: format!("unsupported snapshot format {}", snapshot.format),
            });
        }
        if snapshot.model_id != expected_model || snapshot.dimensions != expected_dimensions {
            return Err(RagError::EmbeddingMismatch {
                index_model: snapshot.model_id,
                index_dimensions: snapshot.dimensions,
                query_model: expected_model.to_string(),
                query_dimensions: expected_dimensions,
            });
        }
        let index = Self::new(snapshot.model_id, snapshot.dimensions, snapshot.chunks)?;
        Ok((index, snapshot.source))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if embedding.len() != self.dimensions {
            return Err(RagError::IndexError {
                backend: "Flat".to_string(),
                message: format!(
                    "query has {} dimensions, index expects {}",
                    embedding.len(),
                    self.dimensions
                ),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(&chunk.embedding, embedding)))
            .collect();

        // stable sort: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.chunks[i].clone(), score })
            .collect())
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
