//! Local feature-hashing embedder.
//!
//! [`HashingEmbeddingProvider`] needs no model download and no network: it
//! hashes lower-cased word unigrams and bigrams into a fixed number of signed
//! buckets and L2-normalises the result. Texts that share vocabulary get a
//! high cosine similarity. It does not capture meaning (paraphrases with no
//! shared words score near zero), so it serves tests and offline runs; use
//! a sentence model for real corpora.

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Weight of a bigram relative to a unigram.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbeddingProvider {
    /// Same width as `all-MiniLM-L12-v2`, so either can back an index of the same shape.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Create a provider producing `dimensions`-wide vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::EmbeddingError {
                provider: "Hashing".into(),
                message: "dimensions must be greater than zero".into(),
            });
        }
        Ok(Self { dimensions, model_id: format!("hashing-bow-v1/{dimensions}") })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        for token in &tokens {
            self.add_feature(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        // high bit picks the sign
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self { dimensions: Self::DEFAULT_DIMENSIONS, model_id: "hashing-bow-v1/384".to_string() }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |acc, b| (acc ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Lower-cased alphanumeric runs.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
