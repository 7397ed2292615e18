//! Local sentence embeddings with a MiniLM (BERT) model.
//!
//! [`MiniLmEmbeddingProvider`] runs `sentence-transformers/all-MiniLM-L12-v2`
//! (or any BERT-architecture sentence model) on the CPU with Candle. Token
//! states are mean-pooled over the attention mask and L2-normalised, so
//! cosine similarity reflects meaning rather than shared words.
//!
//! Weights come from a local directory holding `config.json`,
//! `tokenizer.json` and `model.safetensors`, or are downloaded once from the
//! Hugging Face Hub into its local cache.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, Embedding, LayerNorm, Linear, Module, VarBuilder};
use serde::Deserialize;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Hub repository used when no model is given.
pub const DEFAULT_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L12-v2";

/// Longest input in tokens; longer texts are truncated.
const MAX_TOKENS: usize = 128;

/// Texts per forward pass.
const BATCH: usize = 16;

/// Additive attention bias for padding positions.
const MASKED: f64 = -10_000.0;

fn embedding_error(message: impl Display) -> RagError {
    RagError::EmbeddingError { provider: "MiniLM".to_string(), message: message.to_string() }
}

/// The subset of a BERT `config.json` the encoder needs.
#[derive(Debug, Clone, Deserialize)]
pub struct BertConfig {
    /// Tokenizer vocabulary size.
    pub vocab_size: usize,
    /// Width of token states, and of the pooled embedding.
    pub hidden_size: usize,
    /// Transformer layers.
    pub num_hidden_layers: usize,
    /// Attention heads per layer; must divide `hidden_size`.
    pub num_attention_heads: usize,
    /// Feed-forward width.
    pub intermediate_size: usize,
    /// Longest sequence the position table covers.
    pub max_position_embeddings: usize,
    /// Segment vocabulary; only segment 0 is used.
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    /// Layer norm epsilon.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    /// Feed-forward activation name.
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

impl BertConfig {
    fn activation(&self) -> Result<Activation> {
        match self.hidden_act.as_str() {
            "gelu" => Ok(Activation::Gelu),
            "gelu_new" => Ok(Activation::NewGelu),
            "relu" => Ok(Activation::Relu),
            other => Err(embedding_error(format!("unsupported hidden_act '{other}'"))),
        }
    }
}

struct BertEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
}

impl BertEmbeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            word: candle_nn::embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"))?,
            position: candle_nn::embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: candle_nn::embedding(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            norm: candle_nn::layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    /// `input_ids` is `[batch, seq]`.
    fn forward(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let seq = input_ids.dim(1)?;
        let positions = Tensor::arange(0u32, seq as u32, input_ids.device())?.unsqueeze(0)?;
        let token_types = input_ids.zeros_like()?;

        let x = self
            .word
            .forward(input_ids)?
            .broadcast_add(&self.position.forward(&positions)?)?
            .add(&self.token_type.forward(&token_types)?)?;
        self.norm.forward(&x)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        let hidden = config.hidden_size;
        let heads = config.num_attention_heads;
        let attn = vb.pp("self");
        let out = vb.pp("output");
        Ok(Self {
            query: candle_nn::linear(hidden, hidden, attn.pp("query"))?,
            key: candle_nn::linear(hidden, hidden, attn.pp("key"))?,
            value: candle_nn::linear(hidden, hidden, attn.pp("value"))?,
            output: candle_nn::linear(hidden, hidden, out.pp("dense"))?,
            norm: candle_nn::layer_norm(hidden, config.layer_norm_eps, out.pp("LayerNorm"))?,
            heads,
            head_dim: hidden / heads,
        })
    }

    /// `bias` is `[batch, 1, 1, seq]`: zero for tokens, [`MASKED`] for padding.
    fn forward(&self, x: &Tensor, bias: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq, hidden) = x.dims3()?;
        let split = |t: Tensor| -> candle_core::Result<Tensor> {
            t.reshape((batch, seq, self.heads, self.head_dim))?.transpose(1, 2)?.contiguous()
        };
        let q = split(self.query.forward(x)?)?;
        let k = split(self.key.forward(x)?)?;
        let v = split(self.value.forward(x)?)?;

        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(1.0 / (self.head_dim as f64).sqrt(), 0.0)?
            .broadcast_add(bias)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, hidden))?;

        self.norm.forward(&self.output.forward(&context)?.add(x)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    intermediate: Linear,
    activation: Activation,
    output: Linear,
    norm: LayerNorm,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig, activation: Activation) -> candle_core::Result<Self> {
        let out = vb.pp("output");
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention"), config)?,
            intermediate: candle_nn::linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            activation,
            output: candle_nn::linear(config.intermediate_size, config.hidden_size, out.pp("dense"))?,
            norm: candle_nn::layer_norm(config.hidden_size, config.layer_norm_eps, out.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, x: &Tensor, bias: &Tensor) -> candle_core::Result<Tensor> {
        let attended = self.attention.forward(x, bias)?;
        let expanded = self.activation.forward(&self.intermediate.forward(&attended)?)?;
        self.norm.forward(&self.output.forward(&expanded)?.add(&attended)?)
    }
}

struct BertEncoder {
    embeddings: BertEmbeddings,
    layers: Vec<EncoderLayer>,
}

impl BertEncoder {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let activation = config.activation()?;
        // sentence-transformers checkpoints have no `bert.` prefix, raw BERT ones do
        let vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb
        };
        let embeddings = BertEmbeddings::load(vb.pp("embeddings"), config).map_err(embedding_error)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i), config, activation))
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(embedding_error)?;
        Ok(Self { embeddings, layers })
    }

    /// Token states `[batch, seq, hidden]`.
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let bias = attention_mask
            .to_dtype(DType::F32)?
            .affine(-MASKED, MASKED)?
            .unsqueeze(1)?
            .unsqueeze(1)?;
        let mut x = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            x = layer.forward(&x, &bias)?;
        }
        Ok(x)
    }
}

struct Model {
    encoder: BertEncoder,
    tokenizer: Tokenizer,
    device: Device,
}

impl Model {
    fn embed_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH) {
            let inputs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let encodings = self.tokenizer.encode_batch(inputs, true).map_err(embedding_error)?;
            vectors.extend(self.pooled(&encodings).map_err(embedding_error)?);
        }
        Ok(vectors)
    }

    /// Right-pads the batch, runs the encoder and mean-pools real tokens.
    fn pooled(&self, encodings: &[tokenizers::Encoding]) -> candle_core::Result<Vec<Vec<f32>>> {
        let rows = encodings.len();
        let seq = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0).max(1);

        let mut ids = vec![0u32; rows * seq];
        let mut mask = vec![0u32; rows * seq];
        for (row, encoding) in encodings.iter().enumerate() {
            let offset = row * seq;
            for (i, (&id, &m)) in
                encoding.get_ids().iter().zip(encoding.get_attention_mask()).enumerate()
            {
                ids[offset + i] = id;
                mask[offset + i] = m;
            }
        }

        let ids = Tensor::from_vec(ids, (rows, seq), &self.device)?;
        let mask = Tensor::from_vec(mask, (rows, seq), &self.device)?;
        let states = self.encoder.forward(&ids, &mask)?;

        let weights = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = states.broadcast_mul(&weights)?.sum(1)?;
        let counts = weights.sum(1)?.maximum(1e-9f32)?;
        let mean = summed.broadcast_div(&counts)?;
        let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12f32)?;
        mean.broadcast_div(&norms)?.to_vec2::<f32>()
    }
}

/// Sentence embedder running a BERT-family model locally.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::minilm::{DEFAULT_MINILM_REPO, MiniLmEmbeddingProvider};
///
/// let provider = MiniLmEmbeddingProvider::from_hub(DEFAULT_MINILM_REPO)?;
/// assert_eq!(provider.dimensions(), 384);
/// ```
#[derive(Clone)]
pub struct MiniLmEmbeddingProvider {
    model: Arc<Model>,
    dimensions: usize,
    model_id: String,
}

impl std::fmt::Debug for MiniLmEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniLmEmbeddingProvider")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl MiniLmEmbeddingProvider {
    /// Load from a directory containing `config.json`, `tokenizer.json` and
    /// `model.safetensors`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if a file is missing or unreadable.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Self::from_files(
            &name,
            &dir.join("config.json"),
            &dir.join("tokenizer.json"),
            &dir.join("model.safetensors"),
        )
    }

    /// Download `repo` from the Hugging Face Hub (or reuse the local cache)
    /// and load it. Blocks while downloading.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the download or load fails.
    pub fn from_hub(repo: &str) -> Result<Self> {
        info!(repo, "fetching sentence embedding model");
        let api = hf_hub::api::sync::Api::new().map_err(embedding_error)?;
        let model = api.model(repo.to_string());
        let fetch = |file: &str| -> Result<PathBuf> {
            model.get(file).map_err(|e| embedding_error(format!("{repo}/{file}: {e}")))
        };
        Self::from_files(
            repo,
            &fetch("config.json")?,
            &fetch("tokenizer.json")?,
            &fetch("model.safetensors")?,
        )
    }

    fn from_files(name: &str, config: &Path, tokenizer: &Path, weights: &Path) -> Result<Self> {
        let config: BertConfig = serde_json::from_slice(&std::fs::read(config)?)
            .map_err(|e| embedding_error(format!("invalid config.json: {e}")))?;
        let tokenizer = Tokenizer::from_file(tokenizer)
            .map_err(|e| embedding_error(format!("invalid tokenizer.json: {e}")))?;
        let device = Device::Cpu;
        let vb = VarBuilder::from_buffered_safetensors(std::fs::read(weights)?, DType::F32, &device)
            .map_err(embedding_error)?;

        let provider = Self::from_parts(name, &config, vb, tokenizer, device)?;
        info!(
            model = %provider.model_id,
            layers = config.num_hidden_layers,
            dimensions = provider.dimensions,
            "sentence embedding model loaded"
        );
        Ok(provider)
    }

    fn from_parts(
        name: &str,
        config: &BertConfig,
        vb: VarBuilder,
        mut tokenizer: Tokenizer,
        device: Device,
    ) -> Result<Self> {
        let max_length = MAX_TOKENS.min(config.max_position_embeddings);
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams { max_length, ..Default::default() }))
            .map_err(embedding_error)?;
        let encoder = BertEncoder::load(vb, config)?;

        Ok(Self {
            model: Arc::new(Model { encoder, tokenizer, device }),
            dimensions: config.hidden_size,
            model_id: format!("{name}/{}", config.hidden_size),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for MiniLmEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| embedding_error("model returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || model.embed_sync(&owned))
            .await
            .map_err(|e| embedding_error(format!("embedding task failed: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use candle_nn::VarMap;

    use super::*;

    const TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "tuition": 1, "is": 2, "due": 3, "the": 4, "library": 5, "opens": 6, "at": 7, "8am": 8},
            "unk_token": "[UNK]"
        }
    }"#;

    fn tiny_config() -> BertConfig {
        serde_json::from_str(
            r#"{
                "vocab_size": 9,
                "hidden_size": 8,
                "num_hidden_layers": 2,
                "num_attention_heads": 2,
                "intermediate_size": 16,
                "max_position_embeddings": 32
            }"#,
        )
        .unwrap()
    }

    fn tiny_provider() -> MiniLmEmbeddingProvider {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let tokenizer = Tokenizer::from_bytes(TOKENIZER.as_bytes()).unwrap();
        MiniLmEmbeddingProvider::from_parts("tiny-bert", &tiny_config(), vb, tokenizer, Device::Cpu)
            .unwrap()
    }

    #[test]
    fn config_defaults_match_bert() {
        let config = tiny_config();
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.layer_norm_eps, 1e-12);
        assert!(matches!(config.activation(), Ok(Activation::Gelu)));
    }

    #[test]
    fn unknown_activation_is_rejected() {
        let config = BertConfig { hidden_act: "swish".into(), ..tiny_config() };
        assert!(matches!(config.activation(), Err(RagError::EmbeddingError { .. })));
    }

    #[tokio::test]
    async fn vectors_are_unit_length_and_hidden_sized() {
        let provider = tiny_provider();
        assert_eq!(provider.model_id(), "tiny-bert/8");
        let v = provider.embed("Tuition is due").await.unwrap();
        assert_eq!(v.len(), provider.dimensions());
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm {norm}");
    }

    #[tokio::test]
    async fn padding_in_a_batch_does_not_change_an_embedding() {
        let provider = tiny_provider();
        let alone = provider.embed("tuition is due").await.unwrap();
        let batch = provider.embed_batch(&["tuition is due", "the library opens at 8am"]).await.unwrap();

        assert_eq!(batch.len(), 2);
        for (a, b) in alone.iter().zip(&batch[0]) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[tokio::test]
    async fn different_texts_get_different_vectors() {
        let provider = tiny_provider();
        let vectors = provider.embed_batch(&["tuition is due", "the library opens at 8am"]).await.unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn missing_model_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(MiniLmEmbeddingProvider::load(temp.path()).is_err());
    }
}
