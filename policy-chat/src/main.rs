//! # policy-chat
//!
//! Console chat over a folder of policy PDFs.
//!
//! Requires `GROQ_API_KEY` (a `.env` file in the working directory is read
//! if present). The default embedder downloads `all-MiniLM-L12-v2` into the
//! Hugging Face cache on first run; `--embedder hashing` needs no download.
//!
//! Run: `cargo run -p policy-chat -- --docs-dir policies`

mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
#[cfg(feature = "minilm")]
use policy_rag::{DEFAULT_MINILM_REPO, MiniLmEmbeddingProvider};
use policy_rag::{
    AssistantConfig, CompletionConfig, EmbeddingProvider, GroqCompletionClient,
    HashingEmbeddingProvider, IndexState, OpenAIEmbeddingProvider, PolicyAssistant,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "policy_rag=info,policy_chat=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Embedder {
    /// Local sentence model (all-MiniLM-L12-v2), downloaded on first use.
    #[cfg(feature = "minilm")]
    Minilm,
    /// Keyword-only feature hashing, fully offline.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint (needs `OPENAI_API_KEY`).
    Openai,
}

#[cfg(feature = "minilm")]
fn default_embedder() -> Embedder {
    Embedder::Minilm
}

#[cfg(not(feature = "minilm"))]
fn default_embedder() -> Embedder {
    Embedder::Hashing
}

#[derive(Debug, Parser)]
#[command(name = "policy-chat", version, about = "Ask questions about institutional policy PDFs")]
struct Args {
    /// Directory scanned for PDF files
    #[arg(long, env = "POLICY_RAG_DOCS_DIR")]
    docs_dir: Option<PathBuf>,

    /// Institution the assistant speaks for
    #[arg(long, env = "POLICY_RAG_INSTITUTION")]
    institution: Option<String>,

    /// Completion model id
    #[arg(long, env = "POLICY_RAG_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible API base for completions
    #[arg(long, env = "POLICY_RAG_BASE_URL")]
    base_url: Option<String>,

    /// Number of excerpts given to the model
    #[arg(long)]
    top_k: Option<usize>,

    /// Completion timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Persist the index here and reuse it while the documents are unchanged
    #[arg(long, env = "POLICY_RAG_INDEX_SNAPSHOT")]
    index_snapshot: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, value_enum, default_value_t = default_embedder())]
    embedder: Embedder,

    /// Sentence model for `--embedder minilm`: a Hugging Face repo id or a local directory
    #[arg(long, env = "POLICY_RAG_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Vector width for the chosen embedder
    #[arg(long)]
    embedding_dims: Option<usize>,

    /// List the page each answer was grounded in
    #[arg(long)]
    show_sources: bool,

    /// Ask one question, print the answer and exit
    #[arg(long, short)]
    question: Option<String>,
}

impl Args {
    fn assistant_config(&self) -> anyhow::Result<AssistantConfig> {
        let mut config = AssistantConfig::from_env()?;
        if let Some(dir) = &self.docs_dir {
            config.docs_dir = dir.clone();
        }
        if let Some(name) = &self.institution {
            config.institution = name.clone();
        }
        if let Some(top_k) = self.top_k {
            config.rag.top_k = top_k;
        }
        if let Some(secs) = self.timeout_secs {
            config.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = &self.index_snapshot {
            config.index_snapshot = Some(path.clone());
        }
        config.validate()?;
        Ok(config)
    }

    fn completion_config(&self) -> anyhow::Result<CompletionConfig> {
        let mut config = CompletionConfig::from_env()
            .context("set GROQ_API_KEY in the environment or a .env file")?;
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    async fn embedding_provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        Ok(match self.embedder {
            #[cfg(feature = "minilm")]
            Embedder::Minilm => {
                let model = self.embedding_model.clone().unwrap_or_else(|| DEFAULT_MINILM_REPO.to_string());
                eprintln!("Loading embedding model {model}...");
                let provider = tokio::task::spawn_blocking(move || {
                    let dir = PathBuf::from(&model);
                    if dir.is_dir() {
                        MiniLmEmbeddingProvider::load(dir)
                    } else {
                        MiniLmEmbeddingProvider::from_hub(&model)
                    }
                })
                .await??;
                Arc::new(provider)
            }
            Embedder::Hashing => Arc::new(HashingEmbeddingProvider::new(
                self.embedding_dims.unwrap_or(HashingEmbeddingProvider::DEFAULT_DIMENSIONS),
            )?),
            Embedder::Openai => {
                let provider = OpenAIEmbeddingProvider::from_env()?;
                match self.embedding_dims {
                    Some(dims) => Arc::new(provider.with_dimensions(dims)),
                    None => Arc::new(provider),
                }
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.assistant_config()?;
    let completion = args.completion_config()?;
    let institution = config.institution.clone();

    let client = GroqCompletionClient::new(completion, config.completion_timeout)?;
    let assistant = Arc::new(
        PolicyAssistant::builder()
            .embedding_provider(args.embedding_provider().await?)
            .completion_client(Arc::new(client))
            .config(config)
            .build()?,
    );

    eprintln!("Loading policy documents...");
    match assistant.initialize().await {
        Ok(IndexState::Ready { chunks }) => info!(chunks, "policy documents loaded"),
        Ok(IndexState::NoDocuments) => eprintln!(
            "No policy documents found in '{}'. Add PDFs there and restart.",
            assistant.config().docs_dir.display()
        ),
        Ok(state) => warn!(?state, "unexpected index state after initialization"),
        Err(e) => eprintln!("{}", e.user_message()),
    }

    if let Some(question) = &args.question {
        let answer = assistant.ask(question).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{}", console::format_answer(&answer, args.show_sources));
        return Ok(());
    }

    console::run_console(assistant, &institution, args.show_sources).await
}
