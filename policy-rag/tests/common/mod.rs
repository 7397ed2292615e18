//! Shared fixtures: PDF writer, instrumented embedder and scripted completion clients.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use policy_rag::{CompletionClient, CompletionError, EmbeddingProvider, HashingEmbeddingProvider, RagError};

/// Write a PDF with one text line per inner slice entry, one page per outer entry.
pub fn write_pdf(dir: &Path, name: &str, pages: &[&[&str]]) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ]));
    let resources_id = doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
    )]));

    let mut page_ids = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]));
            operations.push(Operation::new(
                "Td",
                vec![Object::Integer(72), Object::Integer(720 - 16 * i as i64)],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(line.as_bytes().to_vec(), lopdf::StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            ("Resources", Object::Reference(resources_id)),
            ("Contents", Object::Reference(content_id)),
        ]));
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(page_ids.len() as i64)),
            ("Kids", Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect())),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let path = dir.join(name);
    doc.save(&path).unwrap();
    path
}

/// The handbook used by most scenarios.
pub fn write_handbook(dir: &Path) -> PathBuf {
    write_pdf(
        dir,
        "fees.pdf",
        &[
            &["Tuition is due by the 5th of each month."],
            &["The library opens at 8am on weekdays."],
        ],
    )
}

/// Hashing embedder that counts calls and can fail or stall index builds.
pub struct CountingEmbedder {
    inner: HashingEmbeddingProvider,
    pub batch_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    failing_batches: AtomicUsize,
    batch_delay: Duration,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(HashingEmbeddingProvider::DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            inner: HashingEmbeddingProvider::new(dimensions).unwrap(),
            batch_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            failing_batches: AtomicUsize::new(0),
            batch_delay: Duration::ZERO,
        }
    }

    /// Fail the next `n` batch calls.
    pub fn failing(self, n: usize) -> Self {
        self.failing_batches.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before every batch call.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, text: &str) -> policy_rag::Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> policy_rag::Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
        let fail = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RagError::EmbeddingError {
                provider: "counting".into(),
                message: "embedding service unavailable".into(),
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Completion client replaying a script of results, then repeating the last one.
pub struct ScriptedCompletion {
    script: Mutex<Vec<Result<String, CompletionError>>>,
    pub prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<Result<String, CompletionError>>) -> Self {
        Self { script: Mutex::new(script), prompts: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) }
    }

    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 { script.remove(0) } else { script[0].clone() }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
