//! Data types for pages, chunks, search results and answers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a piece of text came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Provenance {
    /// File name of the source PDF, without directory.
    pub file_name: String,
    /// Zero-based page index inside the PDF.
    pub page: u32,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, page {}", self.file_name, self.page + 1)
    }
}

/// One page of extracted text. Consumed by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// File name of the source PDF.
    pub file_name: String,
    /// Zero-based page index.
    pub page: u32,
    /// Extracted plain text.
    pub text: String,
}

impl Page {
    /// Provenance of this page.
    pub fn provenance(&self) -> Provenance {
        Provenance { file_name: self.file_name.clone(), page: self.page }
    }
}

/// A bounded window of page text with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{file_name}#p{page}#c{n}`.
    pub id: String,
    /// The text content of the chunk, an exact slice of the page text.
    pub text: String,
    /// The page this chunk was cut from.
    pub source: Provenance,
    /// Position of this chunk in the whole build.
    pub sequence: usize,
    /// Character offset of the first character within the page text.
    pub char_start: usize,
    /// Character offset one past the last character within the page text.
    pub char_end: usize,
    /// The vector embedding; empty until the index build attaches it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// The top-k chunks retrieved for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// The question the chunks were retrieved for.
    pub question: String,
    /// Results ordered by descending score.
    pub results: Vec<SearchResult>,
}

impl RetrievedContext {
    /// Provenance of every retrieved chunk, in rank order.
    pub fn sources(&self) -> Vec<Provenance> {
        self.results.iter().map(|r| r.chunk.source.clone()).collect()
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// How an [`Answer`] was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Completion over retrieved context.
    Grounded,
    /// Fixed reply because no documents are loaded; no endpoint call was made.
    Fallback,
}

/// The reply to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// Text returned to the chat surface.
    pub text: String,
    /// Whether the text is grounded or the fixed fallback.
    pub kind: AnswerKind,
    /// Chunks supplied to the model, in rank order. Empty for fallbacks.
    pub sources: Vec<Provenance>,
    /// Version of the prompt template used, if a prompt was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,
}

impl Answer {
    /// Whether this is the no-documents fallback.
    pub fn is_fallback(&self) -> bool {
        self.kind == AnswerKind::Fallback
    }
}
