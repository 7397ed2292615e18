//! PDF discovery and per-page text extraction.
//!
//! [`load_directory`] scans the top level of a directory for `*.pdf` files
//! (case-insensitive), extracts text page by page with `lopdf`, and reports
//! files it could not parse instead of failing the whole load.

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::Document as PdfDocument;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::Page;
use crate::error::{RagError, Result};

/// A PDF that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    /// Path of the skipped file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// Pages and bookkeeping from a successful scan.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Extracted pages, ordered by file name then page index.
    pub pages: Vec<Page>,
    /// Number of PDFs that contributed at least one page.
    pub documents: usize,
    /// Files that were found but could not be used.
    pub skipped: Vec<SkippedDocument>,
    /// SHA-256 over every discovered PDF's name and bytes, hex encoded.
    pub fingerprint: String,
}

/// Result of scanning the documents directory.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The directory is missing, holds no PDFs, or no PDF yielded any text.
    NoDocuments {
        /// Files that were found but could not be used.
        skipped: Vec<SkippedDocument>,
    },
    /// At least one page of text was extracted.
    Loaded(LoadReport),
}

/// List the `*.pdf` files directly inside `dir`, sorted by file name.
///
/// Creates the directory (and its parents) if it does not exist.
///
/// # Errors
///
/// Returns [`RagError::Io`] if the directory cannot be created, or
/// [`RagError::ConfigError`] if the path exists but is not a directory.
pub fn discover_pdf_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        info!(dir = %dir.display(), "documents directory missing, creating it");
        fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(RagError::ConfigError(format!(
            "documents path '{}' is not a directory",
            dir.display()
        )));
    }

    let mut files = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_pdf(entry.path()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    files.sort();
    Ok(files)
}

fn is_pdf(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".pdf"))
}

/// Scan `dir` and extract per-page text from every PDF in it.
///
/// Unreadable or malformed PDFs are recorded in [`LoadReport::skipped`]
/// and logged; they never abort the load.
///
/// # Errors
///
/// Only directory-level failures are returned, see [`discover_pdf_files`].
pub fn load_directory(dir: impl AsRef<Path>) -> Result<LoadOutcome> {
    let dir = dir.as_ref();
    let files = discover_pdf_files(dir)?;
    if files.is_empty() {
        info!(dir = %dir.display(), "no PDF documents found");
        return Ok(LoadOutcome::NoDocuments { skipped: Vec::new() });
    }

    let mut hasher = Sha256::new();
    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    let mut documents = 0;

    for path in files {
        let file_name = display_name(&path);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %file_name, error = %e, "skipping unreadable PDF");
                skipped.push(SkippedDocument { path, reason: e.to_string() });
                continue;
            }
        };
        hasher.update(file_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);

        match extract_pages(&file_name, &bytes) {
            Ok(doc_pages) if doc_pages.is_empty() => {
                warn!(file = %file_name, "skipping PDF without extractable text");
                skipped.push(SkippedDocument { path, reason: "no extractable text".to_string() });
            }
            Ok(doc_pages) => {
                info!(file = %file_name, pages = doc_pages.len(), "loaded document");
                documents += 1;
                pages.extend(doc_pages);
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "skipping malformed PDF");
                skipped.push(SkippedDocument { path, reason: e.to_string() });
            }
        }
    }

    if pages.is_empty() {
        return Ok(LoadOutcome::NoDocuments { skipped });
    }

    Ok(LoadOutcome::Loaded(LoadReport {
        pages,
        documents,
        skipped,
        fingerprint: format!("{:x}", hasher.finalize()),
    }))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Extract the text of every page of an in-memory PDF.
///
/// Pages with no text are omitted; page indexes stay those of the PDF.
///
/// # Errors
///
/// Returns [`RagError::DocumentError`] if the PDF cannot be parsed.
pub fn extract_pages(file_name: &str, bytes: &[u8]) -> Result<Vec<Page>> {
    let pdf = PdfDocument::load_mem(bytes).map_err(|e| RagError::DocumentError {
        path: PathBuf::from(file_name),
        message: format!("failed to parse PDF: {e}"),
    })?;

    let mut pages = Vec::new();
    for page_number in pdf.get_pages().into_keys() {
        let text = match pdf.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                debug!(file = file_name, page = page_number, error = %e, "page has no decodable text");
                continue;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        pages.push(Page {
            file_name: file_name.to_string(),
            page: page_number.saturating_sub(1),
            text: text.to_string(),
        });
    }
    Ok(pages)
}
