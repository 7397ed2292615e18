//! Page chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], a
//! sliding window that prefers paragraph, then line or sentence, then word
//! boundaries before falling back to a hard cut.

use crate::document::{Chunk, Page};

/// A strategy for splitting pages into chunks.
///
/// Implementations produce [`Chunk`]s with text and provenance but no
/// embeddings. Embeddings are attached later by the index build.
pub trait Chunker: Send + Sync {
    /// Split a page into chunks, numbering them from `first_sequence`.
    ///
    /// Returns an empty `Vec` if the page has empty text.
    fn chunk(&self, page: &Page, first_sequence: usize) -> Vec<Chunk>;

    /// Name and settings of this chunker, e.g. `recursive/1000/100`.
    ///
    /// Index snapshots record it, so two chunkers that can split the same
    /// page differently must report different identities.
    fn identity(&self) -> String;
}

/// Chunk every page in order, assigning a global sequence across pages.
pub fn chunk_pages(chunker: &dyn Chunker, pages: &[Page]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        let page_chunks = chunker.chunk(page, chunks.len());
        chunks.extend(page_chunks);
    }
    chunks
}

/// Splits text into windows of at most `chunk_size` characters that overlap
/// by about `chunk_overlap` characters (never more than twice that).
///
/// The window end snaps back to the last `\n\n`, else the last line end or
/// sentence end, else the last whitespace, looking no further back than half
/// a window. The next window starts `chunk_overlap` characters before the
/// previous end, moved forward to a word start inside the overlap, or else
/// back to the start of the word it falls in. Lengths are counted in characters.
///
/// Chunk IDs are `{file_name}#p{page}#c{index}`.
///
/// # Example
///
/// ```rust,ignore
/// use policy_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 100);
/// let chunks = chunker.chunk(&page, 0);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk, at least 1
    /// * `chunk_overlap`: overlap between consecutive chunks, clamped below `chunk_size`
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size - 1) }
    }

    /// Character ranges of the chunks of `text`.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut spans = Vec::new();
        let mut start = 0;

        while start < len {
            if len - start <= self.chunk_size {
                spans.push((start, len));
                break;
            }

            let hard_end = start + self.chunk_size;
            let floor = start + (self.chunk_size / 2).max(self.chunk_overlap + 1);
            let end = find_break(&chars, floor, hard_end).unwrap_or(hard_end);
            spans.push((start, end));

            start = if self.chunk_overlap == 0 {
                end
            } else {
                let from = end - self.chunk_overlap;
                let lower = (start + 1).max(from.saturating_sub(self.chunk_overlap));
                snap_to_word_start(&chars, lower, from, end)
            };
        }

        spans
    }
}

/// Latest boundary in `floor..=hard_end`, by separator priority.
fn find_break(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    let is_paragraph = |p: usize| p >= 2 && chars[p - 2] == '\n' && chars[p - 1] == '\n';
    let is_sentence = |p: usize| {
        chars[p - 1] == '\n'
            || (p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?'))
    };
    let is_word = |p: usize| chars[p - 1].is_whitespace();

    let candidates: [&dyn Fn(usize) -> bool; 3] = [&is_paragraph, &is_sentence, &is_word];
    candidates
        .iter()
        .find_map(|accept| (floor.max(1)..=hard_end).rev().find(|&p| accept(p)))
}

/// First word start in `from..end`, else the last one in `lower..=from`,
/// else `from`.
fn snap_to_word_start(chars: &[char], lower: usize, from: usize, end: usize) -> usize {
    let is_word_start =
        |q: usize| !chars[q].is_whitespace() && (q == 0 || chars[q - 1].is_whitespace());
    (from..end)
        .find(|&q| is_word_start(q))
        .or_else(|| (lower..=from).rev().find(|&q| is_word_start(q)))
        .unwrap_or(from)
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, page: &Page, first_sequence: usize) -> Vec<Chunk> {
        if page.text.is_empty() {
            return Vec::new();
        }

        // byte_at[i] is the byte offset of character i; the last entry is text.len()
        let mut byte_at: Vec<usize> = page.text.char_indices().map(|(i, _)| i).collect();
        byte_at.push(page.text.len());

        self.spans(&page.text)
            .into_iter()
            .enumerate()
            .map(|(i, (char_start, char_end))| Chunk {
                id: format!("{}#p{}#c{i}", page.file_name, page.page),
                text: page.text[byte_at[char_start]..byte_at[char_end]].to_string(),
                source: page.provenance(),
                sequence: first_sequence + i,
                char_start,
                char_end,
                embedding: Vec::new(),
            })
            .collect()
    }

    fn identity(&self) -> String {
        format!("recursive/{}/{}", self.chunk_size, self.chunk_overlap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> Page {
        Page { file_name: "handbook.pdf".into(), page: 2, text: text.into() }
    }

    #[test]
    fn short_page_is_one_chunk() {
        let chunks = RecursiveChunker::new(1000, 100).chunk(&page("Fees are due monthly."), 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Fees are due monthly.");
        assert_eq!(chunks[0].id, "handbook.pdf#p2#c0");
        assert_eq!(chunks[0].sequence, 7);
        assert_eq!(chunks[0].source.page, 2);
    }

    #[test]
    fn empty_page_has_no_chunks() {
        assert!(RecursiveChunker::new(10, 2).chunk(&page(""), 0).is_empty());
    }

    #[test]
    fn prefers_paragraph_break() {
        let text = "First paragraph here.\n\nSecond paragraph follows on.";
        let spans = RecursiveChunker::new(30, 5).spans(text);
        assert_eq!(spans[0], (0, 23));
        assert_eq!(&text[..23], "First paragraph here.\n\n");
    }

    #[test]
    fn does_not_split_mid_word_when_a_space_exists() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = RecursiveChunker::new(20, 6).chunk(&page(text), 0);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 20);
            let first = chunk.text.split_whitespace().next().unwrap();
            assert!(text.split_whitespace().any(|w| w == first), "cut inside word: {first}");
        }
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let text = "x".repeat(25);
        let spans = RecursiveChunker::new(10, 3).spans(&text);
        assert_eq!(spans, vec![(0, 10), (7, 17), (14, 24), (21, 25)]);
    }

    #[test]
    fn multibyte_text_is_sliced_on_char_boundaries() {
        let text = "é".repeat(30);
        let chunks = RecursiveChunker::new(8, 2).chunk(&page(&text), 0);
        assert!(chunks.iter().all(|c| c.text.chars().all(|ch| ch == 'é')));
        assert_eq!(chunks.last().unwrap().char_end, 30);
    }

    #[test]
    fn identity_reflects_effective_settings() {
        assert_eq!(RecursiveChunker::new(1000, 100).identity(), "recursive/1000/100");
        assert_eq!(RecursiveChunker::new(10, 50).identity(), "recursive/10/9");
        assert_ne!(RecursiveChunker::new(500, 50).identity(), RecursiveChunker::new(1000, 100).identity());
    }

    #[test]
    fn chunk_pages_numbers_sequence_across_pages() {
        let pages = vec![page(&"word ".repeat(50)), page("tail")];
        let chunks = chunk_pages(&RecursiveChunker::new(40, 10), &pages);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
        }
        assert_eq!(chunks.last().unwrap().text, "tail");
    }
}
