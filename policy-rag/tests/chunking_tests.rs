//! Property tests for the recursive chunker.

use policy_rag::chunking::{Chunker, RecursiveChunker};
use policy_rag::document::Page;
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zé .\n]{0,400}").unwrap()
}

/// *For any* page text, chunk size and overlap, the chunks are exact
/// character slices of the page that cover it from start to end, each at
/// most `chunk_size` characters, with consecutive chunks overlapping by at
/// least one and at most twice `chunk_overlap` characters.
mod prop_chunk_windows {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn chunks_cover_page_with_bounded_overlap(
            text in arb_text(),
            size in 1usize..120,
            overlap in 0usize..60,
        ) {
            let chunker = RecursiveChunker::new(size, overlap);
            let overlap = overlap.min(size - 1);
            let chars: Vec<char> = text.chars().collect();
            let page = Page { file_name: "p.pdf".into(), page: 0, text: text.clone() };
            let chunks = chunker.chunk(&page, 0);

            if chars.is_empty() {
                prop_assert!(chunks.is_empty());
                return Ok(());
            }

            prop_assert_eq!(chunks[0].char_start, 0);
            prop_assert_eq!(chunks.last().unwrap().char_end, chars.len());

            for chunk in &chunks {
                let expected: String = chars[chunk.char_start..chunk.char_end].iter().collect();
                prop_assert_eq!(&chunk.text, &expected);
                prop_assert!(chunk.char_end - chunk.char_start <= size);
                prop_assert!(chunk.char_end > chunk.char_start);
            }

            for pair in chunks.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                prop_assert!(next.char_start > prev.char_start);
                prop_assert!(next.char_start <= prev.char_end);
                let shared = prev.char_end - next.char_start;
                if overlap == 0 {
                    prop_assert_eq!(shared, 0);
                } else {
                    prop_assert!(shared >= 1 && shared <= 2 * overlap, "overlap {} outside 1..={}", shared, 2 * overlap);
                }
            }
        }

        #[test]
        fn chunking_is_deterministic(text in arb_text(), size in 1usize..120, overlap in 0usize..60) {
            let chunker = RecursiveChunker::new(size, overlap);
            let page = Page { file_name: "p.pdf".into(), page: 3, text };
            prop_assert_eq!(chunker.chunk(&page, 5), chunker.chunk(&page, 5));
        }
    }
}

#[test]
fn default_sized_chunks_keep_sentences_whole() {
    let sentence = "Students must maintain 75% attendance in every course. ";
    let text = sentence.repeat(40);
    let chunks = RecursiveChunker::new(1000, 100)
        .chunk(&Page { file_name: "attendance.pdf".into(), page: 0, text: text.clone() }, 0);

    assert!(chunks.len() > 1);
    for chunk in &chunks[..chunks.len() - 1] {
        assert!(chunk.text.trim_end().ends_with('.'), "chunk ends mid-sentence: {:?}", chunk.text);
    }
}
