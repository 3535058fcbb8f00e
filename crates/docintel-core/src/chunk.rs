//! Page-aware, sentence-aware text chunker.
//!
//! Splits extracted document pages into overlapping [`Chunk`]s of roughly
//! `target_size` characters. Every chunk records the inclusive page range it
//! spans so answers can cite their sources.
//!
//! # Algorithm
//!
//! 1. Group input: with `respect_pages`, each page is chunked on its own;
//!    otherwise pages are joined with `\n` into one stream.
//! 2. While the remaining text is longer than `target_size`, pick a break
//!    point at the target offset. With `respect_sentences`, scan forward up to
//!    20% of `target_size` for `.`, `!` or `?` followed by whitespace.
//! 3. Emit the slice, then restart `overlap_ratio × target_size` characters
//!    before the break. That chunk carries `overlap_with_previous = true`.
//! 4. Flush the tail as the final chunk. Whitespace-only slices are dropped.
//!
//! Offsets are counted in `char`s, never bytes, so multi-byte text is safe.
//!
//! # Example
//!
//! ```rust
//! use docintel_core::chunk::{chunk_pages, ChunkOptions};
//! use docintel_core::models::Page;
//!
//! let pages = vec![Page::new(1, "Hello world."), Page::new(2, "Second page.")];
//! let chunks = chunk_pages("doc-123", &pages, &ChunkOptions::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].start_page, 2);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Page};

/// Approximate characters-per-token ratio used for chunk token counts.
///
/// Plain-text heuristic only; context budgeting uses the more conservative
/// estimate in [`crate::budget`].
const CHARS_PER_TOKEN: usize = 4;

/// Largest overlap ratio accepted; higher values are clamped.
pub const MAX_OVERLAP_RATIO: f32 = 0.3;

/// Sentence-break lookahead as a fraction of `target_size`.
const SENTENCE_LOOKAHEAD_RATIO: usize = 5;

/// Chunking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Target chunk length in characters.
    pub target_size: usize,
    /// Fraction of `target_size` repeated at the start of the next chunk, in `[0, 0.3]`.
    pub overlap_ratio: f32,
    /// Prefer breaking after a sentence terminator near the target offset.
    pub respect_sentences: bool,
    /// Never let a chunk span more than one page.
    pub respect_pages: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_size: 1000,
            overlap_ratio: 0.1,
            respect_sentences: true,
            respect_pages: true,
        }
    }
}

impl ChunkOptions {
    /// Number of characters carried into the next chunk.
    fn overlap_chars(&self) -> usize {
        let ratio = self.overlap_ratio.clamp(0.0, MAX_OVERLAP_RATIO);
        (ratio * self.target_size as f32).floor() as usize
    }

    fn lookahead(&self) -> usize {
        (self.target_size / SENTENCE_LOOKAHEAD_RATIO).max(1)
    }
}

/// Estimate the token count of a chunk as `ceil(chars / 4)`.
pub fn estimate_chunk_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split pages into overlapping chunks with page-range metadata.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Text shorter than `target_size` yields exactly one chunk.
/// - Empty or whitespace-only input yields zero chunks.
/// - The first chunk never has `overlap_with_previous` set.
pub fn chunk_pages(document_id: &str, pages: &[Page], options: &ChunkOptions) -> Vec<Chunk> {
    let target = options.target_size.max(1);
    let mut chunks = Vec::new();

    let groups: Vec<Vec<(char, u32)>> = if options.respect_pages {
        pages.iter().map(tag_chars).collect()
    } else {
        let mut joined = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                let prev = pages[i - 1].number;
                joined.push(('\n', prev));
            }
            joined.extend(tag_chars(page));
        }
        vec![joined]
    };

    for chars in &groups {
        let len = chars.len();
        let mut start = 0usize;
        let mut carried = false;

        while start < len {
            if len - start <= target {
                push_chunk(&mut chunks, document_id, &chars[start..], carried);
                break;
            }

            let target_end = start + target;
            let end = if options.respect_sentences {
                find_sentence_break(chars, target_end, options.lookahead())
            } else {
                target_end
            };

            push_chunk(&mut chunks, document_id, &chars[start..end], carried);

            if end >= len {
                break;
            }

            let overlap = options.overlap_chars().min(end - start - 1);
            start = end - overlap;
            carried = overlap > 0;
        }
    }

    chunks
}

fn tag_chars(page: &Page) -> Vec<(char, u32)> {
    page.text.chars().map(|c| (c, page.number)).collect()
}

/// Find the first sentence terminator followed by whitespace at or after
/// `target_end`, looking at most `lookahead` characters ahead.
fn find_sentence_break(chars: &[(char, u32)], target_end: usize, lookahead: usize) -> usize {
    let len = chars.len();
    let limit = (target_end + lookahead).min(len);
    for i in target_end.saturating_sub(1)..limit {
        if matches!(chars[i].0, '.' | '!' | '?') {
            if i + 1 == len {
                return len;
            }
            if chars[i + 1].0.is_whitespace() {
                return i + 1;
            }
        }
    }
    target_end
}

fn push_chunk(chunks: &mut Vec<Chunk>, document_id: &str, slice: &[(char, u32)], overlap: bool) {
    let first = slice.iter().position(|(c, _)| !c.is_whitespace());
    let last = slice.iter().rposition(|(c, _)| !c.is_whitespace());
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) => (f, l),
        _ => return,
    };

    let trimmed = &slice[first..=last];
    let text: String = trimmed.iter().map(|(c, _)| *c).collect();
    let index = chunks.len() as i64;
    chunks.push(make_chunk(
        document_id,
        index,
        text,
        trimmed[0].1,
        trimmed[trimmed.len() - 1].1,
        overlap && index > 0,
    ));
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(
    document_id: &str,
    index: i64,
    text: String,
    start_page: u32,
    end_page: u32,
    overlap_with_previous: bool,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        token_count: estimate_chunk_tokens(&text),
        text,
        start_page,
        end_page,
        overlap_with_previous,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(target: usize, overlap: f32, sentences: bool, pages: bool) -> ChunkOptions {
        ChunkOptions {
            target_size: target,
            overlap_ratio: overlap,
            respect_sentences: sentences,
            respect_pages: pages,
        }
    }

    #[test]
    fn test_short_document_single_chunk() {
        let pages = vec![Page::new(1, "A short contract clause.")];
        let chunks = chunk_pages("doc1", &pages, &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "A short contract clause.");
        assert_eq!((chunks[0].start_page, chunks[0].end_page), (1, 1));
        assert!(!chunks[0].overlap_with_previous);
    }

    #[test]
    fn test_empty_document_no_chunks() {
        assert!(chunk_pages("doc1", &[], &ChunkOptions::default()).is_empty());
        let blank = vec![Page::new(1, "   \n\t "), Page::new(2, "")];
        assert!(chunk_pages("doc1", &blank, &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_whitespace_pages_skipped() {
        let pages = vec![
            Page::new(1, "Intro text."),
            Page::new(2, "    "),
            Page::new(3, "Closing text."),
        ];
        let chunks = chunk_pages("doc1", &pages, &ChunkOptions::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_page, 1);
        assert_eq!(chunks[1].start_page, 3);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_long_page_tagged_with_same_page() {
        let text = "x".repeat(350);
        let pages = vec![Page::new(7, text)];
        let chunks = chunk_pages("doc1", &pages, &opts(100, 0.0, false, true));
        assert_eq!(chunks.len(), 4);
        for c in &chunks {
            assert_eq!((c.start_page, c.end_page), (7, 7));
        }
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert_eq!(total, 350);
    }

    #[test]
    fn test_overlap_carries_trailing_chars() {
        let text: String = (0..300).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let pages = vec![Page::new(1, text.clone())];
        let chunks = chunk_pages("doc1", &pages, &opts(100, 0.2, false, true));
        assert!(chunks.len() >= 3);
        assert!(!chunks[0].overlap_with_previous);
        for w in chunks.windows(2) {
            assert!(w[1].overlap_with_previous);
            let tail: String = w[0].text.chars().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect();
            assert!(w[1].text.starts_with(&tail), "next chunk should start with previous tail");
        }
    }

    #[test]
    fn test_overlap_ratio_clamped() {
        let o = opts(100, 0.9, false, true);
        assert_eq!(o.overlap_chars(), 30);
        let o = opts(100, -1.0, false, true);
        assert_eq!(o.overlap_chars(), 0);
    }

    #[test]
    fn test_sentence_break_preferred() {
        let first = "a".repeat(95);
        let text = format!("{}. Then more words follow here and keep going on and on for a while.", first);
        let pages = vec![Page::new(1, text)];
        let chunks = chunk_pages("doc1", &pages, &opts(90, 0.0, true, true));
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[0].text.chars().count(), 96);
    }

    #[test]
    fn test_sentence_break_falls_back_to_raw_offset() {
        let text = "b".repeat(400);
        let pages = vec![Page::new(1, text)];
        let chunks = chunk_pages("doc1", &pages, &opts(100, 0.0, true, true));
        assert_eq!(chunks[0].text.chars().count(), 100);
    }

    #[test]
    fn test_cross_page_chunks_when_pages_not_respected() {
        let pages = vec![
            Page::new(1, "First page text."),
            Page::new(2, "Second page text."),
            Page::new(3, "Third page text."),
        ];
        let chunks = chunk_pages("doc1", &pages, &opts(1000, 0.1, true, false));
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_page, chunks[0].end_page), (1, 3));
    }

    #[test]
    fn test_chunk_indices_contiguous_and_tokens_estimated() {
        let pages: Vec<Page> = (1..=5)
            .map(|n| Page::new(n, format!("Sentence on page {}. ", n).repeat(20)))
            .collect();
        let chunks = chunk_pages("doc1", &pages, &opts(120, 0.1, true, false));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.token_count, c.text.chars().count().div_ceil(4));
            assert!(c.start_page <= c.end_page);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────┐ Résumé naïve café. ".repeat(30);
        let pages = vec![Page::new(1, text)];
        let chunks = chunk_pages("doc1", &pages, &opts(50, 0.1, true, true));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_estimate_chunk_tokens() {
        assert_eq!(estimate_chunk_tokens(""), 0);
        assert_eq!(estimate_chunk_tokens("abcd"), 1);
        assert_eq!(estimate_chunk_tokens("abcde"), 2);
    }

    #[test]
    fn test_deterministic_text() {
        let pages = vec![Page::new(1, "Alpha. Beta. Gamma. Delta. ".repeat(40))];
        let c1 = chunk_pages("doc1", &pages, &opts(100, 0.1, true, true));
        let c2 = chunk_pages("doc1", &pages, &opts(100, 0.1, true, true));
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }
}
