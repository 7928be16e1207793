//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into [`TextChunk`]s of at most
//! `chunk_size` characters. Consecutive chunks share exactly `overlap`
//! characters so that context spanning a boundary is present in both.
//!
//! # Algorithm
//!
//! 1. If the text has at most `chunk_size` characters, return it whole.
//! 2. Otherwise open a window `[start, start + chunk_size)`.
//! 3. Move the window end back to the best natural boundary found in the
//!    back half of the window: paragraph break, then line break, then
//!    sentence end, then any whitespace. With no boundary, cut hard.
//! 4. Emit the window (whitespace-only windows are dropped) and start the
//!    next one `overlap` characters before this window's end.
//! 5. Stop once a window reaches the end of the text.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use ragthread_core::chunk::split_text;
//!
//! let chunks = split_text("Hello world.\n\nSecond paragraph.", 1000, 200).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use crate::error::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP: usize = 200;

/// Window parameters for [`split_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl ChunkerConfig {
    /// Build a validated configuration.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        validate(chunk_size, overlap)?;
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Split `text` with this configuration.
    pub fn split(&self, text: &str) -> Result<Vec<TextChunk>> {
        split_text(text, self.chunk_size, self.overlap)
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// A window of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Zero-based index among the chunks of one split.
    pub index: usize,
    pub text: String,
    /// Start offset in characters (inclusive).
    pub start: usize,
    /// End offset in characters (exclusive).
    pub end: usize,
}

fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfiguration(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::InvalidConfiguration(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// # Guarantees
///
/// - Text no longer than `chunk_size` yields exactly one chunk.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - For consecutive emitted windows `a`, `b`: `b.start == a.end - overlap`.
/// - The output is a pure function of the inputs.
///
/// # Errors
///
/// [`RagError::InvalidConfiguration`] if `chunk_size == 0` or
/// `overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    validate(chunk_size, overlap)?;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    if total <= chunk_size {
        return Ok(vec![TextChunk {
            index: 0,
            text: text.to_string(),
            start: 0,
            end: total,
        }]);
    }

    // Boundaries closer to `start` than this would make tiny chunks, or
    // fail to advance past the overlap.
    let min_span = (overlap + 1).max(chunk_size / 2);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(&chars, start + min_span, hard_end)
        };

        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(TextChunk {
                index: chunks.len(),
                text: piece,
                start,
                end,
            });
        }

        if end == total {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Pick a window end in `[min_end, hard_end]`, preferring the strongest
/// boundary closest to `hard_end`.
fn find_break(chars: &[char], min_end: usize, hard_end: usize) -> usize {
    let min_end = min_end.max(2);
    if min_end > hard_end {
        return hard_end;
    }
    let candidates = || (min_end..=hard_end).rev();

    let is_paragraph = |e: usize| chars[e - 1] == '\n' && chars[e - 2] == '\n';
    let is_line = |e: usize| chars[e - 1] == '\n';
    let is_sentence =
        |e: usize| chars[e - 1].is_whitespace() && matches!(chars[e - 2], '.' | '!' | '?');
    let is_space = |e: usize| chars[e - 1].is_whitespace();

    candidates()
        .find(|&e| is_paragraph(e))
        .or_else(|| candidates().find(|&e| is_line(e)))
        .or_else(|| candidates().find(|&e| is_sentence(e)))
        .or_else(|| candidates().find(|&e| is_space(e)))
        .unwrap_or(hard_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[TextChunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_exactly_chunk_size_is_single_chunk() {
        let text = "x".repeat(1000);
        let chunks = split_text(&text, 1000, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 1000);
    }

    #[test]
    fn test_overlap_not_smaller_than_size_is_rejected() {
        assert!(matches!(
            split_text("abc", 100, 100),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            split_text("abc", 100, 150),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ChunkerConfig::new(0, 0),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_2400_chars_yields_three_overlapping_chunks() {
        let text = "abcdefghi ".repeat(240);
        assert_eq!(text.chars().count(), 2400);

        let chunks = split_text(&text, 1000, 200).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 1000));
        assert_eq!((chunks[1].start, chunks[1].end), (800, 1800));
        assert_eq!((chunks[2].start, chunks[2].end), (1600, 2400));
        assert_eq!(reconstruct(&chunks, 200), text);
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "z".repeat(2400);
        let chunks = split_text(&text, 1000, 200).unwrap();
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.text.chars().count() <= 1000);
        }
        assert_eq!(reconstruct(&chunks, 200), text);
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = "a".repeat(700);
        let text = format!("{}\n\n{}", first, "word ".repeat(200));
        let chunks = split_text(&text, 1000, 100).unwrap();
        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(chunks[0].end, 702);
        assert_eq!(chunks[1].start, 602);
    }

    #[test]
    fn test_prefers_sentence_over_plain_space() {
        let text = format!("{}. {}", "a b".repeat(250), "c d ".repeat(300));
        let chunks = split_text(&text, 1000, 100).unwrap();
        assert!(chunks[0].text.ends_with(". "));
    }

    #[test]
    fn test_consecutive_chunks_overlap_exactly() {
        let text = (0..400)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 300, 50).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - 50);
            let tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - 50).collect();
            let head: String = pair[1].text.chars().take(50).collect();
            assert_eq!(tail, head);
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= 300);
        }
        assert_eq!(reconstruct(&chunks, 50), text);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────┐ │ héllo wörld │ └──────┘ ".repeat(40);
        let chunks = split_text(&text, 100, 20).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
        assert_eq!(reconstruct(&chunks, 20), text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma. ".repeat(300);
        let c1 = split_text(&text, 256, 32).unwrap();
        let c2 = split_text(&text, 256, 32).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_default_config() {
        let cfg = ChunkerConfig::default();
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.overlap, 200);
    }
}
