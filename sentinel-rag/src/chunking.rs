//! Document chunking.
//!
//! [`split_text`] cuts text into overlapping windows of at most `chunk_size`
//! characters. Within each window it prefers to cut, in order, at a paragraph
//! boundary, a sentence boundary, or whitespace, and only falls back to a hard
//! character cut when the window contains none of them.
//! [`RecursiveChunker`] wraps it and turns the pieces into [`Chunk`]s.

use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the ingestion pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no non-whitespace text.
    /// Chunk indices are 0-based and contiguous.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Splits text hierarchically: paragraphs → sentences → words → characters.
///
/// Chunk ids are `{document_id}_{chunk_index}`. Each chunk inherits the
/// parent document's metadata plus `filename`, `mime_type`, `chunk_index`,
/// `total_chunks` and `chunk_chars`.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        check_window(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Create a chunker using the window configured in `config`.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let pieces = split_text(&document.text, self.chunk_size, self.chunk_overlap)?;
        let total = pieces.len();

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let mut metadata = document.metadata.clone();
                metadata.insert("filename".to_string(), document.source.filename.clone());
                metadata.insert("mime_type".to_string(), document.source.mime_type.clone());
                metadata.insert("chunk_index".to_string(), index.to_string());
                metadata.insert("total_chunks".to_string(), total.to_string());
                metadata.insert("chunk_chars".to_string(), text.chars().count().to_string());
                Chunk {
                    id: Chunk::chunk_id(document.id(), index),
                    text,
                    index,
                    document_id: document.id().to_string(),
                    embedding: None,
                    metadata,
                }
            })
            .collect())
    }
}

fn check_window(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfig("chunk_size must be greater than zero".into()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::InvalidConfig(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Split `text` into trimmed pieces of at most `chunk_size` characters.
///
/// Consecutive pieces share up to `chunk_overlap` characters, capped at half
/// of the preceding piece so that every window advances. The overlap start is
/// moved forward to a word boundary when one exists inside it.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfig`] if `chunk_overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    check_window(chunk_size, chunk_overlap)?;

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = skip_whitespace(&chars, 0);

    while start < chars.len() {
        let end = if chars.len() - start <= chunk_size {
            chars.len()
        } else {
            find_break(&chars, start, start + chunk_size)
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = next_start(&chars, start, end, chunk_overlap);
    }

    Ok(pieces)
}

/// Choose the cut position for the window `[start, limit)`.
///
/// Each boundary level is searched across the whole window, latest position
/// first, before falling back to the next level. The hard cut at `limit` is
/// used only when the window holds no boundary at all.
fn find_break(chars: &[char], start: usize, limit: usize) -> usize {
    let levels: [fn(&[char], usize) -> bool; 3] =
        [is_paragraph_break, is_sentence_break, is_word_break];

    for is_break in levels {
        if let Some(position) = (start + 1..=limit).rev().find(|&p| is_break(chars, p)) {
            return position;
        }
    }
    limit
}

/// A cut right after a line that is followed by a blank line.
fn is_paragraph_break(chars: &[char], p: usize) -> bool {
    if p == 0 || chars[p - 1] != '\n' {
        return false;
    }
    chars[..p - 1]
        .iter()
        .rev()
        .find(|c| **c == '\n' || !c.is_whitespace())
        .is_some_and(|c| *c == '\n')
}

fn is_sentence_break(chars: &[char], p: usize) -> bool {
    let terminator = |c: char| matches!(c, '.' | '!' | '?' | '。' | '…');
    if chars[p - 1] == '\n' {
        return true;
    }
    if p >= 2 && chars[p - 1].is_whitespace() && terminator(chars[p - 2]) {
        return true;
    }
    p < chars.len() && terminator(chars[p - 1]) && chars[p].is_whitespace()
}

fn is_word_break(chars: &[char], p: usize) -> bool {
    chars[p - 1].is_whitespace() || (p < chars.len() && chars[p].is_whitespace())
}

fn next_start(chars: &[char], start: usize, end: usize, chunk_overlap: usize) -> usize {
    let back = chunk_overlap.min((end - start) / 2);
    let mut next = (end - back).max(start + 1);
    if back > 0 {
        if let Some(aligned) = (next..end).find(|&i| chars[i - 1].is_whitespace()) {
            next = aligned;
        }
    }
    skip_whitespace(chars, next)
}

fn skip_whitespace(chars: &[char], mut position: usize) -> usize {
    while position < chars.len() && chars[position].is_whitespace() {
        position += 1;
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentSource;

    #[test]
    fn empty_and_blank_text_produce_no_chunks() {
        assert!(split_text("", 100, 10).unwrap().is_empty());
        assert!(split_text("  \n\n \t", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(split_text("abc", 10, 10), Err(RagError::InvalidConfig(_))));
        assert!(matches!(RecursiveChunker::new(10, 12), Err(RagError::InvalidConfig(_))));
        assert!(matches!(RecursiveChunker::new(0, 0), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(split_text("  hello world  ", 100, 10).unwrap(), vec!["hello world"]);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = "First paragraph has words.\n\nSecond paragraph is here too.";
        let pieces = split_text(text, 40, 0).unwrap();
        assert_eq!(pieces, vec!["First paragraph has words.", "Second paragraph is here too."]);
    }

    #[test]
    fn falls_back_to_sentence_boundaries() {
        let text = "One short sentence. Another short sentence. A third one here.";
        let pieces = split_text(text, 45, 0).unwrap();
        assert_eq!(pieces[0], "One short sentence. Another short sentence.");
        assert_eq!(pieces[1], "A third one here.");
    }

    #[test]
    fn falls_back_to_whitespace_then_hard_cut() {
        let pieces = split_text("alpha beta gamma delta", 12, 0).unwrap();
        assert_eq!(pieces, vec!["alpha beta", "gamma delta"]);

        let pieces = split_text("abcdefghijklmnopqrstuvwxyz", 10, 0).unwrap();
        assert_eq!(pieces, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn early_whitespace_beats_a_hard_cut() {
        let pieces = split_text("ab cdefghijklmnop", 10, 0).unwrap();
        assert_eq!(pieces, vec!["ab", "cdefghijkl", "mnop"]);
    }

    #[test]
    fn paragraph_break_anywhere_in_window_beats_a_sentence_break() {
        let text = format!("{}\n\n{}. {}", "a".repeat(20), "b".repeat(50), "c".repeat(60));
        let pieces = split_text(&text, 100, 0).unwrap();
        assert_eq!(pieces[0], "a".repeat(20));
        assert_eq!(pieces[1], format!("{}.", "b".repeat(50)));
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let pieces = split_text(text, 24, 10).unwrap();
        assert!(pieces.len() > 2);
        for pair in pieces.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(pair[1].contains(last_word), "{:?} does not overlap {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_character() {
        let text = "Xin chào thế giới. ".repeat(30);
        let pieces = split_text(&text, 25, 5).unwrap();
        assert!(pieces.iter().all(|p| p.chars().count() <= 25));
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Lorem ipsum dolor sit amet. ".repeat(50);
        assert_eq!(split_text(&text, 80, 20).unwrap(), split_text(&text, 80, 20).unwrap());
    }

    #[test]
    fn chunks_carry_ids_indices_and_metadata() {
        let document = Document::with_id(
            "doc-1",
            "Para one.\n\nPara two is longer than the first.",
            DocumentSource::new("notes.md", "text/markdown"),
        )
        .with_metadata("team", "search");
        let chunks = RecursiveChunker::new(20, 0).unwrap().chunk(&document).unwrap();

        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.id, format!("doc-1_{i}"));
            assert_eq!(chunk.document_id, "doc-1");
            assert!(chunk.embedding.is_none());
            assert_eq!(chunk.metadata["filename"], "notes.md");
            assert_eq!(chunk.metadata["team"], "search");
            assert_eq!(chunk.metadata["total_chunks"], chunks.len().to_string());
        }
    }
}
