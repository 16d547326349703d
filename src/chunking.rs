//! Chunking utilities for splitting documents into embeddable segments.
//!
//! Documents longer than the configured chunk size are split into windows
//! (optionally overlapping) that break at whitespace where possible. The
//! split is lazy: [`chunks`] returns an iterator that can be cloned to
//! restart from the beginning.

use serde::{Deserialize, Serialize};

use crate::{chunk_id::ChunkId, loader::Document};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back from a window end to look for whitespace to break at.
const BOUNDARY_LOOKBACK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Where a chunk sits inside its parent document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub lines: LineRange,
    /// Byte offset where the chunk starts.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
}

/// Inclusive, 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub from: usize,
    pub to: usize,
}

/// A chunk of text from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Source path of the parent document.
    pub source_path: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    pub location: ChunkLocation,
}

impl Chunk {
    /// Identity of this chunk in a vector index.
    pub fn id(&self) -> ChunkId {
        ChunkId::new(&self.source_path, self.index)
    }

    /// Text submitted to the embedding model, with newlines flattened.
    pub fn embedding_text(&self) -> String {
        flatten_newlines(&self.text)
    }
}

/// Replace line breaks with single spaces.
pub fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ")
}

/// Split a document into chunks.
///
/// Empty or whitespace-only documents yield nothing.
///
/// # Examples
///
/// ```
/// use docqa::chunking::{chunks, ChunkingConfig};
/// use docqa::loader::Document;
///
/// let doc = Document::new("a.md", "Hello world. This is a test.");
/// let all: Vec<_> = chunks(&doc, ChunkingConfig::default()).collect();
/// assert_eq!(all.len(), 1);
/// assert_eq!(all[0].id().to_string(), "a.md-0");
/// assert_eq!(all[0].text, "Hello world. This is a test.");
/// ```
pub fn chunks(document: &Document, config: ChunkingConfig) -> Chunks<'_> {
    Chunks::new(&document.content, &document.metadata.source, config)
}

/// Lazy iterator over the chunks of one text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    source_path: &'a str,
    chunk_size: usize,
    overlap: usize,
    /// Byte offset of every char boundary, plus `text.len()`.
    char_to_byte: Vec<usize>,
    /// Char position where the next window starts.
    next_char: usize,
    next_index: usize,
    /// Byte offset up to which newlines have been counted.
    line_byte: usize,
    /// 1-based line number at `line_byte`.
    line_no: usize,
}

impl<'a> Chunks<'a> {
    pub fn new(
        text: &'a str,
        source_path: &'a str,
        config: ChunkingConfig,
    ) -> Self {
        let char_to_byte = text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let chunk_size = config.chunk_size.max(1);
        Self {
            text,
            source_path,
            chunk_size,
            overlap: config.overlap.min(chunk_size - 1),
            char_to_byte,
            next_char: 0,
            next_index: 0,
            line_byte: 0,
            line_no: 1,
        }
    }

    fn char_count(&self) -> usize {
        self.char_to_byte.len() - 1
    }

    /// Find a break position at or before `pos_char`, preferring the char
    /// right after the last whitespace. Never returns a position at or
    /// before `min_char`.
    fn word_boundary(&self, min_char: usize, pos_char: usize) -> usize {
        let search_start = pos_char.saturating_sub(BOUNDARY_LOOKBACK).max(min_char);
        let start_byte = self.char_to_byte[search_start];
        let end_byte = self.char_to_byte[pos_char];
        let region = &self.text[start_byte..end_byte];

        let Some(ws_offset) = region.rfind(char::is_whitespace) else {
            return pos_char;
        };
        let ws_byte = start_byte + ws_offset;
        // First char boundary strictly after the whitespace byte.
        let boundary = self.char_to_byte.partition_point(|&b| b <= ws_byte);
        if boundary > min_char { boundary } else { pos_char }
    }

    /// Chunk starts never move backwards, so line numbers are counted
    /// incrementally from the previous chunk start.
    fn location(&mut self, start_byte: usize, end_byte: usize) -> ChunkLocation {
        self.line_no += self.text[self.line_byte..start_byte].matches('\n').count();
        self.line_byte = start_byte;
        let from = self.line_no;
        let body = self.text[start_byte..end_byte].trim_end_matches('\n');
        let to = from + body.matches('\n').count();
        ChunkLocation {
            lines: LineRange { from, to },
            start: start_byte,
            end: end_byte,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let char_count = self.char_count();

        while self.next_char < char_count {
            let start_char = self.next_char;
            let window_end = (start_char + self.chunk_size).min(char_count);
            let end_char = if window_end < char_count {
                self.word_boundary(start_char, window_end)
            } else {
                window_end
            };

            self.next_char = if end_char >= char_count {
                char_count
            } else {
                let rewound = end_char.saturating_sub(self.overlap);
                if rewound > start_char { rewound } else { end_char }
            };

            let start_byte = self.char_to_byte[start_char];
            let end_byte = self.char_to_byte[end_char];
            let text = &self.text[start_byte..end_byte];
            if text.trim().is_empty() {
                continue;
            }

            let chunk = Chunk {
                text: text.to_string(),
                source_path: self.source_path.to_string(),
                index: self.next_index,
                location: self.location(start_byte, end_byte),
            };
            self.next_index += 1;
            return Some(chunk);
        }

        None
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
