//! Deterministic sliding-window text chunking.
//!
//! Documents are split into fixed-size character windows that overlap by a
//! configured amount, so retrieval context is preserved across chunk borders.
//! Offsets and lengths are counted in `char`s, never bytes, and slicing always
//! lands on UTF-8 boundaries.

use crate::config::{ChunkingSettings, ConfigError};
use serde::Serialize;

/// A contiguous character window of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Zero-based position of the chunk within its document.
    pub index: usize,
    /// Text covered by the window.
    pub text: String,
    /// Character offset of the window start within the document.
    pub char_offset: usize,
    /// Number of characters in the window.
    pub char_len: usize,
}

/// Splitter parameterized by window size and overlap.
///
/// The window advances by `chunk_size - chunk_overlap` characters, so every
/// pair of consecutive chunks shares exactly `chunk_overlap` characters. A
/// document no longer than `chunk_size` produces a single chunk; an empty
/// document produces none.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Build a chunker, rejecting windows that cannot advance.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        let settings = ChunkingSettings {
            chunk_size,
            chunk_overlap,
        };
        Self::from_settings(&settings)
    }

    /// Build a chunker from validated configuration.
    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        })
    }

    /// Split `text` into ordered, overlapping windows.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of the text.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
        boundaries.push(text.len());
        let total_chars = boundaries.len() - 1;

        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start + self.chunk_size < total_chars {
            chunks.push(window(text, &boundaries, chunks.len(), start, start + self.chunk_size));
            start += step;
        }
        chunks.push(window(text, &boundaries, chunks.len(), start, total_chars));
        chunks
    }
}

fn window(text: &str, boundaries: &[usize], index: usize, start: usize, end: usize) -> Chunk {
    Chunk {
        index,
        text: text[boundaries[start]..boundaries[end]].to_string(),
        char_offset: start,
        char_len: end - start,
    }
}
