use anyhow::{bail, Result};
use log::debug;

use crate::document::{Document, DocumentMetadata};

/// Separators tried, in order, when looking for a clean chunk boundary
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Represents a text chunk with metadata
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Metadata of the document this chunk belongs to
    pub metadata: DocumentMetadata,
    /// Starting position of this chunk in the original document, in characters
    pub start_position: usize,
}

/// Chunk size and overlap, both measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// Split every document into chunks, keeping document order
pub fn split_documents(documents: &[Document], config: &ChunkingConfig) -> Vec<TextChunk> {
    let chunks: Vec<TextChunk> = documents
        .iter()
        .flat_map(|document| {
            split_text(&document.content, config)
                .into_iter()
                .map(|(start_position, text)| TextChunk {
                    text,
                    metadata: document.metadata.clone(),
                    start_position,
                })
        })
        .collect();

    debug!(
        "Split {} documents into {} chunks",
        documents.len(),
        chunks.len()
    );
    chunks
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// Returns `(start_position, text)` pairs. Consecutive chunks share exactly
/// `chunk_overlap` characters.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<(usize, String)> {
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);

    // Byte offset of every character, plus the end of the text
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = offsets.len();
    offsets.push(text.len());

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < char_count {
        let hard_end = (start + size).min(char_count);
        let end = if hard_end == char_count {
            hard_end
        } else {
            find_break(text, &offsets, start + overlap + 1, hard_end).unwrap_or(hard_end)
        };

        let chunk = &text[offsets[start]..offsets[end]];
        if !chunk.trim().is_empty() {
            chunks.push((start, chunk.to_string()));
        }

        if end == char_count {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the character index just after the last separator that ends inside
/// `min_end..=max_end`
fn find_break(text: &str, offsets: &[usize], min_end: usize, max_end: usize) -> Option<usize> {
    if min_end > max_end {
        return None;
    }
    let window = &text[offsets[min_end.saturating_sub(1)]..offsets[max_end]];

    SEPARATORS.iter().find_map(|separator| {
        window.rfind(separator).map(|byte_pos| {
            let absolute = offsets[min_end.saturating_sub(1)] + byte_pos + separator.len();
            // offsets is sorted, so the byte offset maps back to a char index
            offsets.partition_point(|&offset| offset < absolute)
        })
    })
    .filter(|&end| end >= min_end && end <= max_end)
}
