//! Overlapping character-window chunking with sentence-boundary snapping

use uuid::Uuid;

use crate::config::RagConfiguration;
use crate::error::{Error, Result};
use crate::types::Chunk;

/// Splits text into overlapping chunks that prefer to end on `.` or `\n`
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    /// Window length in characters
    chunk_size: usize,
    /// Characters repeated at the start of the next chunk
    chunk_overlap: usize,
}

impl TextChunker {
    /// Create a chunker; `chunk_overlap` must be smaller than `chunk_size`
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &RagConfiguration) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split text into trimmed, non-empty chunks in document order
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.spans(&chars)
            .into_iter()
            .filter_map(|(start, end)| {
                let chunk: String = chars[start..end].iter().collect();
                let trimmed = chunk.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    /// Split text into chunk records for a document, indexed from 0
    pub fn chunk_document(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk::new(document_id, i as u32, content))
            .collect()
    }

    /// Untrimmed `[start, end)` character windows
    fn spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        let mut pos = 0usize;

        while pos < len {
            let size = self.chunk_size.min(len - pos);
            let mut end = pos + size;

            if end < len {
                let boundary = chars[pos..end]
                    .iter()
                    .rposition(|&c| c == '.' || c == '\n');
                if let Some(offset) = boundary {
                    if offset > self.chunk_size / 2 {
                        end = pos + offset + 1;
                    }
                }
            }

            spans.push((pos, end));

            if end >= len {
                break;
            }

            // A boundary cut can make the rewind land at or before the current
            // window start; skip the overlap then so the cursor keeps moving.
            let rewound = end.saturating_sub(self.chunk_overlap);
            pos = if rewound > pos { rewound } else { end };
        }

        spans
    }
}

/// Split `text` with the given window and overlap
pub fn split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    Ok(TextChunker::new(chunk_size, chunk_overlap)?.split(text))
}
