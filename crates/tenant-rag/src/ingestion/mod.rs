//! Document ingestion: chunking and indexing of extracted text

pub mod chunker;
pub mod pipeline;

pub use chunker::{split, TextChunker};
pub use pipeline::{IngestPipeline, IngestReport};
