//! The indexing side of Rice: language detection, semantic chunking,
//! symbol extraction, and the pipeline that turns documents into
//! embedded points in the vector store.

pub mod chunker;
pub mod language;
pub mod pipeline;
pub mod symbols;

pub use chunker::{chunk_content, estimate_tokens, ChunkerConfig, RawChunk};
pub use language::{ChunkFamily, Language};
pub use pipeline::{IndexMetrics, IndexingPipeline};
pub use symbols::extract_symbols;
