//! Ingestion: column validation, chunk planning and chunk parsing.

pub mod chunker;
pub mod parser;

pub use chunker::{plan_chunks, sniff_delimiter, ChunkPlan, ChunkSpec, ColumnLayout, ExtraColumn};
pub use parser::{parse_chunk, ParsedChunk};
