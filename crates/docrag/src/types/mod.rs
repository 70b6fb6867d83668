//! Core types for ingestion and retrieval

pub mod chunk;
pub mod document;
pub mod response;

pub use chunk::{logical_source_name, Chunk, ChunkMetadata, IngestStamp};
pub(crate) use document::hash_bytes;
pub use document::{Document, FileType, Page};
pub use response::{Hit, IngestReport, SourceSummary};
