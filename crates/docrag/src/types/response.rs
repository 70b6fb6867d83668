//! Values handed back to callers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::chunk::ChunkMetadata;

/// One k-NN result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Raw chunk text
    pub text: String,
    /// Source attribution
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
    /// Squared L2 distance to the query (lower is more similar)
    pub score: f32,
}

impl Hit {
    /// Logical source filename
    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    /// Page number the chunk came from
    pub fn page(&self) -> u32 {
        self.metadata.page
    }
}

/// Outcome of a successful ingest call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Filename as ingested
    pub filename: String,
    /// Chunks written to the collection
    pub chunks_ingested: usize,
    /// Pages extracted from the document
    pub pages: usize,
    /// Collection location
    pub persist_location: PathBuf,
    /// SHA-256 of the document bytes
    pub content_hash: String,
}

/// One row of the source registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Logical filename
    pub name: String,
    /// Stored chunks attributed to it
    pub chunk_count: usize,
}
