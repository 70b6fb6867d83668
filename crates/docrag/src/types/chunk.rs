//! Chunks and the metadata schema shared by the store and the source registry

use serde::{Deserialize, Serialize};

/// Per-chunk metadata persisted alongside the embedding.
///
/// Both the vector store (writes) and the source registry (reads) go through
/// this type, so the naming convention for `source` lives in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Logical filename of the originating document
    pub source: String,
    /// Page (or slide) number, 1-indexed
    pub page: u32,
    /// Chunk index within the page, 1-indexed
    pub chunk_index: u32,
    /// Number of images on the originating page
    pub image_count: u32,
}

impl ChunkMetadata {
    /// Create metadata with the source already normalized
    pub fn new(source: &str, page: u32, chunk_index: u32, image_count: u32) -> Self {
        Self {
            source: logical_source_name(source),
            page,
            chunk_index,
            image_count,
        }
    }

    /// Source name with staging artifacts removed
    pub fn logical_source(&self) -> String {
        logical_source_name(&self.source)
    }
}

/// Strip directories and a staging suffix from a recorded source.
///
/// Staging copies were written as `<filename>__<unix-ts>.<ext>`, e.g.
/// `pdf_store/report.pdf__1700000000.pdf` maps back to `report.pdf`. The
/// suffix only counts as staging when the part before `__` is itself a
/// filename with an extension, so `minutes__2023.txt` is left alone.
pub fn logical_source_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    if let Some(pos) = base.rfind("__") {
        let (name, suffix) = (&base[..pos], &base[pos + 2..]);
        let stamp = suffix.split_once('.').map_or(suffix, |(digits, _)| digits);
        if has_extension(name) && !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit()) {
            return name.to_string();
        }
    }

    base.to_string()
}

fn has_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty(),
        None => false,
    }
}

/// The atomic retrieval unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique chunk id
    pub id: String,
    /// Chunk text
    pub text: String,
    /// Fused embedding (text part followed by image part)
    pub embedding: Vec<f32>,
    /// Source attribution
    pub metadata: ChunkMetadata,
    /// SHA-256 of the originating document bytes
    pub document_hash: String,
}

/// Identity shared by every chunk produced by one ingest call
#[derive(Debug, Clone)]
pub struct IngestStamp {
    timestamp_micros: i64,
    nonce: String,
}

impl IngestStamp {
    /// Stamp for a new ingest call
    pub fn now() -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self {
            timestamp_micros: chrono::Utc::now().timestamp_micros(),
            nonce: nonce[..8].to_string(),
        }
    }

    /// Chunk id: `{filename}::p{page}::c{chunk}::{ts}-{nonce}`
    pub fn chunk_id(&self, filename: &str, page: u32, chunk_index: u32) -> String {
        format!(
            "{}::p{}::c{}::{}-{}",
            filename, page, chunk_index, self.timestamp_micros, self.nonce
        )
    }
}
