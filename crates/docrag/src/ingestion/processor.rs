//! Ingestion pipeline orchestration

use std::sync::Arc;

use crate::embeddings::EmbeddingFuser;
use crate::error::Result;
use crate::types::{Chunk, ChunkMetadata, Document, IngestStamp};

use super::chunker::TextChunker;
use super::extractor::PageExtractor;

/// Chunks ready to store, plus what they came from
#[derive(Debug)]
pub struct ProcessedDocument {
    /// Embedded chunks in page-then-chunk order
    pub chunks: Vec<Chunk>,
    /// Pages extracted
    pub page_count: usize,
    /// SHA-256 of the document bytes
    pub content_hash: String,
}

/// Main ingestion pipeline: extract, chunk, embed
pub struct IngestPipeline {
    extractor: Arc<dyn PageExtractor>,
    chunker: TextChunker,
    fuser: Arc<EmbeddingFuser>,
}

impl IngestPipeline {
    /// Create a new ingestion pipeline
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        chunker: TextChunker,
        fuser: Arc<EmbeddingFuser>,
    ) -> Self {
        Self {
            extractor,
            chunker,
            fuser,
        }
    }

    /// Turn a document into embedded chunks. Nothing is persisted here.
    ///
    /// Any extraction or embedding failure aborts the whole document.
    pub fn process(&self, doc: &Document) -> Result<ProcessedDocument> {
        let pages = self.extractor.extract(&doc.filename, &doc.bytes)?;
        let content_hash = doc.content_hash();
        let stamp = IngestStamp::now();

        let mut chunks = Vec::new();
        for page in &pages {
            let texts = self.chunker.split(&page.text);
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let text_vectors = self.fuser.embed_texts(&refs)?;

            // One pooled image vector per page, shared by all its chunks
            let image_vector = self.fuser.embed_images(&page.images)?;
            let image_count = page.images.len() as u32;

            for (idx, (text, vector)) in texts.into_iter().zip(text_vectors).enumerate() {
                let chunk_index = idx as u32 + 1;
                chunks.push(Chunk {
                    id: stamp.chunk_id(&doc.filename, page.page_number, chunk_index),
                    embedding: self.fuser.fuse(&vector, image_vector.as_deref())?,
                    text,
                    metadata: ChunkMetadata::new(
                        &doc.filename,
                        page.page_number,
                        chunk_index,
                        image_count,
                    ),
                    document_hash: content_hash.clone(),
                });
            }
        }

        tracing::info!(
            "{}: {} pages -> {} chunks ({} extractor)",
            doc.filename,
            pages.len(),
            chunks.len(),
            self.extractor.name()
        );

        Ok(ProcessedDocument {
            chunks,
            page_count: pages.len(),
            content_hash,
        })
    }
}
