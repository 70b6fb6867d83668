//! docrag: document ingestion and retrieval for retrieval-augmented answers
//!
//! Documents (PDF, slide decks, plain text) are split into pages, chunked,
//! embedded into a fused text+image vector space and persisted in a local
//! collection. Questions are answered with the nearest chunks, either as
//! ranked hits or as a single context string for a downstream generator.
//!
//! ```no_run
//! # async fn run() -> docrag::Result<()> {
//! let engine = docrag::RagEngine::new(docrag::RagConfig::default()).await?;
//! let bytes = std::fs::read("report.pdf")?;
//! engine.ingest(bytes, "report.pdf").await?;
//! let context = engine.get_context_for_question("What changed in Q3?", 4).await;
//! # let _ = context;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod retrieval;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use embeddings::EmbeddingFuser;
pub use engine::RagEngine;
pub use error::{Error, ErrorKind, Result};
pub use generation::ContextAssembler;
pub use retrieval::{SourceRegistry, VectorStore};
pub use types::{Chunk, ChunkMetadata, Document, FileType, Hit, IngestReport, Page, SourceSummary};
