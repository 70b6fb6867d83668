//! Async facade over ingestion and retrieval
//!
//! Extraction, inference and SQLite I/O are blocking, so every operation
//! runs on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use crate::config::RagConfig;
use crate::embeddings::{global_fuser, EmbeddingFuser};
use crate::error::{Error, Result};
use crate::generation::ContextAssembler;
use crate::ingestion::{select_extractor, ExtractionCapabilities, IngestPipeline, TextChunker};
use crate::retrieval::{SourceRegistry, VectorStore};
use crate::types::{hash_bytes, Document, Hit, IngestReport, SourceSummary};

/// Document ingestion and retrieval engine
pub struct RagEngine {
    config: RagConfig,
    fuser: Arc<EmbeddingFuser>,
    pipeline: Arc<IngestPipeline>,
    store: Arc<VectorStore>,
}

impl RagEngine {
    /// Engine using the process-wide embedding models
    pub async fn new(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let fuser = global_fuser(&config.embeddings).await?;
        Self::with_fuser(config, fuser)
    }

    /// Engine with an explicit fuser
    pub fn with_fuser(config: RagConfig, fuser: Arc<EmbeddingFuser>) -> Result<Self> {
        config.validate()?;

        let capabilities = ExtractionCapabilities::probe(&config.embeddings, &fuser);
        let pipeline = IngestPipeline::new(
            select_extractor(capabilities),
            TextChunker::from_config(&config.chunking),
            fuser.clone(),
        );
        let store = VectorStore::new(&config.storage);

        tracing::info!(
            "Engine ready: collection {} ({} dims)",
            store.location().display(),
            fuser.dimensions()
        );

        Ok(Self {
            config,
            fuser,
            pipeline: Arc::new(pipeline),
            store: Arc::new(store),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Collection file location
    pub fn persist_location(&self) -> &Path {
        self.store.location()
    }

    /// Width of every stored vector
    pub fn dimensions(&self) -> usize {
        self.fuser.dimensions()
    }

    /// Extract, chunk, embed and persist one document.
    ///
    /// Nothing is stored unless every chunk embedded successfully. Ingesting
    /// the same file again appends new chunks.
    pub async fn ingest(&self, bytes: impl Into<Vec<u8>>, filename: &str) -> Result<IngestReport> {
        let doc = Document::new(filename, bytes);
        let pipeline = self.pipeline.clone();
        let store = self.store.clone();

        let (chunks_ingested, pages, content_hash) = run_blocking(move || {
            let processed = pipeline.process(&doc)?;
            store.add(&processed.chunks)?;
            Ok((
                processed.chunks.len(),
                processed.page_count,
                processed.content_hash,
            ))
        })
        .await?;

        tracing::info!("Ingested {} ({} chunks)", filename, chunks_ingested);

        Ok(IngestReport {
            filename: filename.to_string(),
            chunks_ingested,
            pages,
            persist_location: self.store.location().to_path_buf(),
            content_hash,
        })
    }

    /// The `k` closest chunks to a question, best first.
    ///
    /// Never fails: an absent or unreadable collection gives no hits.
    pub async fn query(&self, question: &str, k: usize) -> Vec<Hit> {
        let question = question.to_string();
        let fuser = self.fuser.clone();
        let store = self.store.clone();

        let result = run_blocking(move || {
            let embedding = fuser.embed_query(&question)?;
            store.query(&embedding, k)
        })
        .await;

        match result {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!("Query failed, returning no context: {}", e);
                Vec::new()
            }
        }
    }

    /// Assembled context for a question, empty when nothing matched
    pub async fn get_context_for_question(&self, question: &str, k: usize) -> String {
        let hits = self.query(question, k).await;
        ContextAssembler::assemble(&hits)
    }

    /// Ingested sources with chunk counts. Never fails.
    pub async fn list_ingested_sources(&self) -> Vec<SourceSummary> {
        let store = self.store.clone();

        match run_blocking(move || SourceRegistry::new(&store).list_sources()).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::error!("Failed to list sources: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove every chunk of a source, returning how many were removed
    pub async fn purge_source(&self, name: &str) -> Result<usize> {
        let name = name.to_string();
        let store = self.store.clone();
        run_blocking(move || store.purge_source(&name)).await
    }

    /// Whether these exact bytes are already stored under this filename
    pub async fn is_ingested(&self, filename: &str, bytes: &[u8]) -> Result<bool> {
        let filename = filename.to_string();
        let hash = hash_bytes(bytes);
        let store = self.store.clone();
        run_blocking(move || store.contains_document(&filename, &hash)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("Blocking task failed: {}", e)))?
}
