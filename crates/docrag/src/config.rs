//! Configuration for ingestion and retrieval

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Persistent collection location
    pub storage: StorageConfig,
    /// Embedding models
    pub embeddings: EmbeddingConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Query defaults
    pub retrieval: RetrievalConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted at a given persist directory, everything else default
    pub fn with_persist_dir(persist_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                persist_dir: persist_dir.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject values the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be > 0".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.text_dimensions == 0 || self.embeddings.image_dimensions == 0 {
            return Err(Error::Config("embedding dimensions must be > 0".to_string()));
        }
        if self.storage.collection_name.trim().is_empty() {
            return Err(Error::Config("storage.collection_name is empty".to_string()));
        }
        Ok(())
    }
}

/// Persistent collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the collection
    pub persist_dir: PathBuf,
    /// Collection name (one SQLite file per collection)
    pub collection_name: String,
}

impl StorageConfig {
    /// Path of the collection database file
    pub fn collection_path(&self) -> PathBuf {
        self.persist_dir.join(format!("{}.sqlite3", self.collection_name))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let persist_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docrag")
            .join("chroma_db");

        Self {
            persist_dir,
            collection_name: "pdf_docs".to_string(),
        }
    }
}

/// Which encoders back the embedding fuser
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Pretrained ONNX models (sentence embedding + CLIP vision)
    #[default]
    Onnx,
    /// Deterministic feature hashing, no model files needed
    Hashing,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Encoder backend
    pub backend: EmbeddingBackend,
    /// Sentence-embedding model (Hugging Face sentence-transformers repo name)
    pub text_model: String,
    /// Text embedding dimensions (384 for MiniLM)
    pub text_dimensions: usize,
    /// Joint image/text model used for page images (Hugging Face repo)
    pub image_model: String,
    /// Image embedding dimensions (768 for CLIP ViT-L/14)
    pub image_dimensions: usize,
    /// Decode and embed page images when the image encoder is available
    pub enable_images: bool,
    /// Batch size for text embedding
    pub batch_size: usize,
    /// Maximum token sequence length
    pub max_length: usize,
    /// Cache directory for downloaded models
    pub cache_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Onnx,
            text_model: "all-MiniLM-L6-v2".to_string(),
            text_dimensions: 384,
            image_model: "Xenova/clip-vit-large-patch14".to_string(),
            image_dimensions: 768,
            enable_images: true,
            batch_size: 32,
            max_length: 256,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docrag")
                .join("models"),
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Query defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hits returned when the caller does not pick k
    pub default_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_k: 4 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embeddings.text_dimensions + config.embeddings.image_dimensions, 1152);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docrag.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            persist_dir = "/tmp/docrag-test"

            [embeddings]
            backend = "hashing"
            "#,
        )
        .unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.persist_dir, PathBuf::from("/tmp/docrag-test"));
        assert_eq!(config.storage.collection_name, "pdf_docs");
        assert_eq!(config.embeddings.backend, EmbeddingBackend::Hashing);
        assert_eq!(config.embeddings.text_dimensions, 384);
        assert_eq!(config.retrieval.default_k, 4);
        assert_eq!(
            config.storage.collection_path(),
            PathBuf::from("/tmp/docrag-test/pdf_docs.sqlite3")
        );
    }
}
