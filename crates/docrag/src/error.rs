//! Error types for document ingestion and retrieval

use thiserror::Error;

/// Result type alias for docrag operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion and retrieval errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document bytes could not be decoded into pages
    #[error("Failed to extract '{filename}': {message}")]
    Extraction { filename: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Model inference failed
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Collection could not be opened, read or written
    #[error("Vector store error: {0}")]
    Store(String),

    /// Vector width does not match the collection
    #[error("Dimension mismatch: collection expects {expected}, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error (model downloads)
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classes callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Extraction,
    Embedding,
    Store,
    Other,
}

impl Error {
    /// Create an extraction error
    pub fn extraction(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Extraction { .. } | Error::UnsupportedFileType(_) => ErrorKind::Extraction,
            Error::Embedding(_) | Error::Http(_) => ErrorKind::Embedding,
            Error::Store(_) | Error::SchemaMismatch { .. } => ErrorKind::Store,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                ErrorKind::Other
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::extraction("a.pdf", "bad xref").kind(), ErrorKind::Extraction);
        assert_eq!(Error::embedding("nan").kind(), ErrorKind::Embedding);
        assert_eq!(
            Error::SchemaMismatch { expected: 3, actual: 2 }.kind(),
            ErrorKind::Store
        );
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_extraction_message_names_file() {
        let err = Error::extraction("slides.pptx", "not a zip archive");
        assert_eq!(
            err.to_string(),
            "Failed to extract 'slides.pptx': not a zip archive"
        );
    }
}
