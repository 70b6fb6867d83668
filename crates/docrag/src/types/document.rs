//! Documents and the pages extracted from them

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Supported input formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document (paginated text with images)
    Pdf,
    /// PowerPoint presentation (.pptx)
    Pptx,
    /// Plain text file
    Txt,
    /// Markdown file
    Markdown,
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "pptx" => Self::Pptx,
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a filename
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit_once('.') {
            Some((_, ext)) => Self::from_extension(ext),
            None => Self::Unknown,
        }
    }

    /// Check if this is a supported file type
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Get display name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Pdf => "PDF",
            Self::Pptx => "PowerPoint (.pptx)",
            Self::Txt => "Text File",
            Self::Markdown => "Markdown",
            Self::Unknown => "Unknown",
        }
    }
}

/// A named byte blob handed in by the caller. Never persisted.
#[derive(Debug, Clone)]
pub struct Document {
    /// Filename as supplied by the caller
    pub filename: String,
    /// Raw document bytes
    pub bytes: Vec<u8>,
}

impl Document {
    /// Create a new document
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Format detected from the filename
    pub fn file_type(&self) -> FileType {
        FileType::from_filename(&self.filename)
    }

    /// SHA-256 of the raw bytes, hex encoded
    pub fn content_hash(&self) -> String {
        hash_bytes(&self.bytes)
    }
}

/// One page (or slide) of extracted content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Plain text, empty if the page has none
    pub text: String,
    /// Embedded raster images, each PNG-encoded RGB
    pub images: Vec<Vec<u8>>,
}

impl Page {
    /// Create a text-only page
    pub fn text_only(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Hash bytes for deduplication
pub(crate) fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
