//! Page extraction strategies

use std::sync::Arc;

use super::pdf::PdfFile;
use super::pptx;
use crate::config::EmbeddingConfig;
use crate::embeddings::EmbeddingFuser;
use crate::error::{Error, Result};
use crate::types::{FileType, Page};

/// Decodes document bytes into ordered pages
pub trait PageExtractor: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Every page of the document, in order. Pages without text are kept.
    fn extract(&self, filename: &str, bytes: &[u8]) -> Result<Vec<Page>>;
}

/// Page text plus embedded images
#[derive(Debug, Default, Clone, Copy)]
pub struct MultimodalExtractor;

impl PageExtractor for MultimodalExtractor {
    fn name(&self) -> &'static str {
        "multimodal"
    }

    fn extract(&self, filename: &str, bytes: &[u8]) -> Result<Vec<Page>> {
        match FileType::from_filename(filename) {
            FileType::Pdf => {
                let pdf = PdfFile::load(filename, bytes)?;
                let texts = pdf.page_texts(filename, bytes);
                Ok(texts
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| Page {
                        page_number: i as u32 + 1,
                        text,
                        images: pdf.page_images(filename, i),
                    })
                    .collect())
            }
            other => extract_common(filename, bytes, other),
        }
    }
}

/// Page text only; every page keeps an empty image list
#[derive(Debug, Default, Clone, Copy)]
pub struct TextOnlyExtractor;

impl PageExtractor for TextOnlyExtractor {
    fn name(&self) -> &'static str {
        "text-only"
    }

    fn extract(&self, filename: &str, bytes: &[u8]) -> Result<Vec<Page>> {
        match FileType::from_filename(filename) {
            FileType::Pdf => {
                let pdf = PdfFile::load(filename, bytes)?;
                Ok(pdf
                    .page_texts(filename, bytes)
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| Page::text_only(i as u32 + 1, text))
                    .collect())
            }
            other => extract_common(filename, bytes, other),
        }
    }
}

/// Formats handled the same way by both strategies
fn extract_common(filename: &str, bytes: &[u8], file_type: FileType) -> Result<Vec<Page>> {
    match file_type {
        FileType::Pptx => pptx::extract_slides(filename, bytes),
        FileType::Txt | FileType::Markdown => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                Error::extraction(filename, format!("not valid UTF-8 text: {}", e))
            })?;
            Ok(vec![Page::text_only(1, text)])
        }
        FileType::Pdf => Err(Error::internal("PDF must be handled by the extractor")),
        FileType::Unknown => Err(Error::UnsupportedFileType(filename.to_string())),
    }
}

/// What the running process can do, probed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionCapabilities {
    /// Page images can be decoded and embedded
    pub images: bool,
}

impl ExtractionCapabilities {
    /// Images are only worth decoding when they are enabled and an image encoder loaded
    pub fn probe(config: &EmbeddingConfig, fuser: &EmbeddingFuser) -> Self {
        Self {
            images: config.enable_images && fuser.supports_images(),
        }
    }
}

/// Pick the extraction strategy for these capabilities
pub fn select_extractor(capabilities: ExtractionCapabilities) -> Arc<dyn PageExtractor> {
    let extractor: Arc<dyn PageExtractor> = if capabilities.images {
        Arc::new(MultimodalExtractor)
    } else {
        Arc::new(TextOnlyExtractor)
    };
    tracing::info!("Using {} page extractor", extractor.name());
    extractor
}
