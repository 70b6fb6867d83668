//! Document ingestion: page extraction, chunking and embedding

mod chunker;
mod extractor;
mod pdf;
mod pptx;
mod processor;
mod raster;

pub use chunker::TextChunker;
pub use extractor::{
    select_extractor, ExtractionCapabilities, MultimodalExtractor, PageExtractor,
    TextOnlyExtractor,
};
pub use pptx::extract_slides;
pub use processor::{IngestPipeline, ProcessedDocument};
