//! Retrieval: persistent vector search and the source registry

mod registry;
mod search;

pub use registry::SourceRegistry;
pub use search::VectorStore;
