//! Derived view of what has been ingested

use std::collections::BTreeMap;

use super::VectorStore;
use crate::error::Result;
use crate::types::{logical_source_name, SourceSummary};

/// Lists ingested sources straight from the collection.
///
/// Source names are normalized through [`logical_source_name`], so
/// rows written under a staged name count towards the logical filename.
pub struct SourceRegistry<'a> {
    store: &'a VectorStore,
}

impl<'a> SourceRegistry<'a> {
    /// Registry over a store
    pub fn new(store: &'a VectorStore) -> Self {
        Self { store }
    }

    /// Distinct sources with their chunk counts, sorted by name
    pub fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        let mut grouped: BTreeMap<String, usize> = BTreeMap::new();

        for (raw, count) in self.store.db().source_counts()? {
            *grouped.entry(logical_source_name(&raw)).or_default() += count;
        }

        Ok(grouped
            .into_iter()
            .map(|(name, chunk_count)| SourceSummary { name, chunk_count })
            .collect())
    }

    /// Chunk count of one source, zero if unknown
    pub fn chunk_count(&self, name: &str) -> Result<usize> {
        Ok(self
            .list_sources()?
            .into_iter()
            .find(|s| s.name == name)
            .map_or(0, |s| s.chunk_count))
    }
}
