//! Vector store for chunk storage and k-NN search

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::storage::CollectionDb;
use super::SourceRegistry;
use crate::types::{Chunk, Hit, SourceSummary};

/// Candidate in the bounded max-heap: worst (largest distance, latest row) on top
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    seq: i64,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Persistent chunk collection with exact nearest-neighbor search.
///
/// Scores are squared Euclidean distances; lower is better. Since every
/// stored vector is built from unit-length parts, this ranks identically to
/// cosine similarity.
pub struct VectorStore {
    db: CollectionDb,
}

impl VectorStore {
    /// Store backed by the configured collection file
    pub fn new(config: &StorageConfig) -> Self {
        Self::open(config.collection_path())
    }

    /// Store backed by an explicit collection file
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            db: CollectionDb::new(path.into()),
        }
    }

    /// Collection file location
    pub fn location(&self) -> &Path {
        self.db.path()
    }

    /// Underlying database
    pub fn db(&self) -> &CollectionDb {
        &self.db
    }

    /// Insert all chunks durably, creating the collection on first use
    pub fn add(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        self.db.insert_chunks(chunks)?;
        tracing::debug!("Committed {} chunks to {}", chunks.len(), self.location().display());
        Ok(())
    }

    /// The `k` stored chunks closest to `embedding`, best first.
    ///
    /// An absent collection yields no hits. Ties keep insertion order. The
    /// scan and the row fetch share one snapshot, so a concurrent purge
    /// cannot drop hits between them.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Hit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(snapshot) = self.db.snapshot()? else {
            return Ok(Vec::new());
        };

        match snapshot.dimensions()? {
            None => return Ok(Vec::new()),
            Some(expected) if expected != embedding.len() => {
                return Err(Error::SchemaMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
            Some(_) => {}
        }

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        snapshot.scan_embeddings(|seq, stored| {
            if stored.len() != embedding.len() {
                return;
            }
            let candidate = Candidate {
                distance: squared_l2(embedding, stored),
                seq,
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        })?;

        let ranked = heap.into_sorted_vec();
        let seqs: Vec<i64> = ranked.iter().map(|c| c.seq).collect();
        let mut rows = snapshot.fetch_by_seq(&seqs)?;

        Ok(ranked
            .into_iter()
            .filter_map(|c| {
                rows.remove(&c.seq).map(|row| Hit {
                    text: row.content,
                    metadata: row.metadata,
                    score: c.distance,
                })
            })
            .collect())
    }

    /// Ingested sources with chunk counts, sorted by name
    pub fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        SourceRegistry::new(self).list_sources()
    }

    /// Delete every chunk of a logical source
    pub fn purge_source(&self, name: &str) -> Result<usize> {
        let removed = self.db.delete_source(name)?;
        tracing::info!("Purged {} chunks of {}", removed, name);
        Ok(removed)
    }

    /// Whether these exact bytes are already stored under `source`
    pub fn contains_document(&self, source: &str, document_hash: &str) -> Result<bool> {
        self.db.contains_document(source, document_hash)
    }

    /// Total stored chunks
    pub fn len(&self) -> Result<usize> {
        self.db.count()
    }

    /// Whether nothing has been stored yet
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
