//! Storage module for persistent data storage
//!
//! Provides the SQLite-backed chunk collection.

mod database;

pub use database::{CollectionDb, Snapshot, StoredChunk};
