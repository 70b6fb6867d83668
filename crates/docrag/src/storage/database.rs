//! SQLite database holding the chunk collection
//!
//! One file per collection. Rows carry the chunk id, its text, the shared
//! metadata fields and the embedding as little-endian `f32` bytes. Writes go
//! through a single mutex-guarded connection inside a transaction; reads open
//! their own connection so they never wait on the writer (WAL mode).

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{logical_source_name, Chunk, ChunkMetadata};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Text and metadata of a stored chunk
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    /// Chunk id
    pub id: String,
    /// Chunk text
    pub content: String,
    /// Source attribution
    pub metadata: ChunkMetadata,
}

/// SQLite-backed chunk collection
pub struct CollectionDb {
    path: PathBuf,
    /// Writer connection, opened on first write
    writer: Mutex<Option<Connection>>,
}

impl CollectionDb {
    /// Handle to the collection at `path`. Nothing is created until the first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the collection has been created
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Run `f` with the writer connection, creating the collection if absent
    fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.writer.lock();

        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::store(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }

            let conn = Connection::open(&self.path)
                .map_err(|e| Error::store(format!("Failed to open collection: {}", e)))?;
            migrate(&conn)?;
            tracing::info!("Opened collection at {}", self.path.display());
            *guard = Some(conn);
        }

        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::internal("collection writer missing after open")),
        }
    }

    /// Reader connection, `None` while the collection does not exist yet.
    /// Never creates the file.
    fn reader(&self) -> Result<Option<Connection>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::store(format!("Failed to open collection: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let ready: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'chunks'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(ready.map(|_| conn))
    }

    /// Insert a batch atomically. Existing ids are never overwritten.
    pub fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let width = chunks[0].embedding.len();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != width) {
            return Err(Error::SchemaMismatch {
                expected: width,
                actual: bad.embedding.len(),
            });
        }

        self.with_writer(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::store(format!("Failed to begin transaction: {}", e)))?;

            tx.execute(
                "INSERT OR IGNORE INTO collection_info (key, value) VALUES ('dimensions', ?1)",
                params![width.to_string()],
            )?;
            let stored: String = tx.query_row(
                "SELECT value FROM collection_info WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )?;
            let expected: usize = stored
                .parse()
                .map_err(|_| Error::store(format!("Corrupt dimensions entry: {}", stored)))?;
            if expected != width {
                return Err(Error::SchemaMismatch {
                    expected,
                    actual: width,
                });
            }

            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO chunks (
                        id, source, page, chunk_index, image_count,
                        document_hash, content, embedding, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                )?;

                let now = Utc::now().to_rfc3339();
                for chunk in chunks {
                    stmt.execute(params![
                        chunk.id,
                        chunk.metadata.source,
                        chunk.metadata.page as i64,
                        chunk.metadata.chunk_index as i64,
                        chunk.metadata.image_count as i64,
                        chunk.document_hash,
                        chunk.text,
                        encode_embedding(&chunk.embedding),
                        &now,
                    ])
                    .map_err(|e| Error::store(format!("Failed to insert chunk {}: {}", chunk.id, e)))?;
                }
            }

            tx.commit()
                .map_err(|e| Error::store(format!("Failed to commit transaction: {}", e)))?;
            Ok(())
        })
    }

    /// Vector width recorded on first insert
    pub fn dimensions(&self) -> Result<Option<usize>> {
        match self.reader()? {
            Some(conn) => read_dimensions(&conn),
            None => Ok(None),
        }
    }

    /// Visit every embedding with its row sequence number, in insertion order
    pub fn scan_embeddings(&self, visit: impl FnMut(i64, &[f32])) -> Result<()> {
        match self.reader()? {
            Some(conn) => scan_embeddings(&conn, visit),
            None => Ok(()),
        }
    }

    /// Text and metadata for the given row sequence numbers
    pub fn fetch_by_seq(&self, seqs: &[i64]) -> Result<HashMap<i64, StoredChunk>> {
        match self.reader()? {
            Some(conn) => fetch_by_seq(&conn, seqs),
            None => Ok(HashMap::new()),
        }
    }

    /// Consistent read view, `None` while the collection does not exist.
    ///
    /// Every read through the snapshot sees the collection as of its
    /// creation; writes committed afterwards are invisible to it.
    pub fn snapshot(&self) -> Result<Option<Snapshot>> {
        let Some(conn) = self.reader()? else {
            return Ok(None);
        };

        conn.execute_batch("BEGIN DEFERRED")?;
        // The first read inside the transaction pins the WAL snapshot
        conn.query_row("SELECT COUNT(*) FROM collection_info", [], |row| row.get::<_, i64>(0))?;

        Ok(Some(Snapshot { conn }))
    }

    /// Chunk count per recorded source value
    pub fn source_counts(&self) -> Result<Vec<(String, usize)>> {
        let Some(conn) = self.reader()? else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM chunks GROUP BY source")?;
        let rows = stmt
            .query_map([], |row| {
                let source: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((source, count as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Total stored chunks
    pub fn count(&self) -> Result<usize> {
        let Some(conn) = self.reader()? else {
            return Ok(0);
        };

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether chunks from these exact bytes are stored under this source
    pub fn contains_document(&self, source: &str, document_hash: &str) -> Result<bool> {
        let Some(conn) = self.reader()? else {
            return Ok(false);
        };

        let mut stmt =
            conn.prepare("SELECT DISTINCT source FROM chunks WHERE document_hash = ?1")?;
        let sources = stmt
            .query_map(params![document_hash], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let wanted = logical_source_name(source);
        Ok(sources.iter().any(|s| logical_source_name(s) == wanted))
    }

    /// Delete every chunk whose logical source is `name`, returning how many went
    pub fn delete_source(&self, name: &str) -> Result<usize> {
        if !self.exists() {
            return Ok(0);
        }

        let wanted = logical_source_name(name);
        self.with_writer(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| Error::store(format!("Failed to begin transaction: {}", e)))?;

            let raw_sources = {
                let mut stmt = tx.prepare("SELECT DISTINCT source FROM chunks")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut deleted = 0;
            for raw in raw_sources
                .iter()
                .filter(|raw| logical_source_name(raw) == wanted)
            {
                deleted += tx.execute("DELETE FROM chunks WHERE source = ?1", params![raw])?;
            }

            tx.commit()
                .map_err(|e| Error::store(format!("Failed to commit transaction: {}", e)))?;
            Ok(deleted)
        })
    }
}

/// Read-only view of the collection at a single point in time
pub struct Snapshot {
    conn: Connection,
}

impl Snapshot {
    /// Vector width recorded on first insert
    pub fn dimensions(&self) -> Result<Option<usize>> {
        read_dimensions(&self.conn)
    }

    /// Visit every embedding with its row sequence number, in insertion order
    pub fn scan_embeddings(&self, visit: impl FnMut(i64, &[f32])) -> Result<()> {
        scan_embeddings(&self.conn, visit)
    }

    /// Text and metadata for the given row sequence numbers
    pub fn fetch_by_seq(&self, seqs: &[i64]) -> Result<HashMap<i64, StoredChunk>> {
        fetch_by_seq(&self.conn, seqs)
    }
}

fn read_dimensions(conn: &Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM collection_info WHERE key = 'dimensions'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.and_then(|v| v.parse().ok()))
}

fn scan_embeddings(conn: &Connection, mut visit: impl FnMut(i64, &[f32])) -> Result<()> {
    let mut stmt = conn.prepare("SELECT seq, embedding FROM chunks ORDER BY seq")?;
    let mut rows = stmt.query([])?;
    let mut buf = Vec::new();
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        decode_embedding(&blob, &mut buf);
        visit(seq, &buf);
    }

    Ok(())
}

fn fetch_by_seq(conn: &Connection, seqs: &[i64]) -> Result<HashMap<i64, StoredChunk>> {
    let mut found = HashMap::with_capacity(seqs.len());
    if seqs.is_empty() {
        return Ok(found);
    }

    let mut stmt = conn.prepare(
        "SELECT id, source, page, chunk_index, image_count, content FROM chunks WHERE seq = ?1",
    )?;
    for &seq in seqs {
        let row = stmt
            .query_row(params![seq], |row| {
                Ok(StoredChunk {
                    id: row.get(0)?,
                    metadata: ChunkMetadata {
                        source: row.get(1)?,
                        page: row.get::<_, i64>(2)? as u32,
                        chunk_index: row.get::<_, i64>(3)? as u32,
                        image_count: row.get::<_, i64>(4)? as u32,
                    },
                    content: row.get(5)?,
                })
            })
            .optional()?;
        if let Some(chunk) = row {
            found.insert(seq, chunk);
        }
    }

    Ok(found)
}

/// Create tables and set durability pragmas
fn migrate(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=FULL;
        PRAGMA temp_store=MEMORY;
        "#,
    )
    .map_err(|e| Error::store(format!("Failed to set pragmas: {}", e)))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS collection_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            page INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            image_count INTEGER NOT NULL,
            document_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);
        CREATE INDEX IF NOT EXISTS idx_chunks_document_hash ON chunks(document_hash);
        "#,
    )
    .map_err(|e| Error::store(format!("Failed to create schema: {}", e)))?;

    Ok(())
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
}
