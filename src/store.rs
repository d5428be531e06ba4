// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedded store for chunks, embeddings, and the sparse full-text mirror.
//!
//! Uses SQLite with an FTS5 virtual table kept synchronous with the primary
//! `chunks` table by the write paths: every insert/update/delete touches both.
//! Updates are delete-then-insert on the mirror because FTS5 has no in-place
//! update of external content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[cfg(feature = "telemetry")]
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::types::{Chunk, IndexStats, SemanticIntent};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Version of the store format.
pub const STORE_VERSION: &str = "1.0.0";

/// Database file name inside the per-project directory.
pub const DB_FILE_NAME: &str = "embeddings.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    file_path TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    embedding BLOB,
    parent_chunk_id INTEGER,
    timestamp INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    semantic_type TEXT NOT NULL,
    semantic_intent TEXT NOT NULL,
    context_json TEXT NOT NULL,
    sequence_key TEXT,
    is_sequence_definition INTEGER NOT NULL DEFAULT 0,
    referenced_sequences TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_slot
    ON chunks(file_path, chunk_index, start_line, end_line);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_type ON chunks(semantic_type);

CREATE TABLE IF NOT EXISTS sequence_references (
    id INTEGER PRIMARY KEY,
    caller_chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    callee_chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    sequence_key TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_refs_caller ON sequence_references(caller_chunk_id);
CREATE INDEX IF NOT EXISTS idx_refs_callee ON sequence_references(callee_chunk_id);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    chunk_id UNINDEXED,
    embedding_text
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Per-project store directory under the user's application data.
pub fn store_directory(project_root: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(project_root.as_bytes());
    let hash = hex::encode(hasher.finalize());
    let hash_short = &hash[..8];

    let project_name = Path::new(project_root)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".artidex")
        .join("index")
        .join(format!("{}-{}", project_name, hash_short))
}

/// Embedded chunk store.
pub struct Store {
    conn: Connection,
    db_path: PathBuf,
}

impl Store {
    /// Open or create the store for a project, with single-shot recovery.
    ///
    /// An ABI-mismatch class failure is surfaced without retry. Any other
    /// open failure deletes the database and its `-wal`/`-shm` sidecars and
    /// reopens once; a second failure is unrecoverable.
    pub fn open(project_root: &str, data_dir: Option<&Path>) -> Result<Self, StoreError> {
        let dir = data_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| store_directory(project_root));
        Self::open_in_dir(&dir)
    }

    /// Open or create the store inside an explicit directory.
    pub fn open_in_dir(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::OpenFailed(format!("create {}: {}", dir.display(), e)))?;
        let db_path = dir.join(DB_FILE_NAME);

        match Self::try_open(&db_path) {
            Ok(store) => Ok(store),
            Err(err) if err.is_recoverable_open_failure() => {
                tracing::warn!(
                    db = %db_path.display(),
                    error = %err,
                    "store open failed, deleting and reopening once"
                );
                remove_with_sidecars(&db_path);
                Self::try_open(&db_path)
                    .map_err(|e| StoreError::Corruption(format!("reopen after recovery: {}", e)))
            }
            Err(err) => Err(err),
        }
    }

    fn try_open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(|e| classify_open_error(&e))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;",
        )
        .map_err(|e| classify_open_error(&e))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| classify_open_error(&e))?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('version', ?1)",
            params![STORE_VERSION],
        )
        .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        Ok(Self {
            conn,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert a chunk and its FTS mirror row; returns the assigned id.
    pub fn insert(&self, chunk: &Chunk) -> Result<i64, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let embedding_bytes = chunk.embedding.as_deref().map(serialize_embedding);
        self.conn
            .execute(
                "INSERT INTO chunks
                 (file_path, file_hash, resource_name, resource_type, chunk_type,
                  chunk_index, start_line, end_line, embedding, parent_chunk_id,
                  timestamp, content_hash, semantic_type, semantic_intent,
                  context_json, sequence_key, is_sequence_definition, referenced_sequences)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    chunk.file_path,
                    chunk.file_hash,
                    chunk.resource_name,
                    chunk.resource_type,
                    chunk.chunk_type,
                    chunk.chunk_index,
                    chunk.start_line,
                    chunk.end_line,
                    embedding_bytes,
                    chunk.parent_chunk_id,
                    chunk.timestamp,
                    chunk.content_hash,
                    chunk.semantic_type,
                    chunk.semantic_intent.as_str(),
                    chunk.context.to_string(),
                    chunk.sequence_key,
                    chunk.is_sequence_definition as i64,
                    references_json(&chunk.referenced_sequences),
                ],
            )
            .map_err(|e| StoreError::WriteFailed(format!("insert chunk: {}", e)))?;

        let id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO chunks_fts (chunk_id, embedding_text) VALUES (?1, ?2)",
                params![id, chunk.embedding_text],
            )
            .map_err(|e| StoreError::WriteFailed(format!("insert fts row: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.insert", start.elapsed());

        Ok(id)
    }

    /// Update a chunk in place. The FTS mirror row is replaced because the
    /// FTS engine has no in-place update.
    pub fn update(&self, id: i64, chunk: &Chunk) -> Result<(), StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let embedding_bytes = chunk.embedding.as_deref().map(serialize_embedding);
        self.conn
            .execute(
                "UPDATE chunks SET
                 file_path = ?1, file_hash = ?2, resource_name = ?3, resource_type = ?4,
                 chunk_type = ?5, chunk_index = ?6, start_line = ?7, end_line = ?8,
                 embedding = COALESCE(?9, embedding), parent_chunk_id = ?10, timestamp = ?11,
                 content_hash = ?12, semantic_type = ?13, semantic_intent = ?14,
                 context_json = ?15, sequence_key = ?16, is_sequence_definition = ?17,
                 referenced_sequences = ?18
                 WHERE id = ?19",
                params![
                    chunk.file_path,
                    chunk.file_hash,
                    chunk.resource_name,
                    chunk.resource_type,
                    chunk.chunk_type,
                    chunk.chunk_index,
                    chunk.start_line,
                    chunk.end_line,
                    embedding_bytes,
                    chunk.parent_chunk_id,
                    chunk.timestamp,
                    chunk.content_hash,
                    chunk.semantic_type,
                    chunk.semantic_intent.as_str(),
                    chunk.context.to_string(),
                    chunk.sequence_key,
                    chunk.is_sequence_definition as i64,
                    references_json(&chunk.referenced_sequences),
                    id,
                ],
            )
            .map_err(|e| StoreError::WriteFailed(format!("update chunk: {}", e)))?;

        self.conn
            .execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![id])
            .map_err(|e| StoreError::WriteFailed(format!("delete fts row: {}", e)))?;
        self.conn
            .execute(
                "INSERT INTO chunks_fts (chunk_id, embedding_text) VALUES (?1, ?2)",
                params![id, chunk.embedding_text],
            )
            .map_err(|e| StoreError::WriteFailed(format!("insert fts row: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.update", start.elapsed());

        Ok(())
    }

    /// Delete one chunk and its mirror row.
    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![id])
            .map_err(|e| StoreError::WriteFailed(format!("delete fts row: {}", e)))?;
        self.conn
            .execute("DELETE FROM chunks WHERE id = ?1", params![id])
            .map_err(|e| StoreError::WriteFailed(format!("delete chunk: {}", e)))?;
        Ok(())
    }

    /// Delete all chunks for a file, keeping the mirror tight.
    pub fn delete_by_file(&self, file_path: &str) -> Result<u32, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.conn
            .execute(
                "DELETE FROM chunks_fts WHERE chunk_id IN
                 (SELECT id FROM chunks WHERE file_path = ?1)",
                params![file_path],
            )
            .map_err(|e| StoreError::WriteFailed(format!("delete fts rows: {}", e)))?;
        let deleted = self
            .conn
            .execute("DELETE FROM chunks WHERE file_path = ?1", params![file_path])
            .map_err(|e| StoreError::WriteFailed(format!("delete chunks: {}", e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.delete_by_file", start.elapsed());

        Ok(deleted as u32)
    }

    const CHUNK_COLUMNS: &'static str =
        "c.id, c.file_path, c.file_hash, c.resource_name, c.resource_type, c.chunk_type,
         c.chunk_index, c.start_line, c.end_line, c.embedding, c.parent_chunk_id,
         c.timestamp, c.content_hash, c.semantic_type, c.semantic_intent,
         c.context_json, c.sequence_key, c.is_sequence_definition,
         c.referenced_sequences, f.embedding_text";

    pub fn get_by_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError> {
        let sql = format!(
            "SELECT {} FROM chunks c LEFT JOIN chunks_fts f ON f.chunk_id = c.id
             WHERE c.file_path = ?1 ORDER BY c.chunk_index",
            Self::CHUNK_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![file_path], row_to_chunk)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    pub fn get_all(&self) -> Result<Vec<Chunk>, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let sql = format!(
            "SELECT {} FROM chunks c LEFT JOIN chunks_fts f ON f.chunk_id = c.id
             ORDER BY c.id",
            Self::CHUNK_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_chunk)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let chunks = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.get_all", start.elapsed());

        Ok(chunks)
    }

    pub fn count(&self) -> Result<u32, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    /// Latest stored file hash per path; used to warm-start the scanner.
    pub fn latest_file_hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT file_path, file_hash, MAX(timestamp) FROM chunks GROUP BY file_path",
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, hash) = row.map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            map.insert(path, hash);
        }
        Ok(map)
    }

    /// Resolve a qualified `type:name` reference to a definition chunk id.
    ///
    /// The stock behavior matches on the bare name only, which is how
    /// references resolve in practice; `match_qualifier` additionally
    /// requires the `type:` qualifier to equal the definition's resource type.
    pub fn find_definition(
        &self,
        reference: &str,
        match_qualifier: bool,
    ) -> Result<Option<i64>, StoreError> {
        let (qualifier, name) = match reference.split_once(':') {
            Some((q, n)) => (Some(q), n),
            None => (None, reference),
        };

        let result = if match_qualifier {
            self.conn
                .query_row(
                    "SELECT id FROM chunks
                     WHERE is_sequence_definition = 1 AND sequence_key = ?1
                       AND (?2 IS NULL OR resource_type = ?2)
                     ORDER BY id LIMIT 1",
                    params![name, qualifier],
                    |row| row.get(0),
                )
                .optional()
        } else {
            self.conn
                .query_row(
                    "SELECT id FROM chunks
                     WHERE is_sequence_definition = 1 AND sequence_key = ?1
                     ORDER BY id LIMIT 1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
        };
        result.map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    /// Record a caller → callee edge.
    pub fn link_reference(
        &self,
        caller_chunk_id: i64,
        callee_chunk_id: i64,
        sequence_key: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO sequence_references
                 (caller_chunk_id, callee_chunk_id, sequence_key, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    caller_chunk_id,
                    callee_chunk_id,
                    sequence_key,
                    chrono::Utc::now().timestamp_millis()
                ],
            )
            .map_err(|e| StoreError::WriteFailed(format!("link reference: {}", e)))?;
        Ok(())
    }

    /// Drop a caller's outgoing edges before relinking.
    pub fn delete_references_from(&self, caller_chunk_id: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM sequence_references WHERE caller_chunk_id = ?1",
                params![caller_chunk_id],
            )
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Outgoing edges of a chunk as `(callee_id, sequence_key)`.
    pub fn references_from(&self, chunk_id: i64) -> Result<Vec<(i64, String)>, StoreError> {
        self.edge_query(
            "SELECT callee_chunk_id, sequence_key FROM sequence_references
             WHERE caller_chunk_id = ?1 ORDER BY id",
            chunk_id,
        )
    }

    /// Incoming edges of a chunk as `(caller_id, sequence_key)`.
    pub fn references_to(&self, chunk_id: i64) -> Result<Vec<(i64, String)>, StoreError> {
        self.edge_query(
            "SELECT caller_chunk_id, sequence_key FROM sequence_references
             WHERE callee_chunk_id = ?1 ORDER BY id",
            chunk_id,
        )
    }

    fn edge_query(&self, sql: &str, id: i64) -> Result<Vec<(i64, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    /// BM25-ranked sparse query. FTS rank is negative, most negative best.
    /// A syntax error in the MATCH expression surfaces as `FtsSyntax`.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(i64, f64)>, StoreError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT chunk_id, rank FROM chunks_fts
                 WHERE chunks_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let rows = stmt
            .query_map(params![query, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(|e| StoreError::FtsSyntax(e.to_string()))?;
        let hits = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::FtsSyntax(e.to_string()))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.fts_search", start.elapsed());

        Ok(hits)
    }

    pub fn stats(&self) -> Result<IndexStats, StoreError> {
        let total_chunks: u32 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);
        let total_files: u32 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT file_path) FROM chunks", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        let last_indexed: Option<i64> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM chunks", [], |row| row.get(0))
            .optional()
            .unwrap_or(None)
            .flatten();
        let index_size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(IndexStats {
            total_files,
            total_chunks,
            index_size_bytes,
            last_indexed,
        })
    }

    /// Number of FTS mirror rows; the bijection invariant makes this equal
    /// to `count()` at rest.
    pub fn fts_count(&self) -> Result<u32, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM chunks_fts", [])
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.conn
            .execute("DELETE FROM chunks", [])
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

/// Delete the database and its WAL/SHM sidecars.
fn remove_with_sidecars(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(path));
    }
}

/// Classify an open-time error into the recovery taxonomy.
fn classify_open_error(err: &rusqlite::Error) -> StoreError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("abi") || lowered.contains("version mismatch") {
        StoreError::AbiMismatch(message)
    } else {
        StoreError::OpenFailed(message)
    }
}

/// Embeddings are stored as little-endian f32 bytes.
pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

fn references_json(refs: &[String]) -> Option<String> {
    if refs.is_empty() {
        None
    } else {
        serde_json::to_string(refs).ok()
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let embedding_bytes: Option<Vec<u8>> = row.get(9)?;
    let context_json: String = row.get(15)?;
    let intent: String = row.get(14)?;
    let refs_json: Option<String> = row.get(18)?;
    let embedding_text: Option<String> = row.get(19)?;

    Ok(Chunk {
        id: Some(row.get(0)?),
        file_path: row.get(1)?,
        file_hash: row.get(2)?,
        resource_name: row.get(3)?,
        resource_type: row.get(4)?,
        chunk_type: row.get(5)?,
        chunk_index: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        embedding: embedding_bytes.map(|b| deserialize_embedding(&b)),
        parent_chunk_id: row.get(10)?,
        timestamp: row.get(11)?,
        content_hash: row.get(12)?,
        semantic_type: row.get(13)?,
        semantic_intent: SemanticIntent::parse(&intent),
        context: serde_json::from_str(&context_json).unwrap_or(serde_json::Value::Null),
        sequence_key: row.get(16)?,
        is_sequence_definition: row.get::<_, i64>(17)? != 0,
        referenced_sequences: refs_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        parent_index: None,
        embedding_text: embedding_text.unwrap_or_default(),
    })
}
