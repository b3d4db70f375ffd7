//! SQLite-based storage implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};
use ulid::Ulid;

use docqa_core::text::tokenize;
use docqa_core::{
    Chunk, ChunkMeta, ChunkStore, DatabaseConfig, DistanceMetric, DocQaError, Document,
    Granularity, IndexFilter, KeywordIndex, Result, Stats, VectorIndex,
};

use crate::schema::SCHEMA;
use crate::{check_dimension, cosine_distance, nearest};

const CHUNK_COLUMNS: &str = "id, doc_id, version, chunk_index, granularity, content, \
     token_count, char_count, word_count, heading, quality_score, embedding, parent_id, \
     prev_id, next_id, start_offset, end_offset, start_line, end_line, content_hash";

const DOCUMENT_COLUMNS: &str =
    "id, version, source_uri, raw_content, byte_size, content_hash, metadata, created_at";

/// SQLite-backed vector index, keyword index and chunk store.
///
/// One connection behind a blocking Mutex, used from the blocking thread
/// pool via `spawn_blocking`. Keyword search uses FTS5 with bm25 ranking;
/// vectors are scanned and ranked by cosine distance.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        Self::open_with_timeout(path.as_ref(), dimension, 30_000)
    }

    /// Open the database named in `config`.
    pub fn from_config(config: &DatabaseConfig, dimension: usize) -> Result<Self> {
        Self::open_with_timeout(&config.path, dimension, config.busy_timeout_ms)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DocQaError::database(format!("Failed to open in-memory database: {}", e))
        })?;
        Self::init(conn, dimension, Path::new(":memory:"), 30_000)
    }

    fn open_with_timeout(path: &Path, dimension: usize, busy_timeout_ms: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DocQaError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, dimension, path, busy_timeout_ms)
    }

    fn init(conn: Connection, dimension: usize, path: &Path, busy_timeout_ms: u32) -> Result<Self> {
        if dimension == 0 {
            return Err(DocQaError::config("vector dimension must be > 0"));
        }
        Self::configure_connection(&conn, busy_timeout_ms)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| DocQaError::database(format!("Failed to initialize schema: {}", e)))?;

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
            busy_timeout_ms
        ))
        .map_err(|e| DocQaError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Run a blocking operation on the connection from the blocking pool.
    ///
    /// The caller's future stays cancellable while SQLite works, so a
    /// timeout around any store call can fire.
    async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| DocQaError::database(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| DocQaError::internal(format!("SQLite task failed: {}", e)))?
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let id: String = row.get(0)?;
        let content_hash: Option<Vec<u8>> = row.get(5)?;
        let metadata: Option<String> = row.get(6)?;

        Ok(Document {
            id: parse_ulid(0, &id)?,
            version: row.get(1)?,
            source_uri: row.get(2)?,
            raw_content: row.get(3)?,
            byte_size: row.get::<_, i64>(4)? as usize,
            content_hash: content_hash.and_then(|v| v.try_into().ok()),
            metadata: metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or_default(),
            created_at: row.get::<_, i64>(7)? as u64,
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let id: String = row.get(0)?;
        let doc_id: String = row.get(1)?;
        let granularity: String = row.get(4)?;
        let embedding: Option<Vec<u8>> = row.get(11)?;
        let content_hash: Option<Vec<u8>> = row.get(19)?;

        Ok(Chunk {
            id: parse_ulid(0, &id)?,
            doc_id: parse_ulid(1, &doc_id)?,
            version: row.get(2)?,
            chunk_index: row.get(3)?,
            granularity: parse_granularity(4, &granularity)?,
            content: row.get(5)?,
            token_count: row.get(6)?,
            char_count: row.get(7)?,
            word_count: row.get(8)?,
            heading: row.get(9)?,
            quality_score: row.get::<_, f64>(10)? as f32,
            embedding: embedding.map(|b| bytes_to_vec(&b)),
            parent_id: parse_opt_ulid(12, row.get(12)?)?,
            prev_id: parse_opt_ulid(13, row.get(13)?)?,
            next_id: parse_opt_ulid(14, row.get(14)?)?,
            start_offset: row.get(15)?,
            end_offset: row.get(16)?,
            start_line: row.get(17)?,
            end_line: row.get(18)?,
            content_hash: content_hash.and_then(|v| v.try_into().ok()),
        })
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let content_hash = doc.content_hash.map(|h| h.to_vec());
        let metadata = serde_json::to_string(&doc.metadata)?;
        let doc = doc.clone();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO documents (id, version, source_uri, raw_content, byte_size,
                                       content_hash, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    doc.id.to_string(),
                    doc.version,
                    doc.source_uri,
                    doc.raw_content,
                    doc.byte_size as i64,
                    content_hash,
                    metadata,
                    doc.created_at as i64,
                ],
            )
            .map_err(|e| DocQaError::database(format!("Failed to insert document: {}", e)))?;

            debug!("Inserted document: {} v{}", doc.id, doc.version);
            Ok(())
        })
        .await
    }

    async fn latest_document(&self, source_uri: &str) -> Result<Option<Document>> {
        let source_uri = source_uri.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM documents WHERE source_uri = ?1 ORDER BY version DESC LIMIT 1",
                    DOCUMENT_COLUMNS
                ))
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let result = stmt
                .query_row(params![source_uri], Self::row_to_document)
                .optional()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            Ok(result)
        })
        .await
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT INTO chunks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                        CHUNK_COLUMNS
                    ))
                    .map_err(|e| DocQaError::database(e.to_string()))?;

                for chunk in &chunks {
                    stmt.execute(params![
                        chunk.id.to_string(),
                        chunk.doc_id.to_string(),
                        chunk.version,
                        chunk.chunk_index,
                        chunk.granularity.as_str(),
                        chunk.content,
                        chunk.token_count,
                        chunk.char_count,
                        chunk.word_count,
                        chunk.heading,
                        chunk.quality_score as f64,
                        chunk.embedding.as_deref().map(vec_to_bytes),
                        chunk.parent_id.map(|id| id.to_string()),
                        chunk.prev_id.map(|id| id.to_string()),
                        chunk.next_id.map(|id| id.to_string()),
                        chunk.start_offset,
                        chunk.end_offset,
                        chunk.start_line,
                        chunk.end_line,
                        chunk.content_hash.map(|h| h.to_vec()),
                    ])
                    .map_err(|e| DocQaError::database(format!("Failed to insert chunk: {}", e)))?;
                }
            }

            tx.commit()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            debug!("Inserted {} chunks", chunks.len());
            Ok(())
        })
        .await
    }

    async fn remove_document(&self, doc_id: Ulid, version: u32) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| DocQaError::database(e.to_string()))?;
            tx.execute(
                "DELETE FROM chunks WHERE doc_id = ?1 AND version = ?2",
                params![doc_id.to_string(), version],
            )
            .map_err(|e| DocQaError::database(e.to_string()))?;
            tx.execute(
                "DELETE FROM documents WHERE id = ?1 AND version = ?2",
                params![doc_id.to_string(), version],
            )
            .map_err(|e| DocQaError::database(format!("Failed to remove document: {}", e)))?;
            tx.commit()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            debug!("Removed document: {} v{}", doc_id, version);
            Ok(())
        })
        .await
    }

    async fn get_chunks(&self, ids: &[Ulid]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM chunks WHERE id IN ({})",
                    CHUNK_COLUMNS, placeholders
                ))
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params_from_iter(ids.iter()), Self::row_to_chunk)
                .map_err(|e| DocQaError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            Ok(chunks)
        })
        .await
    }

    async fn chunks_for_document(&self, doc_id: Ulid, version: u32) -> Result<Vec<Chunk>> {
        let mut chunks = self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM chunks WHERE doc_id = ?1 AND version = ?2",
                    CHUNK_COLUMNS
                ))
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let chunks = stmt
                .query_map(params![doc_id.to_string(), version], Self::row_to_chunk)
                .map_err(|e| DocQaError::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            Ok(chunks)
        })
        .await?;
        chunks.sort_by_key(|c| (c.granularity, c.chunk_index));
        Ok(chunks)
    }

    async fn stats(&self) -> Result<Stats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| DocQaError::database(e.to_string()))
            };

            let documents = count("SELECT COUNT(*) FROM documents")?;
            let chunks = count("SELECT COUNT(*) FROM chunks")?;
            let embeddings = count("SELECT COUNT(*) FROM chunk_vectors")?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .unwrap_or(4096);

            Ok(Stats {
                documents,
                chunks,
                embeddings,
                storage_bytes: page_count * page_size,
            })
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA optimize;")
                .map_err(|e| DocQaError::database(e.to_string()))?;
            debug!("Database optimized on close");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(&self, chunk_id: Ulid, vector: &[f32], meta: ChunkMeta) -> Result<()> {
        check_dimension(self.dimension, vector)?;
        let bytes = vec_to_bytes(vector);
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO chunk_vectors (chunk_id, doc_id, version, granularity, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    chunk_id.to_string(),
                    meta.doc_id.to_string(),
                    meta.version,
                    meta.granularity.as_str(),
                    bytes,
                ],
            )
            .map_err(|e| DocQaError::database(format!("Failed to insert embedding: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<(Ulid, f32)>> {
        check_dimension(self.dimension, vector)?;
        let granularity = filter.and_then(|f| f.granularity).map(|g| g.as_str());
        let vector = vector.to_vec();
        let filter = filter.cloned();

        let hits = self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT chunk_id, doc_id, version, granularity, embedding
                    FROM chunk_vectors
                    WHERE ?1 IS NULL OR granularity = ?1
                    "#,
                )
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![granularity], |row| {
                    let chunk_id: String = row.get(0)?;
                    let doc_id: String = row.get(1)?;
                    let granularity: String = row.get(3)?;
                    let bytes: Vec<u8> = row.get(4)?;
                    let meta = ChunkMeta {
                        doc_id: parse_ulid(1, &doc_id)?,
                        version: row.get(2)?,
                        granularity: parse_granularity(3, &granularity)?,
                    };
                    Ok((parse_ulid(0, &chunk_id)?, meta, bytes_to_vec(&bytes)))
                })
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, meta, embedding) = row.map_err(|e| DocQaError::database(e.to_string()))?;
                if filter.as_ref().map_or(true, |f| f.matches(&meta)) {
                    hits.push((id, cosine_distance(&vector, &embedding)));
                }
            }
            Ok(hits)
        })
        .await?;

        Ok(nearest(hits, k))
    }

    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()> {
        let chunk_ids = chunk_ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| DocQaError::database(e.to_string()))?;
            for id in &chunk_ids {
                tx.execute(
                    "DELETE FROM chunk_vectors WHERE chunk_id = ?1",
                    params![id.to_string()],
                )
                .map_err(|e| DocQaError::database(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| DocQaError::database(e.to_string()))
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

#[async_trait]
impl KeywordIndex for SqliteStore {
    async fn index(&self, chunk_id: Ulid, content: &str) -> Result<()> {
        let content = content.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| DocQaError::database(e.to_string()))?;
            tx.execute(
                "DELETE FROM chunk_text WHERE chunk_id = ?1",
                params![chunk_id.to_string()],
            )
            .map_err(|e| DocQaError::database(e.to_string()))?;
            tx.execute(
                "INSERT INTO chunk_text (chunk_id, content) VALUES (?1, ?2)",
                params![chunk_id.to_string(), content],
            )
            .map_err(|e| DocQaError::database(format!("Failed to index chunk: {}", e)))?;
            tx.commit()
                .map_err(|e| DocQaError::database(e.to_string()))
        })
        .await
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<(Ulid, f32)>> {
        let Some(expr) = fts5_query(query) else {
            return Ok(Vec::new());
        };

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT t.chunk_id, bm25(chunk_fts) AS score
                    FROM chunk_fts
                    JOIN chunk_text t ON t.rowid = chunk_fts.rowid
                    WHERE chunk_fts MATCH ?1
                    ORDER BY score, t.chunk_id
                    LIMIT ?2
                    "#,
                )
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![expr, k as i64], |row| {
                    let id: String = row.get(0)?;
                    let score: f64 = row.get(1)?;
                    // bm25() is lower-is-better.
                    Ok((parse_ulid(0, &id)?, (-score) as f32))
                })
                .map_err(|e| DocQaError::database(e.to_string()))?;

            let results: Vec<_> = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| DocQaError::database(e.to_string()))?;

            Ok(results)
        })
        .await
    }

    async fn remove(&self, chunk_ids: &[Ulid]) -> Result<()> {
        let chunk_ids = chunk_ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| DocQaError::database(e.to_string()))?;
            for id in &chunk_ids {
                tx.execute(
                    "DELETE FROM chunk_text WHERE chunk_id = ?1",
                    params![id.to_string()],
                )
                .map_err(|e| DocQaError::database(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| DocQaError::database(e.to_string()))
        })
        .await
    }
}

/// Build an FTS5 OR-query of quoted keyword terms.
fn fts5_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(query) {
        let quoted = format!("\"{}\"", term.replace('"', "\"\""));
        if !terms.contains(&quoted) {
            terms.push(quoted);
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Convert f32 vector to bytes (little-endian).
fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_ulid(idx: usize, s: &str) -> rusqlite::Result<Ulid> {
    Ulid::from_string(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ulid(idx: usize, s: Option<String>) -> rusqlite::Result<Option<Ulid>> {
    s.map(|s| parse_ulid(idx, &s)).transpose()
}

fn parse_granularity(idx: usize, s: &str) -> rusqlite::Result<Granularity> {
    Granularity::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(DocQaError::internal(format!("unknown granularity: {}", s))),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{ChunkData, ChunkForest};

    fn forest(doc: &Document, parts: &[&str]) -> Vec<Chunk> {
        let mut offset = 0;
        let data = parts
            .iter()
            .map(|p| {
                let d = ChunkData {
                    content: p.to_string(),
                    token_count: p.len() / 4 + 1,
                    start: offset,
                    end: offset + p.len(),
                    start_line: 1,
                    end_line: 1,
                    granularity: Granularity::Paragraph,
                    heading: Some("Water".to_string()),
                    quality_score: 0.7,
                    parent: None,
                };
                offset += p.len() + 2;
                d
            })
            .collect();
        ChunkForest::build(doc, data).unwrap().into_chunks()
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory(3).unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.chunks, 0);
        assert!(SqliteStore::open_memory(0).is_err());
    }

    #[tokio::test]
    async fn test_document_versions() {
        let store = SqliteStore::open_memory(3).unwrap();
        let v1 = Document::new("file://manual.txt", "first");
        let v2 = v1.supersede("second");
        store.insert_document(&v1).await.unwrap();
        store.insert_document(&v2).await.unwrap();

        let latest = store
            .latest_document("file://manual.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, v1.id);
        assert_eq!(latest.version, 2);
        assert_eq!(latest.raw_content, "second");
        assert_eq!(latest.content_hash, v2.content_hash);
        assert!(store.latest_document("file://other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunks_round_trip_links() {
        let store = SqliteStore::open_memory(3).unwrap();
        let doc = Document::new("file://manual.txt", "alpha\n\nbeta");
        store.insert_document(&doc).await.unwrap();
        let mut chunks = forest(&doc, &["alpha", "beta"]);
        chunks[0].embedding = Some(vec![0.5, 0.25, -1.0]);
        store.insert_chunks(&chunks).await.unwrap();

        let stored = store.chunks_for_document(doc.id, 1).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].chunk_index, 0);
        assert_eq!(stored[0].next_id, Some(stored[1].id));
        assert_eq!(stored[1].prev_id, Some(stored[0].id));
        assert_eq!(stored[0].heading.as_deref(), Some("Water"));
        assert_eq!(stored[0].embedding.as_deref(), Some(&[0.5, 0.25, -1.0][..]));
        assert!(stored[1].embedding.is_none());
        assert_eq!(stored[1].start_offset, 7);

        let fetched = store.get_chunks(&[chunks[1].id, Ulid::new()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].content, "beta");
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let store = SqliteStore::open_memory(3).unwrap();
        let a = Ulid::new();
        let b = Ulid::new();
        store.index(a, "Boil water for one minute to purify it.").await.unwrap();
        store.index(b, "Store canned food in a cool place.").await.unwrap();

        let results = store.search("How do I purify water?", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, a);
        assert!(results[0].1 > 0.0);

        assert!(store.search("the of ?", 10).await.unwrap().is_empty());

        KeywordIndex::remove(&store, &[a]).await.unwrap();
        assert!(store.search("purify", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_content() {
        let store = SqliteStore::open_memory(3).unwrap();
        let a = Ulid::new();
        store.index(a, "old words").await.unwrap();
        store.index(a, "fresh text").await.unwrap();
        assert!(store.search("old", 10).await.unwrap().is_empty());
        assert_eq!(store.search("fresh", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_query_and_filter() {
        let store = SqliteStore::open_memory(3).unwrap();
        let doc = Ulid::new();
        let other = Ulid::new();
        let meta = |d, g| ChunkMeta {
            doc_id: d,
            version: 1,
            granularity: g,
        };
        let a = Ulid::new();
        let b = Ulid::new();
        let c = Ulid::new();
        store.upsert(a, &[1.0, 0.0, 0.0], meta(doc, Granularity::Paragraph)).await.unwrap();
        store.upsert(b, &[0.0, 1.0, 0.0], meta(doc, Granularity::Sentence)).await.unwrap();
        store.upsert(c, &[0.9, 0.1, 0.0], meta(other, Granularity::Paragraph)).await.unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, a);
        assert!(hits[0].1.abs() < 1e-6);
        assert_eq!(hits[1].0, c);

        let filter = IndexFilter {
            doc_ids: Some(vec![doc]),
            granularity: Some(Granularity::Sentence),
        };
        let hits = store.query(&[1.0, 0.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, b);

        VectorIndex::remove(&store, &[a]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().embeddings, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = SqliteStore::open_memory(3).unwrap();
        let meta = ChunkMeta {
            doc_id: Ulid::new(),
            version: 1,
            granularity: Granularity::Paragraph,
        };
        let err = store.upsert(Ulid::new(), &[1.0], meta).await.unwrap_err();
        assert!(matches!(err, DocQaError::DimensionMismatch { expected: 3, actual: 1 }));
        assert!(store.query(&[1.0, 0.0], 5, None).await.is_err());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("docqa.db");
        {
            let store = SqliteStore::open(&path, 3).unwrap();
            let doc = Document::new("file://a.txt", "persisted");
            store.insert_document(&doc).await.unwrap();
            ChunkStore::close(&store).await.unwrap();
        }
        let store = SqliteStore::open(&path, 3).unwrap();
        assert_eq!(store.stats().await.unwrap().documents, 1);
        assert!(store.stats().await.unwrap().storage_bytes > 0);
    }

    #[tokio::test]
    async fn test_remove_document_drops_chunks() {
        let store = SqliteStore::open_memory(3).unwrap();
        let v1 = Document::new("file://manual.txt", "alpha\n\nbeta");
        let v2 = v1.supersede("gamma");
        store.insert_document(&v1).await.unwrap();
        store.insert_chunks(&forest(&v1, &["alpha", "beta"])).await.unwrap();
        store.insert_document(&v2).await.unwrap();
        store.insert_chunks(&forest(&v2, &["gamma"])).await.unwrap();

        store.remove_document(v2.id, 2).await.unwrap();

        let latest = store
            .latest_document("file://manual.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, 1);
        assert!(store.chunks_for_document(v2.id, 2).await.unwrap().is_empty());
        assert_eq!(store.chunks_for_document(v1.id, 1).await.unwrap().len(), 2);
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_busy_connection_lets_timeout_fire() {
        let store = SqliteStore::open_memory(3).unwrap();
        store.index(Ulid::new(), "boil water").await.unwrap();

        // Stand-in for a long-running statement on another task.
        let busy = store.conn.lock().unwrap();
        let search = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.search("water", 5),
        )
        .await;
        assert!(search.is_err(), "search should not block the runtime");
        let query = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.query(&[1.0, 0.0, 0.0], 5, None),
        )
        .await;
        assert!(query.is_err());
        drop(busy);

        assert_eq!(store.search("water", 5).await.unwrap().len(), 1);
    }

    #[test]
    fn test_fts5_query() {
        assert_eq!(
            fts5_query("Purify water, purify!"),
            Some("\"purify\" OR \"water\"".to_string())
        );
        assert_eq!(fts5_query("a the ?"), None);
    }
}
