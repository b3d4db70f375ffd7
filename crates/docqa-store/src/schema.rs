//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Document versions
CREATE TABLE IF NOT EXISTS documents (
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    source_uri TEXT NOT NULL,
    raw_content TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    content_hash BLOB,
    metadata TEXT DEFAULT '{}',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (id, version)
);

CREATE INDEX IF NOT EXISTS idx_documents_source_uri ON documents(source_uri, version);

-- Chunk records
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    granularity TEXT NOT NULL,
    content TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    char_count INTEGER NOT NULL,
    word_count INTEGER NOT NULL,
    heading TEXT,
    quality_score REAL NOT NULL,
    embedding BLOB,
    parent_id TEXT,
    prev_id TEXT,
    next_id TEXT,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    content_hash BLOB,
    FOREIGN KEY (doc_id, version) REFERENCES documents(id, version) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id, version, granularity, chunk_index);

-- Vector index: little-endian f32 embeddings
CREATE TABLE IF NOT EXISTS chunk_vectors (
    chunk_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    granularity TEXT NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc ON chunk_vectors(doc_id);

-- Keyword index source rows
CREATE TABLE IF NOT EXISTS chunk_text (
    chunk_id TEXT PRIMARY KEY,
    content TEXT NOT NULL
);

-- FTS5 virtual table for keyword search
CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
    content,
    content=chunk_text,
    content_rowid=rowid
);

-- Triggers to keep FTS5 in sync with chunk_text
CREATE TRIGGER IF NOT EXISTS chunk_text_ai AFTER INSERT ON chunk_text BEGIN
    INSERT INTO chunk_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS chunk_text_ad AFTER DELETE ON chunk_text BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, content) VALUES ('delete', OLD.rowid, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS chunk_text_au AFTER UPDATE ON chunk_text BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, content) VALUES ('delete', OLD.rowid, OLD.content);
    INSERT INTO chunk_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;
"#;
