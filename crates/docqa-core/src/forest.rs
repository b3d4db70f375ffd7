//! Arena of chunks for one document version.
//!
//! Parent and sibling relations are stored as ids on each [`Chunk`] and
//! resolved through the arena's index, so the forest can be serialized
//! or handed to a store as a flat list.

use std::collections::HashMap;

use ulid::Ulid;

use crate::error::{DocQaError, Result};
use crate::types::{Chunk, ChunkData, Document, Granularity};

/// All chunks produced for one document version, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ChunkForest {
    chunks: Vec<Chunk>,
    index: HashMap<Ulid, usize>,
}

impl ChunkForest {
    /// Turn chunker output into linked chunk records.
    ///
    /// Entries must be emitted in reading order within each granularity and
    /// a parent must appear before its children.
    pub fn build(doc: &Document, data: Vec<ChunkData>) -> Result<Self> {
        let ids: Vec<Ulid> = data.iter().map(|_| Ulid::new()).collect();
        let mut next_ordinal: HashMap<Granularity, u32> = HashMap::new();
        let mut last_at: HashMap<Granularity, usize> = HashMap::new();
        let mut chunks: Vec<Chunk> = Vec::with_capacity(data.len());

        for (i, d) in data.into_iter().enumerate() {
            let parent_id = match d.parent {
                Some(p) if p < i => {
                    if chunks[p].granularity >= d.granularity {
                        return Err(DocQaError::internal(format!(
                            "chunk {} ({}) has parent of granularity {}",
                            i, d.granularity, chunks[p].granularity
                        )));
                    }
                    Some(ids[p])
                }
                Some(p) => {
                    return Err(DocQaError::internal(format!(
                        "chunk {} references parent {} emitted after it",
                        i, p
                    )))
                }
                None => None,
            };

            let ordinal = next_ordinal.entry(d.granularity).or_insert(0);
            let chunk_index = *ordinal;
            *ordinal += 1;

            let prev_id = match last_at.insert(d.granularity, i) {
                Some(prev) => {
                    chunks[prev].next_id = Some(ids[i]);
                    Some(ids[prev])
                }
                None => None,
            };

            let content_hash = blake3::hash(d.content.as_bytes());
            chunks.push(Chunk {
                id: ids[i],
                doc_id: doc.id,
                version: doc.version,
                chunk_index,
                granularity: d.granularity,
                char_count: d.content.chars().count() as u32,
                word_count: d.content.split_whitespace().count() as u32,
                token_count: d.token_count as u32,
                content: d.content,
                heading: d.heading,
                quality_score: d.quality_score.clamp(0.0, 1.0),
                embedding: None,
                parent_id,
                prev_id,
                next_id: None,
                start_offset: d.start as u32,
                end_offset: d.end as u32,
                start_line: d.start_line,
                end_line: d.end_line,
                content_hash: Some(*content_hash.as_bytes()),
            });
        }

        let index = chunks.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        Ok(Self { chunks, index })
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the forest holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look up a chunk by id.
    pub fn get(&self, id: Ulid) -> Option<&Chunk> {
        self.index.get(&id).map(|&i| &self.chunks[i])
    }

    /// The enclosing chunk, if any.
    pub fn parent(&self, id: Ulid) -> Option<&Chunk> {
        self.get(id)?.parent_id.and_then(|p| self.get(p))
    }

    /// Direct children in reading order.
    pub fn children(&self, id: Ulid) -> Vec<&Chunk> {
        self.chunks
            .iter()
            .filter(|c| c.parent_id == Some(id))
            .collect()
    }

    /// Chunks without a parent.
    pub fn roots(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| c.parent_id.is_none())
    }

    /// Chunks of one granularity in ordinal order.
    pub fn at(&self, granularity: Granularity) -> impl Iterator<Item = &Chunk> {
        self.chunks
            .iter()
            .filter(move |c| c.granularity == granularity)
    }

    /// Granularities present, coarsest first.
    pub fn granularities(&self) -> Vec<Granularity> {
        let mut present: Vec<Granularity> = self.chunks.iter().map(|c| c.granularity).collect();
        present.sort();
        present.dedup();
        present
    }

    /// All chunks in emission order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Attach an embedding to a chunk. Links are left untouched.
    pub fn set_embedding(&mut self, id: Ulid, embedding: Vec<f32>) -> bool {
        match self.index.get(&id) {
            Some(&i) => {
                self.chunks[i].embedding = Some(embedding);
                true
            }
            None => false,
        }
    }

    /// Consume the arena, yielding the chunk records.
    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(text: &str, start: usize, g: Granularity, parent: Option<usize>) -> ChunkData {
        ChunkData {
            content: text.to_string(),
            token_count: 1,
            start,
            end: start + text.len(),
            start_line: 1,
            end_line: 1,
            granularity: g,
            heading: None,
            quality_score: 0.5,
            parent,
        }
    }

    #[test]
    fn test_build_links() {
        let doc = Document::new("mem://doc", "Alpha beta. Gamma delta.");
        let forest = ChunkForest::build(
            &doc,
            vec![
                data("Alpha beta. Gamma delta.", 0, Granularity::Document, None),
                data("Alpha beta.", 0, Granularity::Sentence, Some(0)),
                data("Gamma delta.", 12, Granularity::Sentence, Some(0)),
            ],
        )
        .unwrap();

        assert_eq!(forest.len(), 3);
        let root = &forest.chunks()[0];
        let kids = forest.children(root.id);
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].chunk_index, 0);
        assert_eq!(kids[1].chunk_index, 1);
        assert_eq!(kids[0].next_id, Some(kids[1].id));
        assert_eq!(kids[1].prev_id, Some(kids[0].id));
        assert_eq!(forest.parent(kids[1].id).map(|c| c.id), Some(root.id));
        assert_eq!(root.chunk_index, 0);
        assert_eq!(forest.roots().count(), 1);
        assert_eq!(
            forest.granularities(),
            vec![Granularity::Document, Granularity::Sentence]
        );
    }

    #[test]
    fn test_counts_and_version() {
        let doc = Document::new("mem://doc", "one two three").supersede("one two three four");
        let forest = ChunkForest::build(
            &doc,
            vec![data("one two three four", 0, Granularity::Paragraph, None)],
        )
        .unwrap();
        let c = &forest.chunks()[0];
        assert_eq!(c.version, 2);
        assert_eq!(c.word_count, 4);
        assert_eq!(c.char_count, 18);
        assert!(c.embedding.is_none());
    }

    #[test]
    fn test_rejects_forward_parent() {
        let doc = Document::new("mem://doc", "x y");
        let result = ChunkForest::build(
            &doc,
            vec![
                data("x", 0, Granularity::Sentence, Some(1)),
                data("x y", 0, Granularity::Document, None),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_set_embedding() {
        let doc = Document::new("mem://doc", "x y");
        let mut forest =
            ChunkForest::build(&doc, vec![data("x y", 0, Granularity::Paragraph, None)]).unwrap();
        let id = forest.chunks()[0].id;
        assert!(forest.set_embedding(id, vec![1.0, 0.0]));
        assert!(!forest.set_embedding(Ulid::new(), vec![]));
        assert_eq!(forest.get(id).unwrap().embedding.as_deref(), Some(&[1.0, 0.0][..]));
    }
}
