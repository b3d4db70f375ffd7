//! Multi-granularity chunker producing a document/section/paragraph/sentence
//! forest.

use std::sync::Arc;

use docqa_core::text::estimate_tokens;
use docqa_core::{ChunkConfig, ChunkData, Chunker, ChunkingConfig, Granularity, Result};
use tracing::debug;

use crate::quality::QualityScorer;
use crate::structural::{StructuralChunker, TokenCounter};
use crate::structure::{trim_span, DocumentStructure};

/// Chunks every level inside the region owned by its parent.
///
/// Output order is the whole document first, then all sections, all
/// paragraphs and all sentences, each level in reading order. `parent` is an
/// index into that output.
pub struct HierarchicalChunker {
    section: StructuralChunker,
    paragraph: StructuralChunker,
    sentence: StructuralChunker,
    quality: QualityScorer,
    token_counter: Option<TokenCounter>,
}

impl HierarchicalChunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        let level = |c: ChunkConfig, g: Granularity| -> Result<StructuralChunker> {
            StructuralChunker::new(c)?
                .with_granularity(g)
                .with_quality(config.quality.clone())
        };
        Ok(Self {
            section: level(config.section.clone(), Granularity::Section)?,
            paragraph: level(config.paragraph.clone(), Granularity::Paragraph)?,
            sentence: level(config.sentence.clone(), Granularity::Sentence)?,
            quality: QualityScorer::new(config.quality.clone()),
            token_counter: None,
        })
    }

    /// Use a custom token counter at every level.
    pub fn with_token_counter<F>(self, counter: F) -> Self
    where
        F: Fn(&str) -> usize + Send + Sync + 'static,
    {
        let counter: TokenCounter = Arc::new(counter);
        Self {
            section: self.section.with_shared_counter(counter.clone()),
            paragraph: self.paragraph.with_shared_counter(counter.clone()),
            sentence: self.sentence.with_shared_counter(counter.clone()),
            quality: self.quality,
            token_counter: Some(counter),
        }
    }

    fn count_tokens(&self, text: &str) -> usize {
        match &self.token_counter {
            Some(counter) => counter(text),
            None => estimate_tokens(text),
        }
    }

    /// Chunk each parent's owned region at the next level down.
    ///
    /// A parent owns its span minus whatever the previous parent already
    /// covered, so overlapping parents never share a child.
    fn descend(
        &self,
        level: &StructuralChunker,
        text: &str,
        structure: &DocumentStructure,
        out: &mut Vec<ChunkData>,
        parents: std::ops::Range<usize>,
    ) {
        let mut covered = 0usize;
        for p in parents {
            let (start, end) = (out[p].start.max(covered), out[p].end);
            covered = covered.max(end);
            if start >= end {
                continue;
            }
            if let Some((s, e)) = trim_span(text, start, end) {
                let children = level.chunk_range(text, s..e, structure, Some(p));
                out.extend(children);
            }
        }
    }
}

impl Chunker for HierarchicalChunker {
    fn chunk(&self, content: &str) -> Result<Vec<ChunkData>> {
        let Some((start, end)) = trim_span(content, 0, content.len()) else {
            return Ok(Vec::new());
        };
        let structure = DocumentStructure::analyze(content);
        let body = &content[start..end];

        let mut out = vec![ChunkData {
            content: body.to_string(),
            token_count: self.count_tokens(body),
            start,
            end,
            start_line: structure.lines.line_of(start),
            end_line: structure.lines.line_of(end - 1),
            granularity: Granularity::Document,
            heading: structure.heading_for(content, start),
            quality_score: self.quality.score(body),
            parent: None,
        }];

        let mut level_start = 0;
        for level in [&self.section, &self.paragraph, &self.sentence] {
            let parents = level_start..out.len();
            level_start = out.len();
            self.descend(level, content, &structure, &mut out, parents);
        }

        debug!(
            "hierarchical chunking produced {} chunks ({} bytes)",
            out.len(),
            content.len()
        );
        Ok(out)
    }

    fn granularities(&self) -> Vec<Granularity> {
        Granularity::ALL.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MANUAL: &str = "Water Storage\n\
        Store at least one gallon per person per day. Keep containers sealed.\n\
        \n\
        Rotate stored water every six months. Label each container with the date.\n\
        \n\
        Food Storage\n\
        Keep a three day supply of food. Choose items that need no cooking.\n";

    fn chunker() -> HierarchicalChunker {
        let mut config = ChunkingConfig::default();
        config.hierarchical = true;
        config.section.min_tokens = 1;
        config.paragraph.min_tokens = 1;
        config.sentence.min_tokens = 1;
        HierarchicalChunker::new(&config).unwrap()
    }

    #[test]
    fn test_levels_and_order() {
        let chunks = chunker().chunk(MANUAL).unwrap();
        assert_eq!(chunks[0].granularity, Granularity::Document);
        assert_eq!(chunks[0].content, MANUAL.trim());

        let levels: Vec<Granularity> = chunks.iter().map(|c| c.granularity).collect();
        let mut sorted = levels.clone();
        sorted.sort();
        assert_eq!(levels, sorted);

        let sections: Vec<&ChunkData> = chunks
            .iter()
            .filter(|c| c.granularity == Granularity::Section)
            .collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Water Storage"));
        assert_eq!(sections[1].heading.as_deref(), Some("Food Storage"));
        assert!(chunks.iter().any(|c| c.granularity == Granularity::Sentence));
    }

    #[test]
    fn test_children_inside_parents() {
        let chunks = chunker().chunk(MANUAL).unwrap();
        for c in &chunks[1..] {
            let p = &chunks[c.parent.unwrap()];
            assert!(p.granularity < c.granularity);
            assert!(p.start <= c.start && c.end <= p.end);
        }
        assert!(chunks[0].parent.is_none());
    }

    #[test]
    fn test_whitespace_document() {
        assert!(chunker().chunk(" \n\n ").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut config = ChunkingConfig::default();
        config.sentence.max_tokens = 0;
        assert!(HierarchicalChunker::new(&config).is_err());
    }

    #[test]
    fn test_custom_counter_reaches_levels() {
        let chunker = chunker().with_token_counter(|s| s.split_whitespace().count());
        let chunks = chunker.chunk(MANUAL).unwrap();
        let doc_words = MANUAL.split_whitespace().count();
        assert_eq!(chunks[0].token_count, doc_words);
        for c in &chunks {
            assert_eq!(c.token_count, c.content.split_whitespace().count());
        }
    }

    proptest! {
        #[test]
        fn prop_every_child_has_coarser_parent(
            paragraphs in prop::collection::vec(
                prop::collection::vec("[a-z]{2,8}", 1..40).prop_map(|w| w.join(" ") + "."),
                1..6,
            )
        ) {
            let text = paragraphs.join("\n\n");
            let chunks = chunker().chunk(&text).unwrap();
            prop_assert_eq!(chunks.iter().filter(|c| c.parent.is_none()).count(), 1);
            for (i, c) in chunks.iter().enumerate().skip(1) {
                let p = c.parent.unwrap();
                prop_assert!(p < i);
                prop_assert!(chunks[p].granularity < c.granularity);
                prop_assert!(chunks[p].start <= c.start && c.end <= chunks[p].end);
                prop_assert_eq!(&text[c.start..c.end], c.content.as_str());
            }
        }
    }
}
