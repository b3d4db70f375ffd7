//! Result ordering and redundancy removal.

use std::cmp::Ordering;

use tracing::debug;

use docqa_core::{Chunk, RetrievalResult};

/// Float slack when comparing a score gap against the dedup margin.
const MARGIN_EPSILON: f32 = 1e-6;

/// Total order over results: combined score descending, then quality
/// descending when `rerank` is set, then ordinal, document id and chunk id
/// ascending.
pub fn compare_results(a: &RetrievalResult, b: &RetrievalResult, rerank: bool) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| {
            if rerank {
                b.chunk.quality_score.total_cmp(&a.chunk.quality_score)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.doc_id.cmp(&b.chunk.doc_id))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Whether two chunks of the same document version carry redundant text:
/// overlapping spans at different granularities, or neighbouring siblings
/// under one parent.
pub fn conflicts(a: &Chunk, b: &Chunk) -> bool {
    if a.id == b.id || a.doc_id != b.doc_id || a.version != b.version {
        return false;
    }
    if a.granularity != b.granularity && a.overlaps(b) {
        return true;
    }
    a.parent_id.is_some()
        && a.parent_id == b.parent_id
        && (a.next_id == Some(b.id) || b.next_id == Some(a.id))
}

/// Walk ranked results and drop each one that conflicts with an already
/// kept result scoring within `margin` of it.
pub fn dedup(ranked: Vec<RetrievalResult>, margin: f32) -> Vec<RetrievalResult> {
    let mut kept: Vec<RetrievalResult> = Vec::with_capacity(ranked.len());
    for result in ranked {
        let redundant = kept.iter().any(|k| {
            (k.combined_score - result.combined_score).abs() <= margin + MARGIN_EPSILON
                && conflicts(&k.chunk, &result.chunk)
        });
        if redundant {
            debug!("Dropping redundant chunk {}", result.chunk.id);
            continue;
        }
        kept.push(result);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{Granularity, MatchSource};
    use ulid::Ulid;

    fn chunk(doc_id: Ulid, index: u32, granularity: Granularity, span: (u32, u32)) -> Chunk {
        Chunk {
            id: Ulid::new(),
            doc_id,
            version: 1,
            chunk_index: index,
            granularity,
            content: "text".to_string(),
            token_count: 1,
            char_count: 4,
            word_count: 1,
            heading: None,
            quality_score: 0.5,
            embedding: None,
            parent_id: None,
            prev_id: None,
            next_id: None,
            start_offset: span.0,
            end_offset: span.1,
            start_line: 1,
            end_line: 1,
            content_hash: None,
        }
    }

    fn result(chunk: Chunk, score: f32) -> RetrievalResult {
        RetrievalResult {
            rank: 0,
            chunk,
            similarity: Some(score),
            keyword_score: None,
            combined_score: score,
            source: MatchSource::Vector,
        }
    }

    fn sorted(mut results: Vec<RetrievalResult>, rerank: bool) -> Vec<Ulid> {
        results.sort_by(|a, b| compare_results(a, b, rerank));
        results.iter().map(|r| r.chunk.id).collect()
    }

    #[test]
    fn test_order_independent_of_input() {
        let doc = Ulid::new();
        let results: Vec<RetrievalResult> = (0..6)
            .map(|i| result(chunk(doc, i, Granularity::Paragraph, (0, 1)), 0.5))
            .collect();
        let forward = sorted(results.clone(), true);
        let mut reversed_input = results.clone();
        reversed_input.reverse();
        assert_eq!(forward, sorted(reversed_input, true));
        // Equal scores fall back to ordinal order.
        let ids: Vec<Ulid> = results.iter().map(|r| r.chunk.id).collect();
        assert_eq!(forward, ids);
    }

    #[test]
    fn test_quality_breaks_ties_only_when_reranking() {
        let doc = Ulid::new();
        let mut low = chunk(doc, 0, Granularity::Paragraph, (0, 1));
        low.quality_score = 0.2;
        let mut high = chunk(doc, 1, Granularity::Paragraph, (1, 2));
        high.quality_score = 0.9;
        let (low_id, high_id) = (low.id, high.id);
        let results = vec![result(low, 0.5), result(high, 0.5)];

        assert_eq!(sorted(results.clone(), true), vec![high_id, low_id]);
        assert_eq!(sorted(results, false), vec![low_id, high_id]);
    }

    #[test]
    fn test_conflicts() {
        let doc = Ulid::new();
        let para = chunk(doc, 0, Granularity::Paragraph, (0, 100));
        let sentence = chunk(doc, 0, Granularity::Sentence, (10, 40));
        let elsewhere = chunk(doc, 1, Granularity::Sentence, (200, 240));
        assert!(conflicts(&para, &sentence));
        assert!(!conflicts(&para, &elsewhere));

        let flat_a = chunk(doc, 0, Granularity::Paragraph, (0, 50));
        let mut flat_b = chunk(doc, 1, Granularity::Paragraph, (40, 90));
        flat_b.prev_id = Some(flat_a.id);
        assert!(!conflicts(&flat_a, &flat_b), "flat chunks never conflict");

        let parent = Ulid::new();
        let mut left = chunk(doc, 0, Granularity::Sentence, (0, 10));
        let mut right = chunk(doc, 1, Granularity::Sentence, (11, 20));
        left.parent_id = Some(parent);
        right.parent_id = Some(parent);
        left.next_id = Some(right.id);
        right.prev_id = Some(left.id);
        assert!(conflicts(&left, &right));
        assert!(conflicts(&right, &left));

        let mut other_version = sentence.clone();
        other_version.id = Ulid::new();
        other_version.version = 2;
        assert!(!conflicts(&para, &other_version));
    }

    #[test]
    fn test_dedup_respects_margin() {
        let doc = Ulid::new();
        let para = chunk(doc, 0, Granularity::Paragraph, (0, 100));
        let close = chunk(doc, 0, Granularity::Sentence, (0, 30));
        let far = chunk(doc, 1, Granularity::Sentence, (30, 60));
        let (para_id, far_id) = (para.id, far.id);

        let kept = dedup(
            vec![result(para, 0.80), result(close, 0.77), result(far, 0.50)],
            0.05,
        );
        let ids: Vec<Ulid> = kept.iter().map(|r| r.chunk.id).collect();
        assert_eq!(ids, vec![para_id, far_id]);
    }
}
