//! Weighted score fusion for combining vector and keyword results.

use std::collections::HashMap;

use ulid::Ulid;

use docqa_core::{FusionConfig, MatchSource};

/// A chunk id with the signals that found it and its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub chunk_id: Ulid,
    pub similarity: Option<f32>,
    pub keyword_score: Option<f32>,
    pub combined: f32,
    pub source: MatchSource,
}

/// Scale keyword ranks into [0, 1] by the best rank in the batch.
///
/// When no rank is positive every hit gets 1.0.
pub fn normalize_keyword_scores(hits: Vec<(Ulid, f32)>) -> Vec<(Ulid, f32)> {
    let max = hits
        .iter()
        .map(|(_, r)| *r)
        .filter(|r| r.is_finite())
        .fold(0.0f32, f32::max);

    hits.into_iter()
        .map(|(id, r)| {
            let score = if max > 0.0 && r.is_finite() {
                (r / max).clamp(0.0, 1.0)
            } else {
                1.0
            };
            (id, score)
        })
        .collect()
}

/// Fuse vector similarities and normalized keyword scores by chunk id.
///
/// A chunk found by both sources scores the weighted mean of its two signals
/// plus `agreement_bonus`; a chunk found by one source scores that signal
/// times `single_source_penalty`. Scores are clamped to [0, 1]. Output is in
/// no particular order.
pub fn fuse(
    vector: &[(Ulid, f32)],
    keyword: &[(Ulid, f32)],
    config: &FusionConfig,
) -> Vec<Fused> {
    let mut signals: HashMap<Ulid, (Option<f32>, Option<f32>)> = HashMap::new();
    for (id, sim) in vector {
        let entry = signals.entry(*id).or_default();
        entry.0 = Some(entry.0.map_or(*sim, |s| s.max(*sim)));
    }
    for (id, kw) in keyword {
        let entry = signals.entry(*id).or_default();
        entry.1 = Some(entry.1.map_or(*kw, |s| s.max(*kw)));
    }

    let total = config.vector_weight + config.keyword_weight;
    let (wv, wk) = if total > 0.0 {
        (config.vector_weight / total, config.keyword_weight / total)
    } else {
        (0.5, 0.5)
    };

    signals
        .into_iter()
        .filter_map(|(chunk_id, (similarity, keyword_score))| {
            let (raw, source) = match (similarity, keyword_score) {
                (Some(s), Some(k)) => (wv * s + wk * k + config.agreement_bonus, MatchSource::Both),
                (Some(s), None) => (s * config.single_source_penalty, MatchSource::Vector),
                (None, Some(k)) => (k * config.single_source_penalty, MatchSource::Keyword),
                (None, None) => return None,
            };
            let combined = if raw.is_finite() {
                raw.clamp(0.0, 1.0)
            } else {
                0.0
            };
            Some(Fused {
                chunk_id,
                similarity,
                keyword_score,
                combined,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ulid(s: &str) -> Ulid {
        // Create deterministic ULIDs from strings for testing
        let hash = s
            .bytes()
            .fold(0u128, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u128));
        Ulid::from(hash)
    }

    fn find(fused: &[Fused], id: Ulid) -> &Fused {
        fused.iter().find(|f| f.chunk_id == id).unwrap()
    }

    #[test]
    fn test_normalize_by_batch_max() {
        let hits = vec![(ulid("a"), 4.0), (ulid("b"), 2.0), (ulid("c"), 1.0)];
        let normalized = normalize_keyword_scores(hits);
        assert_eq!(normalized[0].1, 1.0);
        assert_eq!(normalized[1].1, 0.5);
        assert_eq!(normalized[2].1, 0.25);
    }

    #[test]
    fn test_normalize_without_positive_rank() {
        let normalized = normalize_keyword_scores(vec![(ulid("a"), 0.0), (ulid("b"), -3.0)]);
        assert!(normalized.iter().all(|(_, s)| *s == 1.0));
        assert!(normalize_keyword_scores(Vec::new()).is_empty());
    }

    #[test]
    fn test_fuse_both_sources() {
        let config = FusionConfig::default();
        let fused = fuse(&[(ulid("a"), 0.8)], &[(ulid("a"), 1.0)], &config);
        assert_eq!(fused.len(), 1);
        let a = &fused[0];
        assert_eq!(a.source, MatchSource::Both);
        let expected = 0.7 * 0.8 + 0.3 * 1.0 + 0.1;
        assert!((a.combined - expected).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_single_sources_penalized() {
        let config = FusionConfig::default();
        let fused = fuse(&[(ulid("v"), 0.9)], &[(ulid("k"), 0.5)], &config);
        assert_eq!(fused.len(), 2);

        let v = find(&fused, ulid("v"));
        assert_eq!(v.source, MatchSource::Vector);
        assert!((v.combined - 0.72).abs() < 1e-6);
        assert_eq!(v.keyword_score, None);

        let k = find(&fused, ulid("k"));
        assert_eq!(k.source, MatchSource::Keyword);
        assert!((k.combined - 0.4).abs() < 1e-6);
        assert_eq!(k.similarity, None);
    }

    #[test]
    fn test_fuse_weights_normalized_and_clamped() {
        let config = FusionConfig {
            vector_weight: 7.0,
            keyword_weight: 3.0,
            agreement_bonus: 0.5,
            single_source_penalty: 0.8,
        };
        let fused = fuse(&[(ulid("a"), 1.0)], &[(ulid("a"), 1.0)], &config);
        assert_eq!(fused[0].combined, 1.0);

        let fused = fuse(&[(ulid("b"), 0.2)], &[(ulid("b"), 0.2)], &config);
        assert!((fused[0].combined - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_empty() {
        assert!(fuse(&[], &[], &FusionConfig::default()).is_empty());
    }
}
