//! Confidence scoring for retrieved context.

use docqa_core::{Assessment, ConfidenceConfig, ConfidenceRecord, MatchSource, Result, RetrievalResult};

/// Scores a result set from its top score, score spread and source agreement.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Summarize a result set.
    ///
    /// The spread compares the best score with the `top_k`-th best (or the
    /// last one when fewer results exist). Confidence never exceeds the top
    /// score.
    pub fn score(&self, results: &[RetrievalResult]) -> ConfidenceRecord {
        if results.is_empty() {
            return ConfidenceRecord {
                confidence: self.config.empty_floor,
                top_score: 0.0,
                score_spread: 0.0,
                source_agreement: 0.0,
                result_count: 0,
            };
        }

        let mut scores: Vec<f32> = results
            .iter()
            .map(|r| sanitize(r.combined_score))
            .collect();
        scores.sort_by(|a, b| b.total_cmp(a));

        let top = scores[0];
        let kth = scores[self.config.top_k.min(scores.len()) - 1];
        let spread = (top - kth).max(0.0);
        let spread_signal = (spread / self.config.spread_saturation).min(1.0);

        let agreeing = results
            .iter()
            .filter(|r| r.source == MatchSource::Both)
            .count();
        let agreement = agreeing as f32 / results.len() as f32;

        let c = &self.config;
        let total = c.top_weight + c.spread_weight + c.agreement_weight;
        let weighted =
            (c.top_weight * top + c.spread_weight * spread_signal + c.agreement_weight * agreement)
                / total;
        let confidence = sanitize(weighted).min(top);

        ConfidenceRecord {
            confidence,
            top_score: top,
            score_spread: spread,
            source_agreement: agreement,
            result_count: results.len(),
        }
    }

    /// Map a confidence value to a caller decision.
    pub fn assess(&self, confidence: f32) -> Assessment {
        if confidence >= self.config.answer_threshold {
            Assessment::Answer
        } else if confidence >= self.config.hedge_threshold {
            Assessment::Hedge
        } else {
            Assessment::Decline
        }
    }
}

fn sanitize(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
