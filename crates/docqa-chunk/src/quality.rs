//! Heuristic chunk quality scoring.

use std::collections::HashSet;

use docqa_core::QualityConfig;

use crate::structure::has_list_markers;

/// Scores chunk content in `[0, 1]` from length, structure, vocabulary and
/// lexical diversity.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: QualityConfig,
    keywords: Vec<String>,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        let keywords = config.keywords.iter().map(|k| k.to_lowercase()).collect();
        Self { config, keywords }
    }

    pub fn score(&self, content: &str) -> f32 {
        let c = &self.config;
        let mut score = c.base;

        let chars = content.chars().count();
        if (c.preferred_min_chars..=c.preferred_max_chars).contains(&chars) {
            score += c.length_bonus;
        }
        if chars < c.short_chars {
            score -= c.short_penalty;
        }

        if has_list_markers(content) {
            score += c.structure_bonus;
        }

        let lower = content.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            score += c.keyword_bonus;
        }

        let words: Vec<&str> = lower
            .split_whitespace()
            .map(|w| w.trim_matches(|ch: char| !ch.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() >= c.diversity_min_words {
            let unique: HashSet<&str> = words.iter().copied().collect();
            let diversity = unique.len() as f32 / words.len() as f32;
            if diversity >= c.diversity_threshold {
                score += c.diversity_bonus;
            }
        }

        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            c.base.clamp(0.0, 1.0)
        }
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}
