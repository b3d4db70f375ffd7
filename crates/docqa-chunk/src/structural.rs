//! Structure-aware chunker.
//!
//! Packs structural units (headings, paragraphs, sentences) into chunks
//! between `min_tokens` and `max_tokens`, closing chunks at boundaries at
//! least as strong as the chunker's granularity allows.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use docqa_core::text::estimate_tokens;
use docqa_core::{ChunkConfig, ChunkData, Chunker, Granularity, QualityConfig, Result};
use tracing::debug;

use crate::quality::QualityScorer;
use crate::structure::{segment, Boundary, DocumentStructure, Unit};

/// Shared token counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Flat chunker emitting one granularity.
pub struct StructuralChunker {
    config: ChunkConfig,
    granularity: Granularity,
    quality: QualityScorer,
    token_counter: Option<TokenCounter>,
}

impl StructuralChunker {
    /// Create a paragraph-level chunker. Fails on invalid options.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            granularity: Granularity::Paragraph,
            quality: QualityScorer::default(),
            token_counter: None,
        })
    }

    /// Emit chunks tagged with `granularity`, closing them at the matching
    /// boundary strength.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Result<Self> {
        quality.validate()?;
        self.quality = QualityScorer::new(quality);
        Ok(self)
    }

    /// Use a custom token counter instead of the byte estimate.
    pub fn with_token_counter<F>(self, counter: F) -> Self
    where
        F: Fn(&str) -> usize + Send + Sync + 'static,
    {
        self.with_shared_counter(Arc::new(counter))
    }

    pub(crate) fn with_shared_counter(mut self, counter: TokenCounter) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn count_tokens(&self, text: &str) -> usize {
        match &self.token_counter {
            Some(counter) => counter(text),
            None => estimate_tokens(text),
        }
    }

    /// Weakest boundary at which a chunk may close once `min_tokens` is met.
    fn flush_at(&self) -> Boundary {
        match self.granularity {
            Granularity::Document | Granularity::Section => Boundary::Section,
            Granularity::Paragraph => Boundary::Paragraph,
            Granularity::Sentence => Boundary::Sentence,
        }
    }

    /// Chunk the trimmed `range` of `text`, attaching every chunk to `parent`.
    pub(crate) fn chunk_range(
        &self,
        text: &str,
        range: Range<usize>,
        structure: &DocumentStructure,
        parent: Option<usize>,
    ) -> Vec<ChunkData> {
        let preserve = self.config.preserve_structure && structure.structure_ok;
        let units = segment(text, range, preserve);
        let spans = self.pack(text, units);
        let spans = self.drop_near_empty(text, spans);

        spans
            .into_iter()
            .map(|(start, end)| {
                let content = &text[start..end];
                ChunkData {
                    content: content.to_string(),
                    token_count: self.count_tokens(content),
                    start,
                    end,
                    start_line: structure.lines.line_of(start),
                    end_line: structure.lines.line_of(end - 1),
                    granularity: self.granularity,
                    heading: structure.heading_for(text, start),
                    quality_score: self.quality.score(content),
                    parent,
                }
            })
            .collect()
    }

    /// Group units into chunk spans.
    fn pack(&self, text: &str, units: Vec<Unit>) -> Vec<(usize, usize)> {
        let max = self.config.max_tokens;
        let min = self.config.min_tokens;
        let flush_at = self.flush_at();
        let tokens = |s: usize, e: usize| self.count_tokens(&text[s..e]);

        let mut queue: VecDeque<Unit> = units
            .into_iter()
            .flat_map(|u| self.split_oversized(text, u))
            .collect();
        let mut out: Vec<(usize, usize)> = Vec::new();
        let mut cur: Vec<Unit> = Vec::new();
        // Leading units of `cur` carried over from the previous chunk.
        let mut carried = 0usize;

        while let Some(unit) = queue.pop_front() {
            let (cur_start, cur_end) = match (cur.first(), cur.last()) {
                (Some(f), Some(l)) => (f.start, l.end),
                _ => {
                    cur.push(unit);
                    continue;
                }
            };
            let fresh = cur.len() > carried;
            let cur_tokens = tokens(cur_start, cur_end);

            if fresh && unit.boundary >= flush_at && cur_tokens >= min {
                out.push((cur_start, cur_end));
                cur = vec![unit];
                carried = 0;
                continue;
            }

            if tokens(cur_start, unit.end) <= max {
                cur.push(unit);
                continue;
            }

            if !fresh {
                // Overlap plus the next unit does not fit: drop the overlap.
                cur = vec![unit];
                carried = 0;
                continue;
            }

            if cur_tokens < min {
                // Fill up to the maximum, cutting inside a word only when no
                // word boundary reaches the minimum.
                let fits = |e: usize| tokens(cur_start, e) <= max;
                let by_word = largest_fit(&word_ends(text, unit.start, unit.end), fits);
                let cut = match by_word {
                    Some(cut) if tokens(cur_start, cut) >= min => Some(cut),
                    _ => largest_fit(&char_ends(text, unit.start, unit.end), fits).or(by_word),
                };
                if let Some(cut) = cut {
                    out.push((cur_start, cut));
                    let rest = skip_whitespace(text, cut, unit.end);
                    if rest < unit.end {
                        queue.push_front(Unit {
                            start: rest,
                            end: unit.end,
                            boundary: Boundary::Word,
                        });
                    }
                    cur.clear();
                    carried = 0;
                    continue;
                }
            }

            out.push((cur_start, cur_end));
            let overlap = if unit.boundary < Boundary::Paragraph {
                self.overlap_tail(text, &cur)
            } else {
                Vec::new()
            };
            carried = overlap.len();
            cur = overlap;
            queue.push_front(unit);
        }

        if cur.len() > carried {
            if let (Some(f), Some(l)) = (cur.first(), cur.last()) {
                out.push((f.start, l.end));
            }
        }

        // Fold a short tail into its predecessor when the result still fits.
        if out.len() >= 2 {
            let (ls, le) = out[out.len() - 1];
            let (ps, _) = out[out.len() - 2];
            if tokens(ls, le) < min && tokens(ps, le) <= max {
                out.pop();
                let n = out.len();
                out[n - 1].1 = le;
            }
        }

        out
    }

    /// Trailing units of `cur` worth at most `overlap_tokens`, never the
    /// first unit and never reaching back past a paragraph start.
    fn overlap_tail(&self, text: &str, cur: &[Unit]) -> Vec<Unit> {
        let budget = self.config.overlap_tokens;
        let Some(last) = cur.last() else {
            return Vec::new();
        };
        if budget == 0 || cur.len() < 2 {
            return Vec::new();
        }

        let mut first = cur.len();
        for i in (1..cur.len()).rev() {
            if self.count_tokens(&text[cur[i].start..last.end]) > budget {
                break;
            }
            first = i;
            if cur[i].boundary >= Boundary::Paragraph {
                break;
            }
        }
        cur[first..].to_vec()
    }

    /// Split a unit above `max_tokens` at word ends, or at characters when a
    /// single word is too long.
    fn split_oversized(&self, text: &str, unit: Unit) -> Vec<Unit> {
        let max = self.config.max_tokens;
        let mut pieces = Vec::new();
        let mut start = unit.start;
        let mut boundary = unit.boundary;

        while start < unit.end {
            if self.count_tokens(&text[start..unit.end]) <= max {
                pieces.push(Unit {
                    start,
                    end: unit.end,
                    boundary,
                });
                break;
            }

            let fits = |e: usize| self.count_tokens(&text[start..e]) <= max;
            let ends = word_ends(text, start, unit.end);
            let cut = largest_fit(&ends, fits).unwrap_or_else(|| {
                let chars = char_ends(text, start, unit.end);
                // At least one character per piece.
                largest_fit(&chars, fits).unwrap_or(chars[0])
            });

            pieces.push(Unit {
                start,
                end: cut,
                boundary,
            });
            boundary = Boundary::Word;
            start = skip_whitespace(text, cut, unit.end);
        }

        if pieces.len() > 1 {
            debug!(
                "split oversized span at {} into {} pieces",
                unit.start,
                pieces.len()
            );
        }
        pieces
    }

    /// Merge spans with too few visible characters into their predecessor,
    /// or drop them.
    fn drop_near_empty(&self, text: &str, spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let min_chars = self.config.min_content_chars;
        let mut kept: Vec<(usize, usize)> = Vec::with_capacity(spans.len());

        for (start, end) in spans {
            let visible = text[start..end]
                .chars()
                .filter(|c| !c.is_whitespace())
                .count();
            if visible >= min_chars {
                kept.push((start, end));
                continue;
            }
            match kept.last_mut() {
                Some(prev)
                    if self.count_tokens(&text[prev.0..end]) <= self.config.max_tokens =>
                {
                    prev.1 = end;
                }
                _ => debug!("dropping near-empty span {}..{}", start, end),
            }
        }
        kept
    }
}

impl Chunker for StructuralChunker {
    fn chunk(&self, content: &str) -> Result<Vec<ChunkData>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let structure = DocumentStructure::analyze(content);
        let chunks = self.chunk_range(content, 0..content.len(), &structure, None);
        debug!("chunked {} bytes into {} chunks", content.len(), chunks.len());
        Ok(chunks)
    }

    fn granularities(&self) -> Vec<Granularity> {
        vec![self.granularity]
    }
}

/// Byte offsets just past each whitespace-separated word in `[start, end)`.
fn word_ends(text: &str, start: usize, end: usize) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (i, c) in text[start..end].char_indices() {
        if c.is_whitespace() {
            if in_word {
                ends.push(start + i);
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(end);
    }
    ends
}

/// Byte offsets just past each character in `[start, end)`.
fn char_ends(text: &str, start: usize, end: usize) -> Vec<usize> {
    text[start..end]
        .char_indices()
        .map(|(i, c)| start + i + c.len_utf8())
        .collect()
}

/// Largest candidate satisfying a predicate that holds for a prefix of the
/// ascending candidates.
fn largest_fit(candidates: &[usize], fits: impl Fn(usize) -> bool) -> Option<usize> {
    let n = candidates.partition_point(|&c| fits(c));
    n.checked_sub(1).map(|i| candidates[i])
}

fn skip_whitespace(text: &str, from: usize, end: usize) -> usize {
    let rest = &text[from..end];
    from + (rest.len() - rest.trim_start().len())
}
