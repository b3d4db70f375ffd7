//! Structure detection: headings, paragraphs, sentences.
//!
//! Text is segmented into trimmed byte spans ("units"), each tagged with the
//! strength of the boundary that precedes it. The packer decides where chunks
//! may close from those strengths.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

/// Strength of the split point in front of a unit, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Boundary {
    /// Inside a sentence that had to be cut.
    Word,
    /// Between sentences of one paragraph.
    Sentence,
    /// Blank-line paragraph break.
    Paragraph,
    /// Heading or explicit step/chapter marker.
    Section,
}

/// A trimmed span of text with the boundary in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub start: usize,
    pub end: usize,
    pub boundary: Boundary,
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(step|chapter|section|part|phase|stage)\s+(\d+|[ivxlc]+)\b")
            .expect("valid regex")
    })
}

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)*[.)]?\s+\p{Lu}").expect("valid regex"))
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(step\s+\d+|\d+[.)]\s|[a-z][.)]\s|[-*•]\s)").expect("valid regex")
    })
}

const MAX_HEADING_CHARS: usize = 80;

/// Minor words allowed in lowercase inside a title-case heading.
const MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "in", "of", "on", "or", "the", "to", "with",
];

/// Whether a single line looks like a section heading.
pub fn is_heading(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() || t.chars().count() > MAX_HEADING_CHARS {
        return false;
    }
    if t.starts_with('#') {
        return true;
    }
    if marker_re().is_match(t) {
        return true;
    }

    let words: Vec<&str> = t.split_whitespace().collect();
    if t.ends_with(':') {
        return words.len() <= 10;
    }
    if t.ends_with(['.', '!', '?', ',', ';']) {
        return false;
    }
    if t.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return false;
    }
    if numbered_heading_re().is_match(t) {
        return words.len() <= 8;
    }
    if words.len() > 8 {
        return false;
    }

    let letters: Vec<char> = t.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.iter().all(|c| c.is_uppercase()) {
        return true;
    }

    words.iter().enumerate().all(|(i, w)| {
        let first = match w.chars().find(|c| c.is_alphanumeric()) {
            Some(c) => c,
            None => return true,
        };
        if !first.is_alphabetic() || first.is_uppercase() {
            return true;
        }
        i > 0 && MINOR_WORDS.contains(&w.to_lowercase().as_str())
    })
}

/// Heading text with markdown hashes and trailing colon removed.
pub fn heading_text(line: &str) -> String {
    let t = line.trim().trim_start_matches('#').trim();
    t.strip_suffix(':').unwrap_or(t).trim().to_string()
}

/// Whether any line starts with a step, numbered or bulleted list marker.
pub fn has_list_markers(text: &str) -> bool {
    text.lines().any(|l| list_item_re().is_match(l))
}

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> u32 {
        self.newlines.partition_point(|&nl| nl < offset) as u32 + 1
    }
}

/// Per-document analysis shared by every granularity level.
#[derive(Debug, Clone)]
pub struct DocumentStructure {
    pub lines: LineIndex,
    /// Heading lines as (line start offset, heading text), in order.
    pub headings: Vec<(usize, String)>,
    /// False when heading detection is implausible for this document.
    pub structure_ok: bool,
}

impl DocumentStructure {
    /// Share of non-blank lines that may look like headings before detection
    /// is considered unreliable.
    const MAX_HEADING_RATIO: f32 = 0.5;

    pub fn analyze(text: &str) -> Self {
        let mut headings = Vec::new();
        let mut non_blank = 0usize;

        for (offset, line) in lines_with_offsets(text, 0..text.len()) {
            if line.trim().is_empty() {
                continue;
            }
            non_blank += 1;
            if is_heading(line) {
                headings.push((offset, heading_text(line)));
            }
        }

        let structure_ok = non_blank < 4
            || (headings.len() as f32) <= non_blank as f32 * Self::MAX_HEADING_RATIO;
        if !structure_ok {
            headings.clear();
        }

        Self {
            lines: LineIndex::new(text),
            headings,
            structure_ok,
        }
    }

    /// Heading for the span starting at `start`: a heading among its first
    /// few lines, else the nearest preceding heading.
    pub fn heading_for(&self, text: &str, start: usize) -> Option<String> {
        if !self.structure_ok {
            return None;
        }
        let leading = text[start..]
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(3)
            .find(|l| is_heading(l));
        if let Some(line) = leading {
            return Some(heading_text(line));
        }
        let idx = self.headings.partition_point(|(off, _)| *off < start);
        if idx == 0 {
            None
        } else {
            Some(self.headings[idx - 1].1.clone())
        }
    }
}

/// Iterate lines in `range` with their absolute start offsets. Line text
/// excludes the newline.
pub fn lines_with_offsets(text: &str, range: Range<usize>) -> impl Iterator<Item = (usize, &str)> {
    let base = range.start;
    text[range]
        .split_inclusive('\n')
        .scan(base, |pos, raw| {
            let start = *pos;
            *pos += raw.len();
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            let line = line.strip_suffix('\r').unwrap_or(line);
            Some((start, line))
        })
}

/// Shrink a span to exclude surrounding whitespace.
pub fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some((start + lead, start + lead + trimmed.len()))
    }
}

/// Split `range` into units.
///
/// Blank lines separate paragraphs. With `preserve_structure`, heading lines
/// become their own units behind a [`Boundary::Section`]. Paragraph bodies are
/// split into sentences on `.`, `!`, `?` and on line breaks that start a list
/// item or follow terminal punctuation.
pub fn segment(text: &str, range: Range<usize>, preserve_structure: bool) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut para: Option<(usize, usize)> = None;
    let mut pending = Boundary::Section;

    for (offset, line) in lines_with_offsets(text, range.clone()) {
        let line_end = offset + line.len();
        if line.trim().is_empty() {
            if let Some((s, e)) = para.take() {
                split_sentences(text, s, e, pending, &mut units);
                pending = Boundary::Paragraph;
            }
            continue;
        }

        if preserve_structure && is_heading(line) {
            if let Some((s, e)) = para.take() {
                split_sentences(text, s, e, pending, &mut units);
            }
            if let Some((s, e)) = trim_span(text, offset, line_end) {
                units.push(Unit {
                    start: s,
                    end: e,
                    boundary: Boundary::Section,
                });
            }
            pending = Boundary::Sentence;
            continue;
        }

        para = match para {
            Some((s, _)) => Some((s, line_end)),
            None => Some((offset, line_end)),
        };
    }

    if let Some((s, e)) = para {
        split_sentences(text, s, e.min(range.end), pending, &mut units);
    }

    if let Some(first) = units.first_mut() {
        first.boundary = Boundary::Section;
    }
    units
}

/// Append the sentences of paragraph `[start, end)` to `out`.
fn split_sentences(text: &str, start: usize, end: usize, first: Boundary, out: &mut Vec<Unit>) {
    let body = &text[start..end];
    let mut boundary = first;
    let mut seg_start = 0usize;
    let mut chars = body.char_indices().peekable();

    let mut push = |s: usize, e: usize, boundary: &mut Boundary, out: &mut Vec<Unit>| {
        if let Some((ts, te)) = trim_span(text, start + s, start + e) {
            out.push(Unit {
                start: ts,
                end: te,
                boundary: *boundary,
            });
            *boundary = Boundary::Sentence;
        }
    };

    while let Some((i, c)) = chars.next() {
        match c {
            '.' | '!' | '?' => {
                // Swallow repeated terminators and closing quotes/brackets.
                let mut cut = i + c.len_utf8();
                while let Some(&(j, n)) = chars.peek() {
                    if matches!(n, '.' | '!' | '?' | '"' | '\'' | ')' | ']' | '”' | '’') {
                        cut = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let at_end = cut >= body.len();
                let before_space = body[cut..].starts_with(char::is_whitespace);
                if at_end || before_space {
                    push(seg_start, cut, &mut boundary, out);
                    seg_start = cut;
                }
            }
            '\n' => {
                let next_line = body[i + 1..].lines().next().unwrap_or("");
                let prev = body[seg_start..i].trim_end();
                if list_item_re().is_match(next_line) || prev.ends_with(':') {
                    push(seg_start, i, &mut boundary, out);
                    seg_start = i + 1;
                }
            }
            _ => {}
        }
    }
    push(seg_start, body.len(), &mut boundary, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans<'a>(text: &'a str, units: &[Unit]) -> Vec<&'a str> {
        units.iter().map(|u| &text[u.start..u.end]).collect()
    }

    #[test]
    fn test_heading_heuristics() {
        assert!(is_heading("Installation Guide"));
        assert!(is_heading("Safety precautions:"));
        assert!(is_heading("Step 3 Drain the tank"));
        assert!(is_heading("CHAPTER 2"));
        assert!(is_heading("## Setup"));
        assert!(is_heading("2.1 Water Storage"));
        assert!(is_heading("WARNINGS"));
        assert!(is_heading("Care of the Garden"));

        assert!(!is_heading("A."));
        assert!(!is_heading("B. C. D."));
        assert!(!is_heading("This sentence ends with a period."));
        assert!(!is_heading("the quick brown fox"));
        assert!(!is_heading(""));
        assert!(!is_heading(&"Long ".repeat(30)));
    }

    #[test]
    fn test_heading_text() {
        assert_eq!(heading_text("## Setup"), "Setup");
        assert_eq!(heading_text("Safety precautions:"), "Safety precautions");
    }

    #[test]
    fn test_list_markers() {
        assert!(has_list_markers("Do this:\n1. First\n2. Second"));
        assert!(has_list_markers("Step 1 open the valve"));
        assert!(has_list_markers("- bullet"));
        assert!(!has_list_markers("Plain prose without lists."));
    }

    #[test]
    fn test_line_index() {
        let idx = LineIndex::new("a\nb\n\nc");
        assert_eq!(idx.line_of(0), 1);
        assert_eq!(idx.line_of(2), 2);
        assert_eq!(idx.line_of(5), 4);
    }

    #[test]
    fn test_segment_paragraphs_and_sentences() {
        let text = "A.\n\nB. C. D.";
        let units = segment(text, 0..text.len(), true);
        assert_eq!(spans(text, &units), vec!["A.", "B.", "C.", "D."]);
        assert_eq!(units[0].boundary, Boundary::Section);
        assert_eq!(units[1].boundary, Boundary::Paragraph);
        assert_eq!(units[2].boundary, Boundary::Sentence);
    }

    #[test]
    fn test_segment_headings() {
        let text = "Intro text here.\n\nWater Storage\nKeep barrels sealed. Rotate yearly.\n";
        let units = segment(text, 0..text.len(), true);
        assert_eq!(
            spans(text, &units),
            vec![
                "Intro text here.",
                "Water Storage",
                "Keep barrels sealed.",
                "Rotate yearly."
            ]
        );
        assert_eq!(units[1].boundary, Boundary::Section);
        assert_eq!(units[2].boundary, Boundary::Sentence);

        let flat = segment(text, 0..text.len(), false);
        assert_eq!(flat[1].boundary, Boundary::Paragraph);
        assert_eq!(
            &text[flat[1].start..flat[1].end],
            "Water Storage\nKeep barrels sealed."
        );
    }

    #[test]
    fn test_segment_list_lines() {
        let text = "Do the following:\n1. Open valve\n2. Drain water";
        let units = segment(text, 0..text.len(), true);
        assert_eq!(
            spans(text, &units),
            vec!["Do the following:", "1. Open valve", "2. Drain water"]
        );
    }

    #[test]
    fn test_segment_keeps_decimals() {
        let text = "Mix 2.5 liters of water. Then wait.";
        let units = segment(text, 0..text.len(), false);
        assert_eq!(spans(text, &units), vec!["Mix 2.5 liters of water.", "Then wait."]);
    }

    #[test]
    fn test_segment_sub_range() {
        let text = "Skip me.\n\nKeep this. And this.";
        let start = text.find("Keep").unwrap();
        let units = segment(text, start..text.len(), true);
        assert_eq!(spans(text, &units), vec!["Keep this.", "And this."]);
        assert_eq!(units[0].boundary, Boundary::Section);
    }

    #[test]
    fn test_structure_degrades_on_heading_soup() {
        let text = "One Two\nThree Four\nFive Six\nSeven Eight\nnine ten eleven.";
        let structure = DocumentStructure::analyze(text);
        assert!(!structure.structure_ok);
        assert!(structure.headings.is_empty());
        assert_eq!(structure.heading_for(text, 0), None);
    }

    #[test]
    fn test_heading_inherited() {
        let text = "Water Storage\nKeep barrels sealed.\n\nRotate them every year.";
        let structure = DocumentStructure::analyze(text);
        let second = text.find("Rotate").unwrap();
        assert_eq!(structure.heading_for(text, 0).as_deref(), Some("Water Storage"));
        assert_eq!(
            structure.heading_for(text, second).as_deref(),
            Some("Water Storage")
        );
    }
}
