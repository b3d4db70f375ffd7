//! Text helpers shared by the chunker, the indexes and the query engine.

/// Words dropped from keyword queries and keyword indexes.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "how", "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "such", "that",
    "the", "their", "then", "there", "these", "they", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "will", "with",
];

/// Rough token estimate: ~4 bytes per token, at least 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        ((text.len() + 3) / 4).max(1)
    }
}

/// Whether a lowercased term is a stop word.
pub fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.contains(&term)
}

/// Lowercase, split on non-alphanumeric characters, and drop stop words and
/// single-character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|t| !is_stop_word(t))
        .collect()
}

/// Normalize free text into a keyword query: distinct terms joined by spaces.
///
/// Returns `None` when nothing searchable is left.
pub fn keyword_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(text) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Cut `text` at the last whitespace boundary before `max_bytes`, falling back
/// to the last char boundary.
pub fn truncate_at_word(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    match text[..cut].rfind(char::is_whitespace) {
        Some(ws) if ws > 0 => text[..ws].trim_end(),
        _ => &text[..cut],
    }
}
