//! Text helpers shared by retrieval and verification.
//!
//! Every stage that compares text goes through these functions so that
//! "token" means the same thing in the keyword retriever, the reranker,
//! the claim verifier, and the hallucination detector.

use std::collections::HashSet;

/// Tokens shorter than this are dropped.
pub const MIN_TOKEN_LEN: usize = 3;

/// Characters kept by [`stem`].
pub const STEM_LEN: usize = 4;

/// Tokenize text: lowercase, split on non-word characters, drop tokens of
/// two characters or fewer. Order and duplicates are preserved.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Distinct tokens of `text`.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard overlap of the token sets of `a` and `b`, in `[0, 1]`.
///
/// Two texts without any tokens are considered unrelated (0.0).
pub fn token_overlap(a: &str, b: &str) -> f32 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count() as f32;
    let union = sa.union(&sb).count() as f32;
    intersection / union
}

/// Fraction of the distinct tokens of `part` that also occur in `whole`.
/// Returns 0 when `part` has no tokens.
pub fn token_coverage(part: &str, whole: &str) -> f32 {
    let p = token_set(part);
    if p.is_empty() {
        return 0.0;
    }
    let w = token_set(whole);
    p.intersection(&w).count() as f32 / p.len() as f32
}

/// Split text into sentences, keeping the terminal punctuation.
///
/// A sentence ends at a run of `.`, `!` or `?` followed by whitespace or the
/// end of input, or at a newline. Empty fragments are skipped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_trimmed(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '!' | '?' | '"' | '\'' | ')') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().map_or(true, |n| n.is_whitespace()) {
                push_trimmed(&mut sentences, &mut current);
            }
        }
    }
    push_trimmed(&mut sentences, &mut current);
    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Lowercase, strip punctuation, and collapse whitespace. Used to compare
/// sentences for exact repetition.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first four characters of a lowercased word, so that inflections
/// ("anxious", "anxiety") compare equal.
pub fn stem(word: &str) -> String {
    word.to_lowercase().chars().take(STEM_LEN).collect()
}

/// Rejoin sentences with single spaces.
pub fn join_sentences<S: AsRef<str>>(sentences: &[S]) -> String {
    sentences
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}
