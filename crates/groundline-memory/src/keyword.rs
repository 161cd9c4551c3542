use groundline_core::text::{token_coverage, tokenize};

/// Score added per matched query token.
const MATCH_WEIGHT: f32 = 0.2;
/// Bonus when the whole query token sequence appears in the text.
const PHRASE_BONUS: f32 = 0.4;

/// A tokenized query for keyword (lexical) scoring.
///
/// The score of a text is
/// ```text
/// (0.2 * matches + 0.4 if the full token sequence occurs) * (matches / query_tokens)
/// ```
/// where a query token matches when it occurs anywhere in the lowercased
/// text, so "anxious" also matches "anxiousness". Scores are capped at 1.0.
#[derive(Debug, Clone)]
pub struct KeywordQuery {
    /// Distinct query tokens in first-seen order.
    tokens: Vec<String>,
    /// All query tokens joined by single spaces.
    phrase: String,
}

impl KeywordQuery {
    /// Tokenize a query string.
    pub fn new(query: &str) -> Self {
        let all = tokenize(query);
        let phrase = all.join(" ");
        let mut tokens: Vec<String> = Vec::with_capacity(all.len());
        for token in all {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Self { tokens, phrase }
    }

    /// `true` if the query has no scorable tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Distinct query tokens.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of query tokens found in `text`.
    pub fn match_count(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        self.tokens
            .iter()
            .filter(|t| lowered.contains(t.as_str()))
            .count()
    }

    /// Keyword score of `text` in `[0, 1]`; 0 when nothing matches.
    pub fn score(&self, text: &str) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let matches = self.match_count(text);
        if matches == 0 {
            return 0.0;
        }

        let mut score = MATCH_WEIGHT * matches as f32;
        if tokenize(text).join(" ").contains(&self.phrase) {
            score += PHRASE_BONUS;
        }
        let density = matches as f32 / self.tokens.len() as f32;
        (score * density).min(1.0)
    }
}

/// Fraction of the query's distinct tokens that also appear among the
/// text's tokens. Returns 0 when the query has no tokens.
pub fn lexical_overlap(query: &str, text: &str) -> f32 {
    token_coverage(query, text)
}
