//! Rule-based query expansion.
//!
//! Emotional-support conversations rarely use the same words as the
//! reference material ("anxious" vs "anxiety disorders"), so the expander
//! appends related clinical and everyday terms.

use std::collections::HashMap;

use groundline_core::text::tokenize;

/// Trait for expanding a query into several variants to improve recall.
pub trait QueryExpander: Send + Sync {
    /// Return the query variants to search. The first element is always the
    /// original query.
    fn expand(&self, query: &str) -> Vec<String>;
}

/// Synonym-table expander.
pub struct RuleBasedExpander {
    synonyms: HashMap<&'static str, &'static [&'static str]>,
    /// Maximum number of terms appended to the expanded variant.
    max_terms: usize,
}

impl RuleBasedExpander {
    /// Create an expander with the built-in table.
    pub fn new() -> Self {
        Self {
            synonyms: synonym_map(),
            max_terms: 8,
        }
    }

    /// Cap the number of appended terms. Chainable builder method.
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = max_terms;
        self
    }

    /// Related terms for the query, excluding terms already present.
    pub fn related_terms(&self, query: &str) -> Vec<&'static str> {
        let words = tokenize(query);
        let mut terms: Vec<&'static str> = Vec::new();
        for word in &words {
            if let Some(related) = self.synonyms.get(word.as_str()) {
                for term in *related {
                    if !words.iter().any(|w| w == term) && !terms.contains(term) {
                        terms.push(term);
                    }
                }
            }
        }
        terms.truncate(self.max_terms);
        terms
    }
}

impl Default for RuleBasedExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExpander for RuleBasedExpander {
    fn expand(&self, query: &str) -> Vec<String> {
        let terms = self.related_terms(query);
        if terms.is_empty() {
            return vec![query.to_string()];
        }
        vec![query.to_string(), format!("{query} {}", terms.join(" "))]
    }
}

fn synonym_map() -> HashMap<&'static str, &'static [&'static str]> {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("anxious", &["anxiety", "worry", "nervous", "panic"]);
    m.insert("anxiety", &["anxious", "worry", "panic"]);
    m.insert("worried", &["worry", "anxiety", "nervous"]);
    m.insert("panic", &["anxiety", "breathing", "attack"]);
    m.insert("sad", &["sadness", "depression", "low mood"]);
    m.insert("depressed", &["depression", "hopeless", "low mood"]);
    m.insert("hopeless", &["depression", "hopelessness", "despair"]);
    m.insert("stressed", &["stress", "pressure", "overwhelmed", "burnout"]);
    m.insert("stress", &["pressure", "overwhelmed", "coping"]);
    m.insert("overwhelmed", &["stress", "pressure", "burnout"]);
    m.insert("lonely", &["loneliness", "isolation", "connection"]);
    m.insert("angry", &["anger", "frustration", "irritable"]);
    m.insert("grief", &["loss", "bereavement", "mourning"]);
    m.insert("sleep", &["insomnia", "rest", "fatigue"]);
    m.insert("tired", &["fatigue", "exhaustion", "sleep"]);
    m.insert("exam", &["test", "study", "school"]);
    m.insert("exams", &["test", "study", "school"]);
    m.insert("job", &["work", "career", "unemployment"]);
    m.insert("work", &["job", "workplace", "career"]);
    m.insert("breakup", &["relationship", "heartbreak", "partner"]);
    m.insert("relationship", &["partner", "conflict", "communication"]);
    m.insert("drinking", &["alcohol", "substance", "addiction"]);
    m.insert("eating", &["food", "appetite", "body image"]);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_appends_related_terms() {
        let expander = RuleBasedExpander::new();
        let variants = expander.expand("feeling anxious about exams");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], "feeling anxious about exams");
        assert!(variants[1].contains("anxiety"));
        assert!(variants[1].contains("study"));
    }

    #[test]
    fn test_expand_without_matches_returns_original_only() {
        let expander = RuleBasedExpander::new();
        assert_eq!(expander.expand("hello there"), vec!["hello there".to_string()]);
    }

    #[test]
    fn test_related_terms_skip_existing_words() {
        let expander = RuleBasedExpander::new();
        let terms = expander.related_terms("anxious anxiety");
        assert!(!terms.contains(&"anxiety"));
        assert!(!terms.contains(&"anxious"));
        assert!(terms.contains(&"worry"));
    }

    #[test]
    fn test_max_terms() {
        let expander = RuleBasedExpander::new().with_max_terms(2);
        assert_eq!(expander.related_terms("stressed and sad").len(), 2);
    }
}
