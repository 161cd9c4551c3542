//! Ordered pattern tables and the generic matcher that evaluates them.
//!
//! Every heuristic the verifier, detector and corrector rely on is a row
//! `{pattern, category, severity}` in one of the tables below. Tables are
//! compiled once on first use; a row whose pattern fails to compile is
//! skipped with a warning and the rest of the table keeps working.

use std::sync::LazyLock;

use groundline_core::Severity;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One uncompiled table row.
#[derive(Debug, Clone, Copy)]
pub struct PatternRule<C: 'static> {
    pub pattern: &'static str,
    pub category: C,
    pub severity: Severity,
}

const fn rule<C>(pattern: &'static str, category: C, severity: Severity) -> PatternRule<C> {
    PatternRule {
        pattern,
        category,
        severity,
    }
}

/// A match of one table row against a text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternMatch<'t, C> {
    pub category: C,
    pub severity: Severity,
    /// The whole matched span.
    pub text: &'t str,
    /// First capture group, when the row defines one and it participated.
    pub capture: Option<&'t str>,
    pub start: usize,
    pub end: usize,
    /// Index of the row in its table; earlier rows win ties.
    pub rule_index: usize,
}

/// A compiled, ordered pattern table.
pub struct PatternTable<C: 'static> {
    name: &'static str,
    rules: Vec<(usize, Regex, PatternRule<C>)>,
}

impl<C: Copy> PatternTable<C> {
    /// Compile `rules` in order, skipping rows that fail to compile.
    pub fn compile(name: &'static str, rules: &[PatternRule<C>]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            match Regex::new(rule.pattern) {
                Ok(re) => compiled.push((index, re, *rule)),
                Err(e) => warn!(
                    table = name,
                    pattern = rule.pattern,
                    error = %e,
                    "Skipping invalid pattern"
                ),
            }
        }
        Self {
            name,
            rules: compiled,
        }
    }

    /// Table name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of usable rows.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` if no row compiled.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every match of every row, ordered by position and then row order.
    pub fn find_all<'t>(&self, text: &'t str) -> Vec<PatternMatch<'t, C>> {
        let mut matches = Vec::new();
        for (index, re, rule) in &self.rules {
            for caps in re.captures_iter(text) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                matches.push(PatternMatch {
                    category: rule.category,
                    severity: rule.severity,
                    text: whole.as_str(),
                    capture: caps.get(1).as_ref().map(regex::Match::as_str),
                    start: whole.start(),
                    end: whole.end(),
                    rule_index: *index,
                });
            }
        }
        matches.sort_by_key(|m| (m.start, m.rule_index));
        matches
    }

    /// Like [`PatternTable::find_all`] but drops matches overlapping an
    /// earlier kept match.
    pub fn find_disjoint<'t>(&self, text: &'t str) -> Vec<PatternMatch<'t, C>> {
        let mut kept: Vec<PatternMatch<'t, C>> = Vec::new();
        for m in self.find_all(text) {
            if kept.last().map_or(true, |last| m.start >= last.end) {
                kept.push(m);
            }
        }
        kept
    }

    /// The first row (in table order) that matches, at its first position.
    pub fn first<'t>(&self, text: &'t str) -> Option<PatternMatch<'t, C>> {
        self.rules.iter().find_map(|(index, re, rule)| {
            let caps = re.captures(text)?;
            let whole = caps.get(0)?;
            Some(PatternMatch {
                category: rule.category,
                severity: rule.severity,
                text: whole.as_str(),
                capture: caps.get(1).as_ref().map(regex::Match::as_str),
                start: whole.start(),
                end: whole.end(),
                rule_index: *index,
            })
        })
    }

    /// `true` if any row matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.rules.iter().any(|(_, re, _)| re.is_match(text))
    }

    /// Distinct categories matched in `text`, in table order.
    pub fn categories(&self, text: &str) -> Vec<C>
    where
        C: PartialEq,
    {
        let mut found: Vec<C> = Vec::new();
        for (_, re, rule) in &self.rules {
            if !found.contains(&rule.category) && re.is_match(text) {
                found.push(rule.category);
            }
        }
        found
    }
}

// --- Categories ---

/// How a reply claims to remember something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCue {
    /// "I remember ..."
    Recall,
    /// "you mentioned / said / told me ..."
    Quote,
    /// "we discussed ..."
    Discussed,
}

/// Emotional polarity of a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    /// The other polarity.
    pub fn opposite(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

/// Crisis topic requiring a dedicated safety protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisCategory {
    Suicide,
    SelfHarm,
    EatingDisorder,
    Substance,
}

impl std::fmt::Display for CrisisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrisisCategory::Suicide => "suicide",
            CrisisCategory::SelfHarm => "self-harm",
            CrisisCategory::EatingDisorder => "eating disorder",
            CrisisCategory::Substance => "substance use",
        };
        f.write_str(s)
    }
}

/// Kind of concrete detail a reply may introduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Date,
    Number,
    Name,
}

// --- Tables ---

use Severity::{Critical, High, Low, Medium};

/// Phrases claiming shared history. Group 1 is the remembered content.
pub static MEMORY_REFERENCES: LazyLock<PatternTable<MemoryCue>> = LazyLock::new(|| {
    PatternTable::compile(
        "memory_references",
        &[
            rule(
                r"(?i)\bI (?:remember|recall)(?: that| when| how)?\s+([^.!?,;\n]+)",
                MemoryCue::Recall,
                High,
            ),
            rule(
                r"(?i)\byou(?:'ve| have)? (?:mentioned|said|told me|shared)(?: that| about)?\s+([^.!?,;\n]+)",
                MemoryCue::Quote,
                High,
            ),
            rule(
                r"(?i)\bwe (?:discussed|talked about|spoke about)\s+([^.!?,;\n]+)",
                MemoryCue::Discussed,
                High,
            ),
        ],
    )
});

/// Phrases implying an earlier session.
pub static CONTINUITY_CUES: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "continuity_cues",
        &[
            rule(
                r"(?i)\bas we (?:discussed|talked about|covered|said)(?: before| earlier| previously| last time)?",
                (),
                High,
            ),
            rule(
                r"(?i)\b(?:like|as) (?:I|we) (?:said|mentioned) (?:before|earlier|last time)",
                (),
                High,
            ),
            rule(
                r"(?i)\bin our (?:previous|last|earlier) (?:session|conversation|chat|talk)s?",
                (),
                High,
            ),
            rule(r"(?i)\blast time(?: we (?:talked|spoke|met|chatted))?", (), High),
            rule(r"(?i)\blast week", (), High),
            rule(r"(?i)\bwhen we (?:last )?(?:talked|spoke|met)", (), High),
            rule(r"(?i)\bpicking up where we left off", (), High),
        ],
    )
});

/// Crisis vocabulary by category.
pub static CRISIS_TERMS: LazyLock<PatternTable<CrisisCategory>> = LazyLock::new(|| {
    PatternTable::compile(
        "crisis_terms",
        &[
            rule(
                r"(?i)\b(?:suicid\w*|kill (?:myself|yourself)|end (?:my|your) life|want(?:ed)? to die|better off dead)",
                CrisisCategory::Suicide,
                Critical,
            ),
            rule(
                r"(?i)\b(?:self[- ]harm\w*|cutting (?:myself|yourself)|hurt(?:ing)? (?:myself|yourself)|burn(?:ing)? (?:myself|yourself))",
                CrisisCategory::SelfHarm,
                Critical,
            ),
            rule(
                r"(?i)\b(?:anorexi\w*|bulimi\w*|binge\w*|purg(?:e|ing)|eating disorder\w*|starv(?:e|ing) (?:myself|yourself))",
                CrisisCategory::EatingDisorder,
                Critical,
            ),
            rule(
                r"(?i)\b(?:overdos\w*|relaps\w*|addict\w*|alcoholi\w*|drinking problem|substance use|using drugs)",
                CrisisCategory::Substance,
                Critical,
            ),
        ],
    )
});

/// Casual, social vocabulary that must not share a reply with crisis talk.
pub static CASUAL_TERMS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "casual_terms",
        &[rule(
            r"(?i)\b(?:restaurants?|bars?|pubs?|nightclubs?|part(?:y|ies)|concerts?|festivals?|recipes?|cocktails?|brunch|happy hour|movie night|vacation|shopping|dessert)\b",
            (),
            Critical,
        )],
    )
});

/// Explicit statements of a depressed state.
pub static DEPRESSED_STATE: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "depressed_state",
        &[rule(
            r"(?i)\b(?:depress\w*|hopeless\w*|worthless|empty inside|can'?t go on|no point in (?:anything|living|trying)|miserable|numb)\b",
            (),
            Critical,
        )],
    )
});

/// Reply phrases that deny or brush off a negative state.
pub static DISMISSALS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "dismissals",
        &[
            rule(
                r"(?i)\byou(?:'re| are| seem| sound| look)(?: so| really| very)? (?:happy|great|fine|cheerful|upbeat|excited|positive|okay)\b",
                (),
                Critical,
            ),
            rule(
                r"(?i)\bglad (?:you're|you are|to hear you're) (?:doing )?(?:well|good|great|better)\b",
                (),
                Critical,
            ),
            rule(r"(?i)\bcheer up\b", (), Critical),
            rule(r"(?i)\b(?:it's|it is) not that bad\b", (), Critical),
            rule(r"(?i)\blook on the bright side\b", (), Critical),
            rule(r"(?i)\bjust (?:be|think|stay) positive\b", (), Critical),
        ],
    )
});

/// Reply phrases that acknowledge distress or offer support.
pub static ACKNOWLEDGEMENTS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "acknowledgements",
        &[
            rule(
                r"(?i)\b(?:sounds?|seems?|must be|must feel) (?:really |so |very |incredibly )?(?:hard|difficult|tough|painful|heavy|rough|exhausting|overwhelming|awful)\b",
                (),
                Low,
            ),
            rule(r"(?i)\bi'?m (?:so |really |very )?sorry\b", (), Low),
            rule(r"(?i)\b(?:that'?s|that is) a lot\b|\bcarrying a lot\b", (), Low),
            rule(
                r"(?i)\b(?:i'?m|i am) here (?:for|with) you\b|\byou'?re not alone\b|\byou are not alone\b",
                (),
                Low,
            ),
            rule(r"(?i)\bi hear you\b|\bmakes sense (?:that|to) (?:you )?feel\b", (), Low),
        ],
    )
});

/// Emotion vocabulary by polarity.
pub static EMOTION_WORDS: LazyLock<PatternTable<Polarity>> = LazyLock::new(|| {
    PatternTable::compile(
        "emotion_words",
        &[
            rule(
                r"(?i)\b(?:happy|happier|glad|excited|joyful|cheerful|great|relieved|proud|calm|content|hopeful|grateful|upbeat)\b",
                Polarity::Positive,
                High,
            ),
            rule(
                r"(?i)\b(?:sad|sadness|anxious|anxiety|angry|upset|depressed|stressed|worried|scared|afraid|lonely|frustrated|overwhelmed|hopeless|nervous|miserable|hurt|grieving|exhausted|tired)\b",
                Polarity::Negative,
                High,
            ),
        ],
    )
});

/// The reply telling the user how they feel. Group 1 is the state word.
pub static FEELING_ATTRIBUTIONS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "feeling_attributions",
        &[rule(
            r"(?i)\byou(?:'re feeling| are feeling|'re| are| seem| sound| look| must be| must feel| feel)(?: so| really| very| quite| a bit| a little)? (\w+)",
            (),
            High,
        )],
    )
});

/// The reply quoting the user. Group 1 is the quoted content.
pub static QUOTE_ATTRIBUTIONS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "quote_attributions",
        &[rule(
            r"(?i)\byou (?:said|mentioned|told me)(?: about| that)?\s*([^.!?,;\n]*)",
            (),
            Medium,
        )],
    )
});

/// Language that makes a sentence a claim about the user.
pub static USER_REFERENCES: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "user_references",
        &[
            rule(
                r"(?i)\b(?:you|your|you're|yours|yourself|you've|you'll|you'd)\b",
                (),
                Low,
            ),
            rule(
                r"(?i)\b(?:feel\w*|felt|going through|experienc\w*|struggl\w*|dealing with|coping)\b",
                (),
                Low,
            ),
        ],
    )
});

/// Concrete details a reply could invent.
pub static ENTITIES: LazyLock<PatternTable<EntityKind>> = LazyLock::new(|| {
    PatternTable::compile(
        "entities",
        &[
            rule(
                r"\b(?:\d{1,2}[/-]\d{1,2}(?:[/-]\d{2,4})?|(?:January|February|March|April|May|June|July|August|September|October|November|December) \d{1,2}(?:st|nd|rd|th)?|(?:Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday))\b",
                EntityKind::Date,
                Low,
            ),
            rule(r"\b\d+(?:[.,]\d+)?%?", EntityKind::Number, Low),
            rule(
                r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b",
                EntityKind::Name,
                Low,
            ),
        ],
    )
});

/// Rewrites of memory phrasing into present-tense phrasing. The category
/// is the replacement text.
pub static MEMORY_REWRITES: LazyLock<PatternTable<&'static str>> = LazyLock::new(|| {
    PatternTable::compile(
        "memory_rewrites",
        &[
            rule(
                r"(?i)\bI (?:remember|recall)(?: that)? you(?:'ve| have)? (?:told me|mentioned|said|shared)(?: that)? about\b",
                "if you're dealing with",
                Medium,
            ),
            rule(
                r"(?i)\bI (?:remember|recall)(?: that)? you(?:'ve| have)? (?:told me|mentioned|said|shared)(?: that)?",
                "it sounds like",
                Medium,
            ),
            rule(
                r"(?i)\bI (?:remember|recall)(?: that| when| how)?",
                "it sounds like",
                Medium,
            ),
            rule(
                r"(?i)\byou(?:'ve| have)? (?:told me|mentioned|said|shared) about\b",
                "if you're dealing with",
                Medium,
            ),
            rule(
                r"(?i)\byou(?:'ve| have)? (?:told me|mentioned|said|shared)(?: that)?",
                "it sounds like",
                Medium,
            ),
            rule(
                r"(?i)\bwe (?:discussed|talked about|spoke about)",
                "we're talking about",
                Medium,
            ),
        ],
    )
});

/// Hedged replacements for quote language.
pub static QUOTE_HEDGES: LazyLock<PatternTable<&'static str>> = LazyLock::new(|| {
    PatternTable::compile(
        "quote_hedges",
        &[
            rule(
                r"(?i)\byou (?:said|mentioned|told me) about\b",
                "you may have indicated something about",
                Medium,
            ),
            rule(
                r"(?i)\byou (?:said|mentioned|told me)(?: that)?",
                "you may have indicated",
                Medium,
            ),
        ],
    )
});

/// Hedged replacement for feeling language.
pub static FEELING_HEDGES: LazyLock<PatternTable<&'static str>> = LazyLock::new(|| {
    PatternTable::compile(
        "feeling_hedges",
        &[rule(
            r"(?i)\byou(?:'re feeling| are feeling|'re| are| seem| sound| look| must be| must feel| feel)\b",
            "you might be feeling",
            Medium,
        )],
    )
});

/// Reporting verbs in front of remembered content ("you told me about").
pub static MEMORY_LEAD_INS: LazyLock<PatternTable<()>> = LazyLock::new(|| {
    PatternTable::compile(
        "memory_lead_ins",
        &[rule(
            r"(?i)^\s*(?:that |how |when )?(?:(?:you(?:'ve| have)?|we) (?:told me|mentioned|said|shared|discussed|talked about|spoke about)\s*)?(?:that |about |how )?",
            (),
            Low,
        )],
    )
});

// --- Helpers ---

/// Polarity of an emotion word, if it is one.
pub fn polarity_of(word: &str) -> Option<Polarity> {
    EMOTION_WORDS.first(word).map(|m| m.category)
}

/// Emotion polarities expressed in `text`, ignoring negated words
/// ("not happy").
pub fn expressed_polarities(text: &str) -> Vec<Polarity> {
    let mut found = Vec::new();
    for m in EMOTION_WORDS.find_all(text) {
        if !is_negated(text, m.start) && !found.contains(&m.category) {
            found.push(m.category);
        }
    }
    found
}

/// `true` if one of the two words before `pos` is a negation.
pub fn is_negated(text: &str, pos: usize) -> bool {
    let before = text.get(..pos).unwrap_or("").to_lowercase();
    before
        .split_whitespace()
        .rev()
        .take(2)
        .any(|w| matches!(w, "not" | "never" | "no") || w.ends_with("n't"))
}

/// Replace `text[start..end]` with `replacement`, carrying over the case of
/// the replaced span's first letter.
pub fn replace_span(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let original = text.get(start..end).unwrap_or("");
    let replacement = match_case(original, replacement);
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(text.get(..start).unwrap_or(""));
    out.push_str(&replacement);
    out.push_str(text.get(end..).unwrap_or(""));
    out
}

fn match_case(original: &str, replacement: &str) -> String {
    let Some(first) = original.chars().next() else {
        return replacement.to_string();
    };
    let mut chars = replacement.chars();
    match chars.next() {
        Some(r) if first.is_uppercase() => r.to_uppercase().chain(chars).collect(),
        Some(r) if first.is_lowercase() && !replacement.starts_with("I ") => {
            r.to_lowercase().chain(chars).collect()
        }
        _ => replacement.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let table = PatternTable::compile(
            "broken",
            &[rule(r"(unclosed", (), Low), rule(r"\bok\b", (), Low)],
        );
        assert_eq!(table.len(), 1);
        assert!(table.is_match("it is ok"));
    }

    #[test]
    fn test_all_builtin_tables_compile() {
        assert_eq!(MEMORY_REFERENCES.len(), 3);
        assert_eq!(CONTINUITY_CUES.len(), 7);
        assert_eq!(CRISIS_TERMS.len(), 4);
        assert_eq!(DISMISSALS.len(), 6);
        assert_eq!(ACKNOWLEDGEMENTS.len(), 5);
        assert_eq!(ENTITIES.len(), 3);
        assert_eq!(MEMORY_REWRITES.len(), 6);
        for table in [&*CASUAL_TERMS, &*DEPRESSED_STATE, &*FEELING_ATTRIBUTIONS] {
            assert_eq!(table.len(), 1, "{}", table.name());
        }
    }

    #[test]
    fn test_acknowledgements() {
        assert!(ACKNOWLEDGEMENTS.is_match("That sounds really hard."));
        assert!(ACKNOWLEDGEMENTS.is_match("I'm so sorry you're going through this."));
        assert!(ACKNOWLEDGEMENTS.is_match("It sounds like you're carrying a lot right now."));
        assert!(!ACKNOWLEDGEMENTS.is_match("Have you tried the new pasta place downtown?"));
    }

    #[test]
    fn test_memory_reference_capture() {
        let m = MEMORY_REFERENCES
            .first("I remember you told me about your job loss last week.")
            .unwrap();
        assert_eq!(m.category, MemoryCue::Recall);
        assert_eq!(m.capture, Some("you told me about your job loss last week"));
    }

    #[test]
    fn test_find_disjoint_drops_overlaps() {
        let matches = CONTINUITY_CUES.find_disjoint("As we discussed last time, it helps.");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "As we discussed last time");
    }

    #[test]
    fn test_crisis_categories() {
        let cats = CRISIS_TERMS.categories("I keep bingeing and then I want to die");
        assert_eq!(cats, vec![CrisisCategory::Suicide, CrisisCategory::EatingDisorder]);
    }

    #[test]
    fn test_expressed_polarities_skip_negation() {
        assert_eq!(
            expressed_polarities("I'm not happy, just stressed"),
            vec![Polarity::Negative]
        );
        assert_eq!(polarity_of("excited"), Some(Polarity::Positive));
        assert_eq!(polarity_of("table"), None);
    }

    #[test]
    fn test_replace_span_keeps_case() {
        let text = "I remember you told me about it.";
        let m = MEMORY_REWRITES.first(text).unwrap();
        let out = replace_span(text, m.start, m.end, m.category);
        assert_eq!(out, "If you're dealing with it.");

        let out = replace_span("So, Cheer up now", 4, 12, "take care");
        assert_eq!(out, "So, Take care now");
    }
}
