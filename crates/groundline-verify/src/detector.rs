//! Pattern- and evidence-based hallucination detection.
//!
//! The detector runs an ordered battery of independent checks over a draft
//! reply. Each finding becomes a [`HallucinationFlag`]; the report's
//! confidence is 1.0 minus the severity penalty of every flag.

use std::collections::{HashMap, HashSet};

use groundline_core::text::{normalize, split_sentences, token_overlap, token_set, tokenize};
use groundline_core::{recent_assistant_replies, ConversationTurn, GroundingResult, Severity};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::flag::{DetectionReport, HallucinationFlag, HallucinationType};
use crate::patterns::{
    expressed_polarities, is_negated, polarity_of, EntityKind, Polarity, ACKNOWLEDGEMENTS,
    CASUAL_TERMS, CONTINUITY_CUES, CRISIS_TERMS, DEPRESSED_STATE, DISMISSALS, EMOTION_WORDS,
    ENTITIES, FEELING_ATTRIBUTIONS, MEMORY_LEAD_INS, MEMORY_REFERENCES,
};

/// Evidence weights of the false-memory check.
const TOPIC_CONTEXT_WEIGHT: f32 = 0.3;
const MEMORY_STORE_WEIGHT: f32 = 0.5;
const HISTORY_SIMILARITY_WEIGHT: f32 = 0.7;
const RECENT_REPLY_WEIGHT: f32 = 0.4;

/// Words ignored when comparing remembered content with evidence.
const FILLER_WORDS: &[&str] = &[
    "you", "your", "yours", "my", "mine", "the", "and", "that", "this", "about", "with", "was",
    "were", "have", "had", "has", "for", "before", "earlier", "previously", "how", "when",
];

/// Negation tokens for the contradiction check (as produced by `tokenize`).
const NEGATION_TOKENS: &[&str] = &[
    "not", "never", "don", "doesn", "didn", "isn", "aren", "wasn", "won", "can", "cannot",
];

/// Tunables of the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Histories of at most this many turns count as a new conversation.
    pub new_conversation_turns: usize,
    /// Evidence needed for a memory reference to count as supported.
    pub evidence_threshold: f32,
    /// Number of recent assistant replies checked for duplicates.
    pub recent_response_window: usize,
    /// Token overlap above which two distinct sentences contradict.
    pub contradiction_threshold: f32,
    /// Confidence below which the reply is a hallucination.
    pub hallucination_threshold: f32,
    /// Minimum words for a sentence to count as copied from earlier replies.
    pub min_duplicate_words: usize,
    /// Maximum unsupported-entity flags per reply.
    pub max_entity_flags: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            new_conversation_turns: 2,
            evidence_threshold: 0.6,
            recent_response_window: 3,
            contradiction_threshold: 0.8,
            hallucination_threshold: 0.6,
            min_duplicate_words: 4,
            max_entity_flags: 5,
        }
    }
}

/// Evidence gathered outside the conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceContext {
    /// Snippets retrieved from the conversation memory collection.
    pub memory_snippets: Vec<String>,
}

impl EvidenceContext {
    /// Evidence from the given memory snippets.
    pub fn with_memory(memory_snippets: Vec<String>) -> Self {
        Self { memory_snippets }
    }
}

/// Something that scans a draft reply for hallucinations.
pub trait HallucinationScanner: Send + Sync {
    /// Scan `reply` given the triggering `input` and prior `history`.
    fn scan(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
    ) -> GroundingResult<DetectionReport>;
}

/// The built-in rule-based detector.
#[derive(Debug, Clone, Default)]
pub struct HallucinationDetector {
    config: DetectorConfig,
}

impl HallucinationDetector {
    /// Create a detector with default tunables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector with custom tunables.
    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// The detector's tunables.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run every check. Pure: the same inputs always give the same report.
    pub fn detect(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
    ) -> DetectionReport {
        let mut flags = Vec::new();
        self.check_emotion(reply, input, &mut flags);
        self.check_protocol(reply, input, &mut flags);

        let continuity = CONTINUITY_CUES.find_disjoint(reply);
        let continuity_spans: Vec<(usize, usize)> =
            continuity.iter().map(|m| (m.start, m.end)).collect();
        self.check_false_memory(reply, input, history, evidence, &continuity_spans, &mut flags);
        if self.is_new_conversation(history) {
            for m in &continuity {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::FalseContinuity,
                        Severity::High,
                        format!("Refers to an earlier session (\"{}\") in a new conversation", m.text),
                        0.9,
                    )
                    .with_match(m.text),
                );
            }
        }

        self.check_contradictions(reply, &mut flags);
        self.check_repetition(reply, history, &mut flags);
        self.check_entities(reply, input, history, &mut flags);

        let report = DetectionReport::from_flags(flags, self.config.hallucination_threshold);
        debug!(
            flags = report.flags.len(),
            confidence = report.confidence,
            is_hallucination = report.is_hallucination,
            "Hallucination detection complete"
        );
        report
    }

    fn is_new_conversation(&self, history: &[ConversationTurn]) -> bool {
        history.len() <= self.config.new_conversation_turns
    }

    fn check_emotion(&self, reply: &str, input: &str, flags: &mut Vec<HallucinationFlag>) {
        let depressed = DEPRESSED_STATE
            .find_all(input)
            .iter()
            .any(|m| !is_negated(input, m.start));
        if depressed {
            if let Some(m) = DISMISSALS.first(reply) {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::EmotionMismatch,
                        Severity::Critical,
                        "Dismisses a user who described feeling depressed",
                        0.9,
                    )
                    .with_match(m.text),
                );
                return;
            }
            if !reply.trim().is_empty() && !acknowledges_distress(reply) {
                flags.push(HallucinationFlag::new(
                    HallucinationType::EmotionMismatch,
                    Severity::Critical,
                    "Ignores a user who described feeling depressed",
                    0.85,
                ));
                return;
            }
        }

        let expressed = expressed_polarities(input);
        if expressed.len() != 1 {
            return;
        }
        let felt = expressed[0];
        for m in FEELING_ATTRIBUTIONS.find_all(reply) {
            let Some(word) = m.capture else {
                continue;
            };
            if polarity_of(word) == Some(felt.opposite()) {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::EmotionMismatch,
                        Severity::High,
                        format!("Attributes \"{word}\" to a user expressing the opposite"),
                        0.8,
                    )
                    .with_match(m.text),
                );
            }
        }
    }

    fn check_protocol(&self, reply: &str, input: &str, flags: &mut Vec<HallucinationFlag>) {
        let reply_crises = CRISIS_TERMS.categories(reply);
        let input_crises = CRISIS_TERMS.categories(input);

        if let (Some(&crisis), Some(casual)) = (reply_crises.first(), CASUAL_TERMS.first(reply)) {
            let crisis = input_crises.first().copied().unwrap_or(crisis);
            flags.push(
                HallucinationFlag::new(
                    HallucinationType::ProtocolMixing,
                    Severity::Critical,
                    format!("Mixes {crisis} content with casual topics (\"{}\")", casual.text),
                    0.95,
                )
                .with_match(casual.text)
                .with_crisis(crisis),
            );
        }

        if let Some(&expected) = input_crises.first() {
            let addressed = reply_crises.iter().any(|c| input_crises.contains(c));
            if !reply_crises.is_empty() && !addressed {
                let matched = CRISIS_TERMS.first(reply).map(|m| m.text.to_string());
                let mut flag = HallucinationFlag::new(
                    HallucinationType::ProtocolMismatch,
                    Severity::Critical,
                    format!("User raised {expected} but the reply addresses {}", reply_crises[0]),
                    0.9,
                )
                .with_crisis(expected);
                flag.matched_text = matched;
                flags.push(flag);
            }
        }
    }

    fn check_false_memory(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
        continuity_spans: &[(usize, usize)],
        flags: &mut Vec<HallucinationFlag>,
    ) {
        for m in MEMORY_REFERENCES.find_disjoint(reply) {
            if continuity_spans
                .iter()
                .any(|(start, end)| m.start >= *start && m.start < *end)
            {
                continue;
            }
            let content = remembered_content(m.capture.unwrap_or(""));
            let variants = perspective_variants(&content);

            // With a short history nothing can be remembered, whatever the content.
            if self.is_new_conversation(history) {
                let severity = if history.is_empty() {
                    Severity::Critical
                } else {
                    Severity::High
                };
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::FalseMemory,
                        severity,
                        format!(
                            "Claims to remember \"{content}\" with only {} prior turns",
                            history.len()
                        ),
                        0.95,
                    )
                    .with_match(m.text),
                );
                continue;
            }

            if contains_any(input, &variants) || content_terms(&content).is_empty() {
                continue;
            }
            let score = self.memory_evidence(&content, &variants, input, history, evidence);
            if score >= self.config.evidence_threshold {
                continue;
            }
            let severity = if score < 0.2 {
                Severity::Critical
            } else if score < 0.4 {
                Severity::High
            } else {
                Severity::Medium
            };
            flags.push(
                HallucinationFlag::new(
                    HallucinationType::FalseMemory,
                    severity,
                    format!("Claims to remember \"{content}\" (evidence {score:.2})"),
                    1.0 - score,
                )
                .with_match(m.text),
            );
        }
    }

    /// Evidence that `content` was really part of the conversation.
    fn memory_evidence(
        &self,
        content: &str,
        variants: &[String],
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
    ) -> f32 {
        let terms = content_terms(content);
        let mut score = 0.0;

        let input_tokens = token_set(input);
        if terms.iter().any(|t| input_tokens.contains(t)) {
            score += TOPIC_CONTEXT_WEIGHT;
        }

        if evidence
            .memory_snippets
            .iter()
            .any(|s| contains_any(s, variants))
        {
            score += MEMORY_STORE_WEIGHT;
        }

        let best = history
            .iter()
            .map(|turn| {
                if contains_any(&turn.content, variants) {
                    1.0
                } else {
                    coverage(&terms, &turn.content)
                }
            })
            .fold(0.0_f32, f32::max);
        score += HISTORY_SIMILARITY_WEIGHT * best;

        if recent_assistant_replies(history, self.config.recent_response_window)
            .iter()
            .any(|r| contains_any(r, variants))
        {
            score += RECENT_REPLY_WEIGHT;
        }
        score
    }

    fn check_contradictions(&self, reply: &str, flags: &mut Vec<HallucinationFlag>) {
        let sentences = split_sentences(reply);
        for (j, later) in sentences.iter().enumerate() {
            let contradicted = sentences[..j].iter().find(|earlier| {
                normalize(earlier) != normalize(later)
                    && (token_overlap(earlier, later) > self.config.contradiction_threshold
                        || negation_pair(earlier, later))
            });
            if let Some(earlier) = contradicted {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::LogicalContradiction,
                        Severity::Medium,
                        format!("\"{later}\" conflicts with \"{earlier}\""),
                        0.6,
                    )
                    .with_match(later.clone()),
                );
            }
        }

        let mut seen: Option<Polarity> = None;
        for m in FEELING_ATTRIBUTIONS.find_all(reply) {
            let Some(polarity) = m.capture.and_then(polarity_of) else {
                continue;
            };
            match seen {
                None => seen = Some(polarity),
                Some(p) if p != polarity => {
                    flags.push(
                        HallucinationFlag::new(
                            HallucinationType::LogicalContradiction,
                            Severity::Medium,
                            "Attributes opposite emotions to the user",
                            0.6,
                        )
                        .with_match(m.text),
                    );
                    break;
                }
                Some(_) => {}
            }
        }
    }

    fn check_repetition(
        &self,
        reply: &str,
        history: &[ConversationTurn],
        flags: &mut Vec<HallucinationFlag>,
    ) {
        let sentences = split_sentences(reply);

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, (usize, &str)> = HashMap::new();
        for sentence in &sentences {
            let norm = normalize(sentence);
            if norm.is_empty() {
                continue;
            }
            let entry = counts.entry(norm.clone()).or_insert_with(|| {
                order.push(norm);
                (0, sentence.as_str())
            });
            entry.0 += 1;
        }
        for norm in &order {
            let Some(&(count, original)) = counts.get(norm) else {
                continue;
            };
            if count >= 2 {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::Repetition,
                        repetition_severity(count),
                        format!("Sentence repeated {count} times"),
                        0.9,
                    )
                    .with_match(original),
                );
            }
        }

        // Phrases are counted over distinct sentences so a repeated sentence
        // is not reported twice.
        let mut phrase_counts: HashMap<String, usize> = HashMap::new();
        for norm in &order {
            let words: Vec<&str> = norm.split_whitespace().collect();
            for window in words.windows(4) {
                *phrase_counts.entry(window.join(" ")).or_insert(0) += 1;
            }
        }
        let top = phrase_counts
            .iter()
            .filter(|&(_, &c)| c >= 2)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((phrase, &count)) = top {
            flags.push(
                HallucinationFlag::new(
                    HallucinationType::Repetition,
                    repetition_severity(count),
                    format!("Phrase \"{phrase}\" repeated {count} times"),
                    0.7,
                )
                .with_match(phrase.clone()),
            );
        }

        let earlier: HashSet<String> =
            recent_assistant_replies(history, self.config.recent_response_window)
                .into_iter()
                .flat_map(split_sentences)
                .map(|s| normalize(&s))
                .collect();
        let mut reported: HashSet<String> = HashSet::new();
        for sentence in &sentences {
            let norm = normalize(sentence);
            if norm.split_whitespace().count() < self.config.min_duplicate_words {
                continue;
            }
            if earlier.contains(&norm) && reported.insert(norm) {
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::RepeatedReply,
                        Severity::Medium,
                        "Repeats a sentence from a recent reply",
                        0.8,
                    )
                    .with_match(sentence.clone()),
                );
            }
        }
    }

    fn check_entities(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        flags: &mut Vec<HallucinationFlag>,
    ) {
        let mut known = input.to_lowercase();
        for turn in history {
            known.push('\n');
            known.push_str(&turn.content.to_lowercase());
        }

        let mut seen: HashSet<String> = HashSet::new();
        for sentence in split_sentences(reply) {
            for m in ENTITIES.find_disjoint(&sentence) {
                if m.category == EntityKind::Name && m.start == 0 {
                    continue;
                }
                let lowered = m.text.to_lowercase();
                if known.contains(&lowered) || !seen.insert(lowered) {
                    continue;
                }
                if seen.len() > self.config.max_entity_flags {
                    return;
                }
                let kind = match m.category {
                    EntityKind::Date => "date",
                    EntityKind::Number => "number",
                    EntityKind::Name => "name",
                };
                flags.push(
                    HallucinationFlag::new(
                        HallucinationType::UnsupportedEntity,
                        Severity::Low,
                        format!("Mentions {kind} \"{}\" not found in the conversation", m.text),
                        0.4,
                    )
                    .with_match(m.text),
                );
            }
        }
    }
}

impl HallucinationScanner for HallucinationDetector {
    fn scan(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
    ) -> GroundingResult<DetectionReport> {
        Ok(self.detect(reply, input, history, evidence))
    }
}

fn repetition_severity(count: usize) -> Severity {
    match count {
        0..=2 => Severity::Low,
        3 => Severity::Medium,
        _ => Severity::High,
    }
}

/// `true` if the reply engages with the user's distress at all.
fn acknowledges_distress(reply: &str) -> bool {
    ACKNOWLEDGEMENTS.is_match(reply)
        || CRISIS_TERMS.is_match(reply)
        || EMOTION_WORDS
            .find_all(reply)
            .iter()
            .any(|m| m.category == Polarity::Negative)
}

/// Strip reporting verbs and session references from remembered content:
/// "you told me about your job loss last week" becomes "your job loss".
fn remembered_content(capture: &str) -> String {
    let stripped = MEMORY_LEAD_INS
        .first(capture)
        .and_then(|m| capture.get(m.end..))
        .unwrap_or(capture);
    let mut content = stripped.to_string();
    for cue in CONTINUITY_CUES.find_disjoint(stripped).iter().rev() {
        content.replace_range(cue.start..cue.end, "");
    }
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ',' || c == ';' || c == ':')
        .trim()
        .to_string()
}

/// Content tokens without pronouns and filler.
fn content_terms(content: &str) -> Vec<String> {
    tokenize(content)
        .into_iter()
        .filter(|t| !FILLER_WORDS.contains(&t.as_str()))
        .collect()
}

/// The content as written and as the user would have said it
/// ("your job" / "my job").
fn perspective_variants(content: &str) -> Vec<String> {
    let lowered = content.to_lowercase();
    let swapped = lowered
        .split_whitespace()
        .map(|w| match w {
            "you" => "i",
            "your" => "my",
            "yours" => "mine",
            "yourself" => "myself",
            "you're" => "i'm",
            "you've" => "i've",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ");
    if swapped == lowered {
        vec![lowered]
    } else {
        vec![lowered, swapped]
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

fn coverage(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens = token_set(text);
    terms.iter().filter(|t| tokens.contains(*t)).count() as f32 / terms.len() as f32
}

/// Same statement with and without negation ("you are ready" /
/// "you are not ready").
fn negation_pair(a: &str, b: &str) -> bool {
    let split = |s: &str| -> (HashSet<String>, bool) {
        let mut negated = false;
        let tokens = tokenize(s)
            .into_iter()
            .filter(|t| {
                let is_negation = NEGATION_TOKENS.contains(&t.as_str());
                negated |= is_negation;
                !is_negation
            })
            .collect();
        (tokens, negated)
    };
    let (ta, na) = split(a);
    let (tb, nb) = split(b);
    !ta.is_empty() && ta == tb && na != nb
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn detect(reply: &str, input: &str, history: &[ConversationTurn]) -> DetectionReport {
        HallucinationDetector::new().detect(reply, input, history, &EvidenceContext::default())
    }

    fn long_history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("Hi there"),
            ConversationTurn::assistant("Hello, how are you today?"),
            ConversationTurn::user("I lost my job and the job loss has been rough"),
            ConversationTurn::assistant("That sounds really hard."),
        ]
    }

    #[test]
    fn test_clean_reply() {
        let report = detect(
            "That sounds really difficult. What has helped so far?",
            "Work has been stressful lately",
            &[],
        );
        assert!(report.flags.is_empty(), "{:?}", report.flags);
        assert_eq!(report.confidence, 1.0);
        assert!(!report.is_hallucination);
    }

    #[test]
    fn test_false_memory_and_continuity_in_new_conversation() {
        let report = detect(
            "I remember you told me about your job loss last week.",
            "Hi, I'm feeling low today.",
            &[],
        );
        let memory = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::FalseMemory)
            .unwrap();
        assert_eq!(memory.severity, Severity::Critical);
        let continuity = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::FalseContinuity)
            .unwrap();
        assert_eq!(continuity.severity, Severity::High);
        assert_eq!(continuity.matched_text.as_deref(), Some("last week"));
        assert!(report.is_hallucination);
    }

    #[test]
    fn test_short_history_gives_high_severity() {
        let history = vec![
            ConversationTurn::user("hey"),
            ConversationTurn::assistant("Hi! How can I help?"),
        ];
        let report = detect("You mentioned your sister is visiting.", "yeah", &history);
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::FalseMemory)
            .unwrap();
        assert_eq!(flag.severity, Severity::High);
    }

    #[test]
    fn test_memory_supported_by_history() {
        let report = detect(
            "You mentioned your job loss, that must weigh on you.",
            "I still can't sleep",
            &long_history(),
        );
        assert!(!report.has(HallucinationType::FalseMemory), "{:?}", report.flags);
    }

    #[test]
    fn test_memory_supported_by_current_input() {
        let report = detect(
            "You mentioned the exam tomorrow.",
            "I have the exam tomorrow",
            &long_history(),
        );
        assert!(!report.has(HallucinationType::FalseMemory), "{:?}", report.flags);
    }

    #[test]
    fn test_current_input_does_not_excuse_new_conversation() {
        let report = detect(
            "You mentioned the exam tomorrow.",
            "I have the exam tomorrow",
            &[],
        );
        assert!(report.is_hallucination);
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::FalseMemory)
            .unwrap();
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_memory_supported_by_memory_store() {
        let evidence = EvidenceContext::with_memory(vec![
            "User: my sister is visiting next month".to_string()
        ]);
        let report = HallucinationDetector::new().detect(
            "You mentioned your sister is visiting.",
            "what should I cook for my sister",
            &long_history(),
            &evidence,
        );
        assert!(!report.has(HallucinationType::FalseMemory), "{:?}", report.flags);
    }

    #[test]
    fn test_unsupported_memory_with_long_history() {
        let report = detect(
            "We discussed your divorce in detail.",
            "I can't focus",
            &long_history(),
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::FalseMemory)
            .unwrap();
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_dismissing_depressed_user_is_critical() {
        let report = detect(
            "You seem happy today! Cheer up.",
            "I feel so depressed and hopeless",
            &[],
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::EmotionMismatch)
            .unwrap();
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_ignoring_depressed_user_is_critical() {
        let report = detect(
            "Have you tried the new pasta place downtown? It's great for lunch.",
            "I feel so depressed and hopeless, I can't go on",
            &[],
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::EmotionMismatch)
            .unwrap();
        assert_eq!(flag.severity, Severity::Critical);
        assert!(flag.matched_text.is_none());
        assert!(report.is_hallucination);
    }

    #[test]
    fn test_acknowledging_depressed_user_is_not_flagged() {
        for reply in [
            "That sounds really hard. I'm here for you.",
            "Feeling hopeless is exhausting. What has today been like?",
        ] {
            let report = detect(reply, "I feel so depressed", &long_history());
            assert!(!report.has(HallucinationType::EmotionMismatch), "{reply}");
        }
    }

    #[test]
    fn test_opposite_emotion_is_high() {
        let report = detect("You sound excited about it.", "I'm really anxious about the move", &[]);
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::EmotionMismatch)
            .unwrap();
        assert_eq!(flag.severity, Severity::High);
        assert_eq!(flag.matched_text.as_deref(), Some("You sound excited"));
    }

    #[test]
    fn test_protocol_mixing() {
        let report = detect(
            "If you are thinking about suicide, please call 988. Maybe try a new restaurant too.",
            "I want to die",
            &[],
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::ProtocolMixing)
            .unwrap();
        assert_eq!(flag.severity, Severity::Critical);
        assert_eq!(flag.crisis, Some(crate::patterns::CrisisCategory::Suicide));
    }

    #[test]
    fn test_protocol_mismatch() {
        let report = detect(
            "It sounds like addiction is affecting you.",
            "I have been cutting myself again",
            &[],
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::ProtocolMismatch)
            .unwrap();
        assert_eq!(flag.crisis, Some(crate::patterns::CrisisCategory::SelfHarm));
    }

    #[test]
    fn test_repetition_severity_by_count() {
        let report = detect("I hear you. I hear you. What's next?", "ok", &[]);
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::Repetition)
            .unwrap();
        assert_eq!(flag.severity, Severity::Low);
        assert!(!report.is_hallucination);

        let report = detect("Breathe. Breathe. Breathe. Breathe.", "ok", &[]);
        assert_eq!(report.max_severity(), Some(Severity::High));
    }

    #[test]
    fn test_repeated_phrase() {
        let report = detect(
            "Take a deep breath now. Then take a deep breath again.",
            "help",
            &[],
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::Repetition)
            .unwrap();
        assert_eq!(flag.matched_text.as_deref(), Some("take a deep breath"));
    }

    #[test]
    fn test_repeated_reply_from_history() {
        let history = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant("It is okay to take things one step at a time."),
        ];
        let report = detect(
            "It is okay to take things one step at a time.",
            "I'm still struggling",
            &history,
        );
        let flag = report
            .flags
            .iter()
            .find(|f| f.kind == HallucinationType::RepeatedReply)
            .unwrap();
        assert_eq!(flag.severity, Severity::Medium);
    }

    #[test]
    fn test_negation_contradiction() {
        let report = detect(
            "You are ready for this change. You are not ready for this change.",
            "thoughts?",
            &[],
        );
        assert!(report.has(HallucinationType::LogicalContradiction));
    }

    #[test]
    fn test_unsupported_entities() {
        let report = detect(
            "Your therapist Dr Morgan said it on March 3rd.",
            "I saw my therapist",
            &[],
        );
        let entities: Vec<&str> = report
            .flags
            .iter()
            .filter(|f| f.kind == HallucinationType::UnsupportedEntity)
            .filter_map(|f| f.matched_text.as_deref())
            .collect();
        assert!(entities.contains(&"Dr Morgan"));
        assert!(entities.contains(&"March 3rd"));
        assert!(report
            .flags
            .iter()
            .filter(|f| f.kind == HallucinationType::UnsupportedEntity)
            .all(|f| f.severity == Severity::Low));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let reply = "I remember you told me about Paris last week. I hear you. I hear you.";
        let history = long_history();
        let first = detect(reply, "hm", &history);
        let second = detect(reply, "hm", &history);
        assert_eq!(first, second);
    }

    #[test]
    fn test_remembered_content() {
        assert_eq!(
            remembered_content("you told me about your job loss last week"),
            "your job loss"
        );
        assert_eq!(remembered_content("that you like hiking"), "you like hiking");
    }
}
