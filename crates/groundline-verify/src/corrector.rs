//! Targeted rewrites of a flagged reply.
//!
//! Fixes are applied in priority order:
//! 1. crisis protocol mixing or mismatch (whole-reply safety message when critical)
//! 2. false memory and false continuity phrasing
//! 3. repetition and contradiction clean-up
//! 4. emotion misattribution
//!
//! The corrector only edits the draft; it never generates a new reply
//! except for the fixed safety messages.

use groundline_core::text::{join_sentences, normalize, split_sentences, token_overlap};
use groundline_core::Severity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::flag::{HallucinationFlag, HallucinationType};
use crate::patterns::{
    replace_span, CrisisCategory, CONTINUITY_CUES, CRISIS_TERMS, MEMORY_REWRITES,
};

/// Default token overlap at which two sentences count as duplicates.
pub const DEDUPE_THRESHOLD: f32 = 0.7;

const EMOTION_HEDGE: &str = "I may be misreading how you feel";
const DEPRESSION_ACKNOWLEDGEMENT: &str = "it sounds like you're carrying a lot right now";

/// Safety message for a crisis category, or the generic one.
pub fn safety_message(category: Option<CrisisCategory>) -> &'static str {
    match category {
        Some(CrisisCategory::Suicide) => {
            "I'm really concerned about what you're sharing, and your safety matters most right now. \
             Please call or text 988 to reach the Suicide & Crisis Lifeline, or contact your local \
             emergency services if you are in immediate danger. You don't have to go through this alone."
        }
        Some(CrisisCategory::SelfHarm) => {
            "I'm concerned that you may be hurting yourself, and you deserve support right now. \
             You can text HOME to 741741 to reach the Crisis Text Line, or call or text 988 at any \
             time. If you are in immediate danger, please contact emergency services."
        }
        Some(CrisisCategory::EatingDisorder) => {
            "What you're describing around food and eating sounds really hard, and you deserve \
             specialised support. The ANAD helpline at 1-888-375-7767 can help, and if you ever \
             feel unsafe you can call or text 988."
        }
        Some(CrisisCategory::Substance) => {
            "Thank you for trusting me with this. Free, confidential support is available any time \
             from the SAMHSA National Helpline at 1-800-662-4357. If you or someone else is in \
             danger, please contact emergency services."
        }
        None => {
            "I want to make sure you're safe. If you're going through something serious, please \
             reach out to a crisis line such as 988 (call or text) or your local emergency services."
        }
    }
}

/// Result of a correction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutcome {
    pub text: String,
    /// Human-readable description of every fix applied, in order.
    pub applied: Vec<String>,
    /// `true` if the whole reply was replaced by a safety message.
    pub safety_override: bool,
}

impl CorrectionOutcome {
    /// `true` if any fix was applied.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Applies targeted fixes for detector flags.
#[derive(Debug, Clone)]
pub struct Corrector {
    dedupe_threshold: f32,
}

impl Corrector {
    /// Create a corrector with the default duplicate threshold.
    pub fn new() -> Self {
        Self {
            dedupe_threshold: DEDUPE_THRESHOLD,
        }
    }

    /// Override the duplicate threshold. Chainable builder method.
    pub fn with_dedupe_threshold(mut self, threshold: f32) -> Self {
        self.dedupe_threshold = threshold;
        self
    }

    /// Fix `reply` according to `flags`. `input` selects the safety message.
    pub fn correct(
        &self,
        reply: &str,
        input: &str,
        flags: &[HallucinationFlag],
    ) -> CorrectionOutcome {
        let mut outcome = CorrectionOutcome {
            text: reply.to_string(),
            applied: Vec::new(),
            safety_override: false,
        };
        if flags.is_empty() {
            return outcome;
        }

        if let Some(flag) = flags.iter().find(|f| {
            matches!(
                f.kind,
                HallucinationType::ProtocolMixing | HallucinationType::ProtocolMismatch
            ) && f.severity == Severity::Critical
        }) {
            let category = flag
                .crisis
                .or_else(|| CRISIS_TERMS.categories(input).first().copied())
                .or_else(|| CRISIS_TERMS.categories(reply).first().copied());
            outcome.text = safety_message(category).to_string();
            outcome.safety_override = true;
            outcome
                .applied
                .push(format!("replaced reply with safety message ({})", flag.kind));
            info!(kind = %flag.kind, "Reply replaced with safety message");
            return outcome;
        }

        self.fix_memory(&mut outcome, flags);
        self.fix_continuity(&mut outcome, flags);
        self.fix_repetition(&mut outcome, flags);
        self.fix_contradictions(&mut outcome, flags);
        self.fix_emotion(&mut outcome, flags);

        if outcome.changed() {
            outcome.text = tidy(&outcome.text);
        }
        debug!(fixes = outcome.applied.len(), "Correction pass complete");
        outcome
    }

    fn fix_memory(&self, outcome: &mut CorrectionOutcome, flags: &[HallucinationFlag]) {
        for flag in flags_of(flags, HallucinationType::FalseMemory) {
            let Some(span) = flag.matched_text.as_deref() else {
                continue;
            };
            let Some(start) = outcome.text.find(span) else {
                continue;
            };
            let Some(m) = MEMORY_REWRITES.first(span) else {
                continue;
            };
            outcome.text = replace_span(
                &outcome.text,
                start + m.start,
                start + m.end,
                m.category,
            );
            outcome
                .applied
                .push(format!("rephrased memory claim \"{}\"", m.text));
        }
    }

    fn fix_continuity(&self, outcome: &mut CorrectionOutcome, flags: &[HallucinationFlag]) {
        if flags_of(flags, HallucinationType::FalseContinuity).next().is_none() {
            return;
        }
        let cues = CONTINUITY_CUES.find_disjoint(&outcome.text);
        if cues.is_empty() {
            return;
        }
        let mut text = outcome.text.clone();
        for cue in cues.iter().rev() {
            text.replace_range(cue.start..cue.end, "");
            outcome
                .applied
                .push(format!("removed session reference \"{}\"", cue.text));
        }
        outcome.text = text;
    }

    fn fix_repetition(&self, outcome: &mut CorrectionOutcome, flags: &[HallucinationFlag]) {
        if flags_of(flags, HallucinationType::Repetition).next().is_some() {
            let deduped = dedupe_sentences(&outcome.text, self.dedupe_threshold);
            if deduped != outcome.text {
                outcome.text = deduped;
                outcome.applied.push("removed repeated sentences".to_string());
            }
        }

        for flag in flags_of(flags, HallucinationType::RepeatedReply) {
            let Some(sentence) = flag.matched_text.as_deref() else {
                continue;
            };
            if let Some(text) = remove_sentence(&outcome.text, sentence) {
                outcome.text = text;
                outcome
                    .applied
                    .push(format!("removed sentence repeated from an earlier reply \"{sentence}\""));
            }
        }
    }

    fn fix_contradictions(&self, outcome: &mut CorrectionOutcome, flags: &[HallucinationFlag]) {
        for flag in flags_of(flags, HallucinationType::LogicalContradiction) {
            let Some(sentence) = flag.matched_text.as_deref() else {
                continue;
            };
            // Only whole-sentence matches are dropped; attribution spans stay.
            if let Some(text) = remove_sentence(&outcome.text, sentence) {
                outcome.text = text;
                outcome
                    .applied
                    .push(format!("dropped contradicting sentence \"{sentence}\""));
            }
        }
    }

    fn fix_emotion(&self, outcome: &mut CorrectionOutcome, flags: &[HallucinationFlag]) {
        for flag in flags_of(flags, HallucinationType::EmotionMismatch) {
            let Some(span) = flag.matched_text.as_deref() else {
                // Nothing to replace: the reply ignored the user's state.
                if flag.severity == Severity::Critical
                    && !outcome.text.to_lowercase().contains(DEPRESSION_ACKNOWLEDGEMENT)
                {
                    outcome.text = format!("{DEPRESSION_ACKNOWLEDGEMENT}. {}", outcome.text);
                    outcome
                        .applied
                        .push("acknowledged the user's low mood".to_string());
                }
                continue;
            };
            let Some(start) = outcome.text.find(span) else {
                continue;
            };
            let replacement = if flag.severity == Severity::Critical {
                DEPRESSION_ACKNOWLEDGEMENT
            } else {
                EMOTION_HEDGE
            };
            outcome.text = replace_span(&outcome.text, start, start + span.len(), replacement);
            outcome
                .applied
                .push(format!("replaced emotion attribution \"{span}\""));
        }
    }
}

impl Default for Corrector {
    fn default() -> Self {
        Self::new()
    }
}

fn flags_of(
    flags: &[HallucinationFlag],
    kind: HallucinationType,
) -> impl Iterator<Item = &HallucinationFlag> {
    flags.iter().filter(move |f| f.kind == kind)
}

/// Drop sentences that repeat an earlier sentence: identical after
/// normalization, or with token overlap of at least `threshold`.
/// Returns `text` untouched when nothing repeats.
pub fn dedupe_sentences(text: &str, threshold: f32) -> String {
    let sentences = split_sentences(text);
    let mut kept: Vec<&str> = Vec::with_capacity(sentences.len());
    for sentence in &sentences {
        let norm = normalize(sentence);
        let repeated = kept.iter().any(|k| {
            (!norm.is_empty() && normalize(k) == norm) || token_overlap(k, sentence) >= threshold
        });
        if !repeated {
            kept.push(sentence);
        }
    }
    if kept.len() == sentences.len() {
        return text.to_string();
    }
    join_sentences(&kept)
}

/// Remove the last occurrence of `sentence`, unless it is the only one left.
fn remove_sentence(text: &str, sentence: &str) -> Option<String> {
    let mut sentences = split_sentences(text);
    if sentences.len() < 2 {
        return None;
    }
    let index = sentences.iter().rposition(|s| s == sentence)?;
    sentences.remove(index);
    Some(join_sentences(&sentences))
}

/// Clean up after span edits: collapse whitespace, drop spaces before
/// punctuation and orphaned leading commas, capitalize sentence starts.
fn tidy(text: &str) -> String {
    let sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .filter_map(|sentence| {
            let mut s = sentence.split_whitespace().collect::<Vec<_>>().join(" ");
            for (from, to) in [(" ,", ","), (" .", "."), (" !", "!"), (" ?", "?"), (",,", ","), (",.", ".")] {
                while s.contains(from) {
                    s = s.replace(from, to);
                }
            }
            let s = s.trim_start_matches([',', ';', ' ']).trim();
            if s.chars().all(|c| !c.is_alphanumeric()) {
                return None;
            }
            let mut chars = s.chars();
            let first = chars.next()?;
            Some(first.to_uppercase().chain(chars).collect())
        })
        .collect();
    join_sentences(&sentences)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::detector::{EvidenceContext, HallucinationDetector};

    fn detect_and_correct(reply: &str, input: &str) -> CorrectionOutcome {
        let report =
            HallucinationDetector::new().detect(reply, input, &[], &EvidenceContext::default());
        Corrector::new().correct(reply, input, &report.flags)
    }

    #[test]
    fn test_no_flags_no_change() {
        let outcome = Corrector::new().correct("All good here.", "hi", &[]);
        assert_eq!(outcome.text, "All good here.");
        assert!(!outcome.changed());
    }

    #[test]
    fn test_dedupe_sentences() {
        assert_eq!(
            dedupe_sentences("I hear you. I hear you. What's next?", DEDUPE_THRESHOLD),
            "I hear you. What's next?"
        );
        assert_eq!(
            dedupe_sentences("Nothing repeats here.\nReally.", DEDUPE_THRESHOLD),
            "Nothing repeats here.\nReally."
        );
    }

    #[test]
    fn test_repetition_fix() {
        let outcome = detect_and_correct("I hear you. I hear you. What's next?", "ok");
        assert_eq!(outcome.text, "I hear you. What's next?");
        assert!(outcome.changed());
    }

    #[test]
    fn test_false_memory_and_continuity_fix() {
        let outcome = detect_and_correct(
            "I remember you told me about your job loss last week.",
            "Hi, I'm feeling low today.",
        );
        assert!(!outcome.text.contains("I remember"));
        assert!(!outcome.text.contains("last week"));
        assert_eq!(outcome.text, "If you're dealing with your job loss.");
        assert!(!outcome.text.contains("told me"));
    }

    #[test]
    fn test_continuity_lead_in_removed() {
        let outcome = detect_and_correct(
            "As we discussed before, breathing exercises can help.",
            "I feel tense",
        );
        assert_eq!(outcome.text, "Breathing exercises can help.");
    }

    #[test]
    fn test_protocol_mixing_uses_safety_message() {
        let outcome = detect_and_correct(
            "I'm sorry you want to end your life. Maybe a party would cheer you up?",
            "I want to end my life",
        );
        assert!(outcome.safety_override);
        assert_eq!(outcome.text, safety_message(Some(CrisisCategory::Suicide)));
        assert!(outcome.text.contains("988"));
    }

    #[test]
    fn test_protocol_mismatch_uses_input_category() {
        let outcome = detect_and_correct(
            "Relapse is part of recovery from addiction.",
            "I have been purging after every meal",
        );
        assert!(outcome.safety_override);
        assert_eq!(
            outcome.text,
            safety_message(Some(CrisisCategory::EatingDisorder))
        );
    }

    #[test]
    fn test_emotion_fix_for_depressed_user() {
        let outcome = detect_and_correct(
            "Cheer up, tomorrow is a new day.",
            "I feel hopeless and depressed",
        );
        assert_eq!(
            outcome.text,
            "It sounds like you're carrying a lot right now, tomorrow is a new day."
        );
    }

    #[test]
    fn test_ignored_depressed_user_gets_acknowledged() {
        let input = "I feel so depressed and hopeless, I can't go on";
        let outcome = detect_and_correct(
            "Have you tried the new pasta place downtown? It's great for lunch.",
            input,
        );
        assert_eq!(
            outcome.text,
            "It sounds like you're carrying a lot right now. Have you tried the new pasta place downtown? It's great for lunch."
        );
        assert!(!detect_and_correct(&outcome.text, input).changed());
    }

    #[test]
    fn test_contradiction_drops_later_sentence() {
        let outcome = detect_and_correct(
            "You are ready for this change. You are not ready for this change.",
            "what do you think",
        );
        assert_eq!(outcome.text, "You are ready for this change.");
    }

    #[test]
    fn test_correction_is_stable_on_clean_output() {
        let first = detect_and_correct("I hear you. I hear you. What's next?", "ok");
        let second = detect_and_correct(&first.text, "ok");
        assert_eq!(second.text, first.text);
        assert!(!second.changed());
    }
}
