//! Claim-level verification of a draft reply.
//!
//! Sentences that say something about the user become claims. Each claim is
//! checked against the conversation; unsupported claims lower the claim's
//! confidence, and when any claim falls below the threshold the weak claims
//! are rewritten in hedged language.

use groundline_core::text::{split_sentences, stem, tokenize};
use groundline_core::{ConversationTurn, GroundingResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::patterns::{
    polarity_of, replace_span, FEELING_ATTRIBUTIONS, FEELING_HEDGES, QUOTE_ATTRIBUTIONS,
    QUOTE_HEDGES, USER_REFERENCES,
};

/// Claims shorter than this are not checked.
const MIN_CLAIM_CHARS: usize = 15;
/// Prior turns searched for a feeling or state.
const STATE_LOOKBACK_TURNS: usize = 3;

const UNSUPPORTED_QUOTE: f32 = 0.3;
const UNSUPPORTED_STATE: f32 = 0.6;
const GENERAL_CLAIM: f32 = 0.9;
const SUPPORTED: f32 = 1.0;

const NO_EVIDENCE: &str = "no supporting evidence found";

/// What a claim asserts about the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// "you said / mentioned / told me ..."
    Quote,
    /// "you seem anxious", "you're feeling ..."
    Feeling,
    /// Any other statement about the user.
    General,
}

/// One checked claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub claim: String,
    pub kind: ClaimKind,
    pub evidence: Vec<String>,
    /// 1.0 minus evidence-based penalties, in `[0, 1]`.
    pub confidence: f32,
}

/// Result of verifying a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// The reply, rewritten when unsound.
    pub text: String,
    pub steps: Vec<ReasoningStep>,
    /// `true` if no claim fell below the threshold.
    pub is_sound: bool,
    /// `true` if `text` differs from the input reply.
    pub revised: bool,
}

impl Verification {
    /// A sound, unchanged verification of `reply`.
    pub fn unchanged(reply: &str) -> Self {
        Self {
            text: reply.to_string(),
            steps: Vec::new(),
            is_sound: true,
            revised: false,
        }
    }
}

/// Something that verifies the claims of a draft reply.
pub trait ClaimChecker: Send + Sync {
    /// Verify `reply` against the user `input` and prior `history`.
    fn check(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
    ) -> GroundingResult<Verification>;
}

/// The built-in claim verifier.
#[derive(Debug, Clone)]
pub struct ReasoningVerifier {
    threshold: f32,
}

impl ReasoningVerifier {
    /// Create a verifier with the default threshold of 0.7.
    pub fn new() -> Self {
        Self { threshold: 0.7 }
    }

    /// Create a verifier with a custom threshold.
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Claims with confidence below this make the reply unsound.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Extract and score the claims of `reply`.
    pub fn extract_steps(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
    ) -> Vec<ReasoningStep> {
        split_sentences(reply)
            .into_iter()
            .filter(|s| is_claim(s))
            .map(|claim| score_claim(claim, input, history))
            .collect()
    }

    /// Verify `reply`, rewriting weak claims when the reply is unsound.
    pub fn verify(&self, reply: &str, input: &str, history: &[ConversationTurn]) -> Verification {
        let steps = self.extract_steps(reply, input, history);
        let is_sound = steps.iter().all(|s| s.confidence >= self.threshold);
        if is_sound {
            return Verification {
                text: reply.to_string(),
                steps,
                is_sound,
                revised: false,
            };
        }

        let mut text = reply.to_string();
        for step in steps.iter().filter(|s| s.confidence < self.threshold) {
            let rewritten = hedge(&step.claim, step.kind);
            if rewritten != step.claim {
                text = text.replacen(&step.claim, &rewritten, 1);
            }
        }
        let revised = text != reply;
        debug!(
            claims = steps.len(),
            weak = steps.iter().filter(|s| s.confidence < self.threshold).count(),
            revised,
            "Claim verification complete"
        );
        Verification {
            text,
            steps,
            is_sound,
            revised,
        }
    }
}

impl Default for ReasoningVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimChecker for ReasoningVerifier {
    fn check(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
    ) -> GroundingResult<Verification> {
        Ok(self.verify(reply, input, history))
    }
}

fn is_claim(sentence: &str) -> bool {
    sentence.chars().count() > MIN_CLAIM_CHARS
        && !sentence.trim_end().ends_with('?')
        && USER_REFERENCES.is_match(sentence)
}

fn score_claim(claim: String, input: &str, history: &[ConversationTurn]) -> ReasoningStep {
    if let Some(quoted) = QUOTE_ATTRIBUTIONS.first(&claim).and_then(|m| m.capture) {
        let quoted = quoted.trim().to_lowercase();
        if !quoted.is_empty() {
            let source = std::iter::once(input)
                .chain(history.iter().map(|t| t.content.as_str()))
                .find(|text| text.to_lowercase().contains(&quoted));
            let (confidence, evidence) = match source {
                Some(text) => (SUPPORTED, vec![text.to_string()]),
                None => (UNSUPPORTED_QUOTE, vec![NO_EVIDENCE.to_string()]),
            };
            return ReasoningStep {
                claim,
                kind: ClaimKind::Quote,
                evidence,
                confidence,
            };
        }
    }

    let state = FEELING_ATTRIBUTIONS
        .find_all(&claim)
        .into_iter()
        .filter_map(|m| m.capture)
        .find(|word| polarity_of(word).is_some())
        .map(stem);
    if let Some(state) = state {
        let recent = history
            .iter()
            .rev()
            .take(STATE_LOOKBACK_TURNS)
            .map(|t| t.content.as_str());
        let source = std::iter::once(input)
            .chain(recent)
            .find(|text| tokenize(text).iter().any(|t| stem(t) == state));
        let (confidence, evidence) = match source {
            Some(text) => (SUPPORTED, vec![text.to_string()]),
            None => (UNSUPPORTED_STATE, vec![NO_EVIDENCE.to_string()]),
        };
        return ReasoningStep {
            claim,
            kind: ClaimKind::Feeling,
            evidence,
            confidence,
        };
    }

    ReasoningStep {
        claim,
        kind: ClaimKind::General,
        evidence: Vec::new(),
        confidence: GENERAL_CLAIM,
    }
}

/// Rewrite a weak claim in hedged language.
fn hedge(claim: &str, kind: ClaimKind) -> String {
    let table = match kind {
        ClaimKind::Quote => &*QUOTE_HEDGES,
        ClaimKind::Feeling => &*FEELING_HEDGES,
        ClaimKind::General => {
            let mut chars = claim.chars();
            return match chars.next() {
                Some(first) if claim.starts_with("I ") || claim.starts_with("I'") => {
                    format!("It seems like {first}{}", chars.as_str())
                }
                Some(first) => format!(
                    "It seems like {}{}",
                    first.to_lowercase(),
                    chars.as_str()
                ),
                None => String::new(),
            };
        }
    };
    match table.first(claim) {
        Some(m) => replace_span(claim, m.start, m.end, m.category),
        None => claim.to_string(),
    }
}
