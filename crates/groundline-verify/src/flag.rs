use groundline_core::Severity;
use serde::{Deserialize, Serialize};

use crate::patterns::CrisisCategory;

/// Category of a detected hallucination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationType {
    /// The reply misreads or brushes off the user's emotional state.
    EmotionMismatch,
    /// Crisis vocabulary mixed with casual, social vocabulary.
    ProtocolMixing,
    /// The reply addresses a different crisis than the user raised.
    ProtocolMismatch,
    /// The reply claims to remember something without evidence.
    FalseMemory,
    /// The reply implies an earlier session that did not happen.
    FalseContinuity,
    /// Two statements of the reply contradict each other.
    LogicalContradiction,
    /// Sentences or phrases repeated within the reply.
    Repetition,
    /// A sentence copied from one of the last assistant replies.
    RepeatedReply,
    /// A name, date or number that appears nowhere in the conversation.
    UnsupportedEntity,
}

impl std::fmt::Display for HallucinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HallucinationType::EmotionMismatch => "emotion_mismatch",
            HallucinationType::ProtocolMixing => "protocol_mixing",
            HallucinationType::ProtocolMismatch => "protocol_mismatch",
            HallucinationType::FalseMemory => "false_memory",
            HallucinationType::FalseContinuity => "false_continuity",
            HallucinationType::LogicalContradiction => "logical_contradiction",
            HallucinationType::Repetition => "repetition",
            HallucinationType::RepeatedReply => "repeated_reply",
            HallucinationType::UnsupportedEntity => "unsupported_entity",
        };
        f.write_str(s)
    }
}

/// One finding of the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationFlag {
    #[serde(rename = "type")]
    pub kind: HallucinationType,
    pub severity: Severity,
    pub description: String,
    /// How sure the rule is that this is a real problem, in `[0, 1]`.
    pub confidence_score: f32,
    /// The span of the reply that triggered the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    /// Crisis category the reply should have addressed, for protocol flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crisis: Option<CrisisCategory>,
}

impl HallucinationFlag {
    /// Create a flag without a matched span.
    pub fn new(
        kind: HallucinationType,
        severity: Severity,
        description: impl Into<String>,
        confidence_score: f32,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            matched_text: None,
            crisis: None,
        }
    }

    /// Attach the triggering span. Chainable builder method.
    pub fn with_match(mut self, text: impl Into<String>) -> Self {
        self.matched_text = Some(text.into());
        self
    }

    /// Attach a crisis category. Chainable builder method.
    pub fn with_crisis(mut self, crisis: CrisisCategory) -> Self {
        self.crisis = Some(crisis);
        self
    }
}

/// Outcome of a detector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub flags: Vec<HallucinationFlag>,
    /// 1.0 minus the severity penalties of all flags, clamped to `[0, 1]`.
    pub confidence: f32,
    pub is_hallucination: bool,
}

impl DetectionReport {
    /// A report without findings.
    pub fn clean() -> Self {
        Self {
            flags: Vec::new(),
            confidence: 1.0,
            is_hallucination: false,
        }
    }

    /// Score `flags`: the reply is a hallucination when confidence falls
    /// below `threshold` or any flag is high or critical.
    pub fn from_flags(flags: Vec<HallucinationFlag>, threshold: f32) -> Self {
        let penalty: f32 = flags.iter().map(|f| f.severity.penalty()).sum();
        let confidence = (1.0 - penalty).clamp(0.0, 1.0);
        let is_hallucination =
            confidence < threshold || flags.iter().any(|f| f.severity.is_severe());
        Self {
            flags,
            confidence,
            is_hallucination,
        }
    }

    /// `true` if any flag fired.
    pub fn has_flags(&self) -> bool {
        !self.flags.is_empty()
    }

    /// `true` if a flag of `kind` fired.
    pub fn has(&self, kind: HallucinationType) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    /// Highest severity among the flags.
    pub fn max_severity(&self) -> Option<Severity> {
        self.flags.iter().map(|f| f.severity).max()
    }
}

impl Default for DetectionReport {
    fn default() -> Self {
        Self::clean()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags_penalties() {
        let report = DetectionReport::from_flags(
            vec![
                HallucinationFlag::new(HallucinationType::FalseMemory, Severity::Critical, "x", 0.9),
                HallucinationFlag::new(HallucinationType::FalseContinuity, Severity::High, "y", 0.8),
            ],
            0.6,
        );
        assert!((report.confidence - 0.2).abs() < 1e-6);
        assert!(report.is_hallucination);
        assert_eq!(report.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_low_flags_alone_are_not_hallucination() {
        let report = DetectionReport::from_flags(
            vec![HallucinationFlag::new(
                HallucinationType::Repetition,
                Severity::Low,
                "repeated sentence",
                0.7,
            )],
            0.6,
        );
        assert!((report.confidence - 0.95).abs() < 1e-6);
        assert!(!report.is_hallucination);
    }

    #[test]
    fn test_confidence_floors_at_zero() {
        let flags = (0..5)
            .map(|_| {
                HallucinationFlag::new(HallucinationType::ProtocolMixing, Severity::Critical, "", 1.0)
            })
            .collect();
        let report = DetectionReport::from_flags(flags, 0.6);
        assert_eq!(report.confidence, 0.0);
    }

    #[test]
    fn test_flag_serializes_type_field() {
        let flag = HallucinationFlag::new(HallucinationType::FalseMemory, Severity::High, "d", 0.5)
            .with_match("I remember");
        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["type"], "false_memory");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["matched_text"], "I remember");
        assert!(json.get("crisis").is_none());
    }
}
