//! Verification layer of the grounding engine.
//!
//! Checks a draft reply against the conversation it answers: claim-level
//! reasoning verification, rule-based hallucination detection, and
//! targeted correction of what the detector flags. Every heuristic is a
//! row in one of the pattern tables of [`patterns`].
//!
//! # Main types
//!
//! - [`ReasoningVerifier`] — Scores claims about the user and hedges the weak ones.
//! - [`HallucinationDetector`] — Ordered battery of checks producing a [`DetectionReport`].
//! - [`HallucinationFlag`] — One finding, typed by [`HallucinationType`] and [`Severity`](groundline_core::Severity).
//! - [`Corrector`] — Applies fixes for flags in priority order.
//! - [`PatternTable`] — Compiled, ordered `{pattern, category, severity}` rows.

/// Targeted correction of flagged replies.
pub mod corrector;
/// Rule-based hallucination detection.
pub mod detector;
/// Flag and report types.
pub mod flag;
/// Pattern tables and matching helpers.
pub mod patterns;
/// Claim-level reasoning verification.
pub mod reasoning;

pub use corrector::{dedupe_sentences, safety_message, CorrectionOutcome, Corrector, DEDUPE_THRESHOLD};
pub use detector::{DetectorConfig, EvidenceContext, HallucinationDetector, HallucinationScanner};
pub use flag::{DetectionReport, HallucinationFlag, HallucinationType};
pub use patterns::{CrisisCategory, PatternMatch, PatternRule, PatternTable, Polarity};
pub use reasoning::{ClaimChecker, ClaimKind, ReasoningStep, ReasoningVerifier, Verification};
