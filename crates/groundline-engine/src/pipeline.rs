//! The hallucination-prevention pipeline.
//!
//! Stages run in a fixed order over one draft reply:
//! 1. detached grounding lookup (never affects the result)
//! 2. claim verification
//! 3. hallucination detection, followed by correction when flags fired
//! 4. final repetition sweep
//!
//! Confidence starts at 1.0 and is multiplied down by every stage that
//! finds a problem.

use std::sync::Arc;

use groundline_core::{ConversationTurn, GroundingResult};
use groundline_memory::Candidate;
use groundline_verify::{dedupe_sentences, ReasoningVerifier, Verification};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineOptions;
use crate::engine::GroundingEngine;

/// Multiplier applied when the claim verifier rewrote the reply.
const VERIFIER_REVISION_FACTOR: f32 = 0.8;
/// Multiplier applied when the final sweep removed repetition.
const FINAL_SWEEP_FACTOR: f32 = 0.9;

/// Outcome of [`GroundingEngine::prevent_hallucinations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The reply to send: the corrected text, or the original draft.
    pub processed_response: String,
    /// `true` iff `processed_response` differs from the draft.
    pub was_revised: bool,
    /// Aggregate confidence in `[0, 1]`.
    pub confidence: f32,
    /// Human-readable trail of what each stage found and changed.
    pub issue_details: Vec<String>,
}

impl PipelineResult {
    /// The fail-open result: the draft untouched, full confidence.
    pub fn unchanged(reply: &str) -> Self {
        Self {
            processed_response: reply.to_string(),
            was_revised: false,
            confidence: 1.0,
            issue_details: Vec::new(),
        }
    }
}

impl GroundingEngine {
    /// Verify, scan and correct a draft reply.
    ///
    /// Never fails: a failing verifier or detector makes the whole call
    /// return the unchanged draft, as does a result that would be empty.
    pub async fn prevent_hallucinations(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        options: &PipelineOptions,
    ) -> PipelineResult {
        if options.enable_rag {
            // Detached; nothing waits for the lookup.
            drop(self.spawn_grounding_lookup(input, options));
        }

        let mut text = reply.to_string();
        let mut confidence = 1.0_f32;
        let mut issues = Vec::new();
        let mut stage_failed = false;

        if options.enable_reasoning {
            match self.verify_claims(&text, input, history, options) {
                Ok(verification) => {
                    for step in verification
                        .steps
                        .iter()
                        .filter(|s| s.confidence < options.reasoning_threshold)
                    {
                        issues.push(format!(
                            "unsupported claim ({:.2}): {}",
                            step.confidence, step.claim
                        ));
                    }
                    if verification.revised {
                        confidence *= VERIFIER_REVISION_FACTOR;
                        text = verification.text;
                    }
                }
                Err(e) => {
                    warn!(stage = "reasoning", error = %e, "Stage failed, skipping");
                    stage_failed = true;
                }
            }
        }

        if options.enable_detection {
            let evidence = self.memory_evidence(&text).await;
            match self.scan(&text, input, history, &evidence) {
                Ok(report) if report.has_flags() => {
                    confidence *= report.confidence;
                    issues.extend(
                        report
                            .flags
                            .iter()
                            .map(|f| format!("{} {}: {}", f.severity, f.kind, f.description)),
                    );
                    let outcome = self.corrector.correct(&text, input, &report.flags);
                    if outcome.safety_override {
                        info!("Reply replaced with safety message");
                    }
                    issues.extend(outcome.applied);
                    text = outcome.text;
                }
                Ok(_) => debug!("No hallucination flags"),
                Err(e) => {
                    warn!(stage = "detection", error = %e, "Stage failed, skipping");
                    stage_failed = true;
                }
            }
        }

        if stage_failed {
            warn!("Returning the draft unchanged after a failed stage");
            return PipelineResult::unchanged(reply);
        }

        let swept = dedupe_sentences(&text, self.config.detection.dedupe_threshold);
        if swept != text {
            confidence *= FINAL_SWEEP_FACTOR;
            issues.push("removed residual repetition".to_string());
            text = swept;
        }

        if text.trim().is_empty() {
            warn!("Pipeline produced an empty reply, returning the draft");
            return PipelineResult::unchanged(reply);
        }

        let was_revised = text != reply;
        if was_revised {
            info!(
                confidence,
                issues = issues.len(),
                "Reply revised by grounding pipeline"
            );
        }
        PipelineResult {
            processed_response: text,
            was_revised,
            confidence: confidence.clamp(0.0, 1.0),
            issue_details: issues,
        }
    }

    /// Start a detached retrieval for `input` over the configured grounding
    /// collections. The pipeline drops the handle; other callers may await
    /// it to inspect the candidates.
    pub fn spawn_grounding_lookup(
        &self,
        input: &str,
        options: &PipelineOptions,
    ) -> JoinHandle<Vec<Candidate>> {
        let retriever = Arc::clone(&self.retriever);
        let collections = options.grounding_collections.clone();
        let retrieval = options.retrieval_options();
        let query = input.to_string();
        tokio::spawn(async move {
            let candidates = retriever.retrieve(&query, &collections, &retrieval).await;
            debug!(
                candidates = candidates.len(),
                best = candidates.first().map(Candidate::score),
                "Background grounding lookup complete"
            );
            candidates
        })
    }

    fn verify_claims(
        &self,
        text: &str,
        input: &str,
        history: &[ConversationTurn],
        options: &PipelineOptions,
    ) -> GroundingResult<Verification> {
        match &self.checker {
            Some(checker) => checker.check(text, input, history),
            None => Ok(ReasoningVerifier::with_threshold(options.reasoning_threshold)
                .verify(text, input, history)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> GroundingEngine {
        GroundingEngine::new(EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_clean_reply_passes_through() {
        let engine = engine();
        engine.init().await;
        let reply = "That sounds really hard. What has helped so far?";
        let result = engine
            .prevent_hallucinations(reply, "Work is stressful", &[], &PipelineOptions::default())
            .await;
        assert_eq!(result.processed_response, reply);
        assert!(!result.was_revised);
        assert_eq!(result.confidence, 1.0);
        assert!(result.issue_details.is_empty());
    }

    #[tokio::test]
    async fn test_repetition_only_reply() {
        let engine = engine();
        let result = engine
            .prevent_hallucinations(
                "I hear you. I hear you. What's next?",
                "ok",
                &[],
                &PipelineOptions::default(),
            )
            .await;
        assert_eq!(result.processed_response, "I hear you. What's next?");
        assert!(result.was_revised);
        // One low repetition flag: 1.0 - 0.05
        assert!((result.confidence - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stages_can_be_disabled() {
        let engine = engine();
        let options = PipelineOptions {
            enable_rag: false,
            enable_reasoning: false,
            enable_detection: false,
            ..PipelineOptions::default()
        };
        let reply = "I remember you told me about your job loss last week.";
        let result = engine.prevent_hallucinations(reply, "hi", &[], &options).await;
        assert_eq!(result.processed_response, reply);
        assert!(!result.was_revised);
    }

    #[tokio::test]
    async fn test_final_sweep_without_detection() {
        let engine = engine();
        let options = PipelineOptions {
            enable_reasoning: false,
            enable_detection: false,
            ..PipelineOptions::default()
        };
        let result = engine
            .prevent_hallucinations("Breathe slowly. Breathe slowly.", "help", &[], &options)
            .await;
        assert_eq!(result.processed_response, "Breathe slowly.");
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert_eq!(result.issue_details, vec!["removed residual repetition"]);
    }

    #[tokio::test]
    async fn test_grounding_lookup_can_be_awaited() {
        let engine = engine();
        engine.init().await;
        engine
            .add_knowledge(
                "knowledge",
                "Anxiety before exams is common and manageable.",
                Default::default(),
            )
            .await
            .unwrap();
        let candidates = engine
            .spawn_grounding_lookup("anxious about exams", &PipelineOptions::default())
            .await
            .unwrap();
        assert!(candidates
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.score())));
    }
}
