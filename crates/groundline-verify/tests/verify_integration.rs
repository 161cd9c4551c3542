#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the groundline-verify crate.
//!
//! Exercises the detector, verifier and corrector together the way the
//! pipeline chains them.

use groundline_core::{ConversationTurn, Severity};
use groundline_verify::{
    safety_message, ClaimChecker, Corrector, CrisisCategory, DetectionReport, DetectorConfig,
    EvidenceContext, HallucinationDetector, HallucinationScanner, HallucinationType,
    ReasoningVerifier,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn detect(reply: &str, input: &str, history: &[ConversationTurn]) -> DetectionReport {
    HallucinationDetector::new().detect(reply, input, history, &EvidenceContext::default())
}

fn short_histories() -> Vec<Vec<ConversationTurn>> {
    vec![
        vec![],
        vec![ConversationTurn::user("hello")],
        vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant("Hi, what's on your mind?"),
        ],
    ]
}

// ---------------------------------------------------------------------------
// Detection laws
// ---------------------------------------------------------------------------

#[test]
fn test_new_conversation_memory_claims_are_always_flagged() {
    let replies = [
        "You mentioned your sister is visiting.",
        "You mentioned the move to Berlin.",
        "You mentioned that.",
        "I remember you told me about your dog.",
    ];
    // The second input repeats the remembered content literally.
    let inputs = ["ok", "my sister is visiting and the move to Berlin is soon"];
    for history in short_histories() {
        for (reply, input) in replies
            .iter()
            .flat_map(|r| inputs.iter().map(move |i| (*r, *i)))
        {
            let report = detect(reply, input, &history);
            assert!(report.is_hallucination, "{reply} with {} turns", history.len());
            assert!(
                report.flags.iter().any(|f| matches!(
                    f.kind,
                    HallucinationType::FalseMemory | HallucinationType::FalseContinuity
                ) && f.severity >= Severity::High),
                "{reply}: {:?}",
                report.flags
            );
        }
    }
}

#[test]
fn test_detection_is_idempotent() {
    let history = vec![
        ConversationTurn::user("I can't sleep"),
        ConversationTurn::assistant("That sounds exhausting."),
        ConversationTurn::user("It has been weeks"),
    ];
    let replies = [
        "That sounds exhausting. That sounds exhausting.",
        "You seem happy! As we discussed last time, Sarah can help on 12/04.",
        "If you feel suicidal, call 988. Maybe grab brunch after.",
        "",
    ];
    let detector = HallucinationDetector::new();
    for reply in replies {
        let a = detector.detect(reply, "still awake", &history, &EvidenceContext::default());
        let b = detector.detect(reply, "still awake", &history, &EvidenceContext::default());
        assert_eq!(a, b, "{reply}");
    }
}

#[test]
fn test_confidence_stays_in_bounds() {
    let replies = [
        "",
        "Fine.",
        "I remember you told me about Paris last week. As we discussed before, Tom said 40% on Monday.",
        "Cheer up! You seem happy. You seem sad. Breathe. Breathe. Breathe. Breathe.",
    ];
    for reply in replies {
        let report = detect(reply, "I feel hopeless", &[]);
        assert!((0.0..=1.0).contains(&report.confidence), "{reply}");
        for flag in &report.flags {
            assert!((0.0..=1.0).contains(&flag.confidence_score));
        }
    }
}

#[test]
fn test_opposite_emotion_claims_contradict() {
    let report = detect(
        "You seem happy about the news. You seem sad about the change.",
        "so there is news",
        &[],
    );
    let flag = report
        .flags
        .iter()
        .find(|f| f.kind == HallucinationType::LogicalContradiction)
        .unwrap();
    assert_eq!(flag.severity, Severity::Medium);
}

#[test]
fn test_detector_config_from_partial_json() {
    let config: DetectorConfig =
        serde_json::from_str(r#"{ "new_conversation_turns": 0, "max_entity_flags": 1 }"#).unwrap();
    assert_eq!(config.new_conversation_turns, 0);
    assert_eq!(config.max_entity_flags, 1);
    assert!((config.evidence_threshold - 0.6).abs() < 1e-6);

    let history = vec![ConversationTurn::user("hi")];
    let report = HallucinationDetector::with_config(config).detect(
        "As we discussed before, Anna and Ben and Carl can help.",
        "hi",
        &history,
        &EvidenceContext::default(),
    );
    assert!(!report.has(HallucinationType::FalseContinuity));
    assert_eq!(
        report
            .flags
            .iter()
            .filter(|f| f.kind == HallucinationType::UnsupportedEntity)
            .count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Detection + correction
// ---------------------------------------------------------------------------

#[test]
fn test_job_loss_scenario() {
    let reply = "I remember you told me about your job loss last week.";
    let input = "I just feel stuck";
    let report = detect(reply, input, &[]);

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

    let outcome = Corrector::new().correct(reply, input, &report.flags);
    assert!(!outcome.text.contains("I remember"));
    assert!(!outcome.text.contains("last week"));
    assert!(!outcome.text.trim().is_empty());
}

#[test]
fn test_repetition_fix() {
    let reply = "I hear you. I hear you. What's next?";
    let report = detect(reply, "ok", &[]);
    let outcome = Corrector::new()
        .with_dedupe_threshold(0.7)
        .correct(reply, "ok", &report.flags);
    assert_eq!(outcome.text, "I hear you. What's next?");
}

#[test]
fn test_critical_protocol_flags_override_everything() {
    let reply = "I remember you said you wanted to kill yourself. Let's plan a party! I hear you. I hear you.";
    let input = "I want to kill myself";
    let report = detect(reply, input, &[]);
    assert_eq!(report.max_severity(), Some(Severity::Critical));

    let outcome = Corrector::new().correct(reply, input, &report.flags);
    assert!(outcome.safety_override);
    assert_eq!(outcome.text, safety_message(Some(CrisisCategory::Suicide)));
}

#[test]
fn test_wrong_crisis_resources_replaced() {
    let reply = "Please reach out to an eating disorder helpline about the bingeing.";
    let input = "I keep thinking about suicide";
    let report = detect(reply, input, &[]);
    let flag = report
        .flags
        .iter()
        .find(|f| f.kind == HallucinationType::ProtocolMismatch)
        .unwrap();
    assert_eq!(flag.crisis, Some(CrisisCategory::Suicide));

    let outcome = Corrector::new().correct(reply, input, &report.flags);
    assert!(outcome.text.contains("988"));
}

#[test]
fn test_repeated_reply_removed_but_never_emptied() {
    let history = vec![
        ConversationTurn::user("hello"),
        ConversationTurn::assistant("It is okay to take things one step at a time."),
        ConversationTurn::user("I'm still struggling"),
    ];
    let only = "It is okay to take things one step at a time.";
    let report = detect(only, "help", &history);
    assert!(report.has(HallucinationType::RepeatedReply));
    let outcome = Corrector::new().correct(only, "help", &report.flags);
    assert_eq!(outcome.text, only);

    let longer = "It is okay to take things one step at a time. What feels hardest today?";
    let report = detect(longer, "help", &history);
    let outcome = Corrector::new().correct(longer, "help", &report.flags);
    assert_eq!(outcome.text, "What feels hardest today?");
}

// ---------------------------------------------------------------------------
// Trait seams
// ---------------------------------------------------------------------------

#[test]
fn test_builtin_stages_behind_trait_objects() {
    let checker: Box<dyn ClaimChecker> = Box::new(ReasoningVerifier::new());
    let scanner: Box<dyn HallucinationScanner> = Box::new(HallucinationDetector::new());

    let verification = checker
        .check("You told me your dog ran away.", "I'm sad", &[])
        .unwrap();
    assert!(verification.revised);
    assert_eq!(verification.text, "You may have indicated your dog ran away.");

    let report = scanner
        .scan(&verification.text, "I'm sad", &[], &EvidenceContext::default())
        .unwrap();
    assert!(!report.has(HallucinationType::FalseMemory));
}
