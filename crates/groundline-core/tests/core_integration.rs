#![allow(clippy::unwrap_used, clippy::expect_used)]

use groundline_core::*;

// ---------------------------------------------------------------------------
// 1. ConversationTurn serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn conversation_turn_serialization_roundtrip() {
    let turn = ConversationTurn::user("I lost my job last month");

    let json = serde_json::to_string(&turn).unwrap();
    let deserialized: ConversationTurn = serde_json::from_str(&json).unwrap();

    assert_eq!(deserialized, turn);
    assert!(json.contains("\"role\":\"user\""));
}

#[test]
fn conversation_turn_timestamp_defaults_when_missing() {
    let json = r#"{"role":"assistant","content":"How are you holding up?"}"#;
    let turn: ConversationTurn = serde_json::from_str(json).unwrap();
    assert_eq!(turn.role, Role::Assistant);
    assert!(turn.is_assistant());
}

// ---------------------------------------------------------------------------
// 2. Recent assistant replies window
// ---------------------------------------------------------------------------

#[test]
fn recent_assistant_replies_keeps_newest_in_order() {
    let history = vec![
        ConversationTurn::assistant("one"),
        ConversationTurn::user("u1"),
        ConversationTurn::assistant("two"),
        ConversationTurn::user("u2"),
        ConversationTurn::assistant("three"),
    ];

    assert_eq!(recent_assistant_replies(&history, 2), vec!["two", "three"]);
    assert_eq!(recent_assistant_replies(&history, 10).len(), 3);
    assert!(recent_assistant_replies(&[], 3).is_empty());
}

// ---------------------------------------------------------------------------
// 3. Error display
// ---------------------------------------------------------------------------

#[test]
fn error_display_includes_subsystem() {
    let err = GroundingError::Store("duplicate id 'a'".to_string());
    assert_eq!(err.to_string(), "Store error: duplicate id 'a'");

    let json_err: GroundingError = serde_json::from_str::<ConversationTurn>("{")
        .unwrap_err()
        .into();
    assert!(json_err.to_string().starts_with("JSON error"));
}

// ---------------------------------------------------------------------------
// 4. Severity
// ---------------------------------------------------------------------------

#[test]
fn severity_orders_and_penalizes() {
    assert!(Severity::Critical > Severity::High);
    assert!(Severity::Medium > Severity::Low);
    assert!(Severity::High.is_severe());
    assert!(!Severity::Medium.is_severe());
    assert!(Severity::Critical.penalty() > Severity::High.penalty());
    assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    assert_eq!(Severity::Low.to_string(), "low");
}
