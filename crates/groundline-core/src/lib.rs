//! Core types and error definitions for the Groundline grounding engine.
//!
//! This crate provides the foundational types shared across all Groundline
//! crates: error handling, conversation turns, and the text utilities every
//! retrieval and verification stage tokenizes with.
//!
//! # Main types
//!
//! - [`GroundingError`] — Unified error enum for all Groundline subsystems.
//! - [`GroundingResult`] — Convenience alias for `Result<T, GroundingError>`.
//! - [`Role`] — Author of a conversation turn (user, assistant, system).
//! - [`ConversationTurn`] — A single prior turn of the conversation history.
//! - [`Severity`] — Severity of a detected issue, ordered low to critical.

/// Error types.
pub mod error;
/// Tokenization, sentence splitting, and overlap similarity.
pub mod text;

pub use error::{GroundingError, GroundingResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Conversation types ---

/// The role of the participant that authored a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human end-user.
    User,
    /// The conversational assistant.
    Assistant,
    /// A system-level instruction or note.
    System,
}

/// A single turn of the conversation history.
///
/// History slices are ordered oldest first, newest last. The engine only
/// ever reads them; the caller owns and mutates the rolling list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The role of the turn author.
    pub role: Role,
    /// The textual content of the turn.
    pub content: String,
    /// UTC timestamp of when the turn was produced.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Creates a new turn with the given role and content, stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a new turn with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new turn with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Returns `true` if this turn was authored by the assistant.
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Returns the contents of the last `n` assistant turns, newest last.
pub fn recent_assistant_replies(history: &[ConversationTurn], n: usize) -> Vec<&str> {
    let mut replies: Vec<&str> = history
        .iter()
        .rev()
        .filter(|t| t.is_assistant())
        .take(n)
        .map(|t| t.content.as_str())
        .collect();
    replies.reverse();
    replies
}

// --- Severity ---

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; barely affects confidence.
    Low,
    /// Worth correcting.
    Medium,
    /// Marks the reply as a hallucination.
    High,
    /// Marks the reply as a hallucination and may replace it entirely.
    Critical,
}

impl Severity {
    /// Amount subtracted from a confidence score for one issue of this
    /// severity.
    pub fn penalty(self) -> f32 {
        match self {
            Severity::Low => 0.05,
            Severity::Medium => 0.15,
            Severity::High => 0.3,
            Severity::Critical => 0.5,
        }
    }

    /// `true` for [`Severity::High`] and [`Severity::Critical`].
    pub fn is_severe(self) -> bool {
        self >= Severity::High
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}
