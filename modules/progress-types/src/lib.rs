//! Shared types for the progress monitor and its streaming/listing clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumString};

// =====================================================
// Event Types
// =====================================================

/// Execution phase an event belongs to. Set by whoever produces the event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    #[default]
    Task,
    Review,
    Codex,
    Plan,
}

/// Payload of an event, discriminated by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A line of free-form output
    Output { text: String },
    /// Start of a named section (`--- name ---`)
    Section { name: String },
    /// A signal token emitted by the executor (e.g. `REVIEW_DONE`)
    Signal { signal: String },
    /// A question waiting for one of `options`
    Question {
        question_id: String,
        question: String,
        options: Vec<String>,
    },
    /// A previously published question has been answered
    QuestionAnswered { question_id: String, answer: String },
}

/// A single unit of information streamed to viewers of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(phase: Phase, kind: EventKind) -> Self {
        Self {
            phase,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn output(phase: Phase, text: impl Into<String>) -> Self {
        Self::new(phase, EventKind::Output { text: text.into() })
    }

    pub fn section(phase: Phase, name: impl Into<String>) -> Self {
        Self::new(phase, EventKind::Section { name: name.into() })
    }

    pub fn signal(phase: Phase, signal: impl Into<String>) -> Self {
        Self::new(phase, EventKind::Signal { signal: signal.into() })
    }

    pub fn question(
        phase: Phase,
        question_id: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self::new(
            phase,
            EventKind::Question {
                question_id: question_id.into(),
                question: question.into(),
                options,
            },
        )
    }

    pub fn question_answered(phase: Phase, question_id: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::new(
            phase,
            EventKind::QuestionAnswered {
                question_id: question_id.into(),
                answer: answer.into(),
            },
        )
    }

    /// Override the timestamp (used when replaying lines that carry their own).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Text of an output event, if this is one
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Output { text } => Some(text),
            _ => None,
        }
    }
}

// =====================================================
// Session Types
// =====================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// Progress file is locked by a running writer
    Active,
    /// No lock held; the session has finished or was interrupted
    #[default]
    Completed,
}

/// Information parsed from the progress file header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Plan file path, or the plan description in plan mode
    pub plan_path: String,
    pub branch: String,
    /// full, review, codex-only or plan
    pub mode: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl SessionMetadata {
    pub fn is_plan_mode(&self) -> bool {
        self.mode == "plan"
    }
}

/// An interrupted plan-creation session that can be picked up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableSession {
    pub progress_path: PathBuf,
    pub plan_description: String,
    pub branch: String,
    pub start_time: Option<DateTime<Utc>>,
    pub dir: PathBuf,
    /// Number of answered questions found in the log
    pub qa_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_options: Vec<String>,
}
