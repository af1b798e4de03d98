use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::QuestionId;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Submitting,
    Submitted,
    Expired,
    Error,
}

impl SessionStatus {
    /// No further mutation is accepted once submitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted)
    }

    /// Answers and navigation are frozen in every state but `in_progress`.
    #[must_use]
    pub fn accepts_answers(self) -> bool {
        matches!(self, Self::InProgress)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change that was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Started,
    AnswerSelected {
        question_id: QuestionId,
    },
    Navigated {
        from: usize,
        to: usize,
    },
    QuestionExpired {
        question_id: QuestionId,
        advanced_to: usize,
    },
    SessionExpired,
    SubmissionStarted,
    Submitted,
    SubmissionFailed,
}

impl Change {
    /// Changes that must reach durable storage without debouncing.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        !matches!(self, Self::AnswerSelected { .. } | Self::Navigated { .. })
    }
}

/// Why an event was dropped. Dropped events never mutate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    WrongStatus(SessionStatus),
    OutOfBounds { index: usize },
    UnknownQuestion(QuestionId),
    UnknownAnswer,
    NotCurrentQuestion,
    QuestionLocked,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongStatus(s) => write!(f, "not accepted while {s}"),
            Self::OutOfBounds { index } => write!(f, "index {index} out of bounds"),
            Self::UnknownQuestion(id) => write!(f, "unknown question {id}"),
            Self::UnknownAnswer => f.write_str("answer does not belong to question"),
            Self::NotCurrentQuestion => f.write_str("question is not the current one"),
            Self::QuestionLocked => f.write_str("question time ran out"),
        }
    }
}

/// Outcome of feeding one event to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(Change),
    /// The event was valid but nothing changed (e.g. a tick before expiry).
    Unchanged,
    Ignored(IgnoreReason),
}

impl Transition {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    #[must_use]
    pub fn change(&self) -> Option<&Change> {
        match self {
            Self::Applied(c) => Some(c),
            _ => None,
        }
    }
}
