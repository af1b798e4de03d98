use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{QuestionId, Test};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionConfigError {
    #[error("test carries neither a whole-test nor per-question durations")]
    NoTimingConfigured,

    #[error("per-question timing requested but question {0} has no duration")]
    MissingQuestionDuration(QuestionId),

    #[error("whole-test timing requested but the test has no duration")]
    MissingTestDuration,
}

/// How the session is timed. Exactly one mode is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimingMode {
    /// One budget for the whole test with free navigation.
    WholeTest { duration_secs: u32 },
    /// Each question has its own budget; expiry auto-advances.
    PerQuestion,
}

/// Timing choice made when a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingSelection {
    /// Per-question when every question has a duration, else whole-test.
    #[default]
    Auto,
    WholeTest,
    PerQuestion,
}

impl TimingSelection {
    /// Resolve the selection against the fields the test actually populates.
    ///
    /// # Errors
    ///
    /// Returns `SessionConfigError` when the requested mode has no backing data.
    pub fn resolve(self, test: &Test) -> Result<TimingMode, SessionConfigError> {
        let whole = test
            .duration_minutes()
            .map(|m| TimingMode::WholeTest {
                duration_secs: m.saturating_mul(60),
            });

        match self {
            Self::Auto => {
                if test.has_per_question_durations() {
                    Ok(TimingMode::PerQuestion)
                } else {
                    whole.ok_or(SessionConfigError::NoTimingConfigured)
                }
            }
            Self::WholeTest => whole.ok_or(SessionConfigError::MissingTestDuration),
            Self::PerQuestion => {
                if let Some(q) = test.questions().iter().find(|q| q.duration_secs().is_none()) {
                    return Err(SessionConfigError::MissingQuestionDuration(q.id().clone()));
                }
                Ok(TimingMode::PerQuestion)
            }
        }
    }
}

/// Per-session behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub timing: TimingMode,
    /// Whether a question whose own timer ran out may still be edited.
    pub allow_edit_after_timeout: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(timing: TimingMode) -> Self {
        Self {
            timing,
            allow_edit_after_timeout: false,
        }
    }

    #[must_use]
    pub fn with_edit_after_timeout(mut self, allow: bool) -> Self {
        self.allow_edit_after_timeout = allow;
        self
    }
}
