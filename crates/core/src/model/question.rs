use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::ids::{AnswerId, QuestionId};
use crate::model::test::TestError;

/// Minimum number of answer options a question may offer.
pub const MIN_OPTIONS: usize = 2;
/// Maximum number of answer options a question may offer.
pub const MAX_OPTIONS: usize = 4;

//
// ─── STIMULUS ──────────────────────────────────────────────────────────────────
//

/// Declared kind of supporting material, as stored by the authoring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusKind {
    #[default]
    None,
    Text,
    Image,
}

/// Reading passage or image shown above a question.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Stimulus {
    #[default]
    None,
    Text(String),
    Image(String),
}

impl Stimulus {
    /// Build a stimulus from its declared kind and raw value.
    ///
    /// A declared text/image stimulus with a blank value is treated as absent.
    #[must_use]
    pub fn from_parts(kind: StimulusKind, value: Option<String>) -> Self {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        match (kind, value) {
            (StimulusKind::Text, Some(v)) => Self::Text(v),
            (StimulusKind::Image, Some(v)) => Self::Image(v),
            _ => Self::None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> StimulusKind {
        match self {
            Self::None => StimulusKind::None,
            Self::Text(_) => StimulusKind::Text,
            Self::Image(_) => StimulusKind::Image,
        }
    }

    /// Resolve an image stimulus reference against the API base URL.
    ///
    /// Absolute references pass through; `/storage/..` paths hang off the base;
    /// `/images/..` paths and bare file names live under `/storage/images`.
    /// Returns `None` for non-image stimuli.
    #[must_use]
    pub fn image_url(&self, api_base: &Url) -> Option<String> {
        let Self::Image(reference) = self else {
            return None;
        };
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Some(reference.clone());
        }

        let base = api_base.as_str().trim_end_matches('/');
        let resolved = if reference.starts_with("/storage/") {
            format!("{base}{reference}")
        } else if reference.starts_with("/images/") {
            format!("{base}/storage{reference}")
        } else {
            format!("{base}/storage/images/{}", reference.trim_start_matches('/'))
        };
        Some(resolved)
    }
}

//
// ─── ANSWER OPTION ─────────────────────────────────────────────────────────────
//

/// One selectable answer. Carries no correctness information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    id: AnswerId,
    text: String,
}

impl AnswerOption {
    #[must_use]
    pub fn new(id: AnswerId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &AnswerId {
        &self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// Unvalidated question as received from a test source.
#[derive(Debug, Clone, Default)]
pub struct QuestionDraft {
    pub id: Option<QuestionId>,
    pub text: String,
    pub stimulus: Stimulus,
    pub options: Vec<AnswerOption>,
    pub explanation: Option<String>,
    pub duration_secs: Option<u32>,
}

impl QuestionDraft {
    #[must_use]
    pub fn new(id: impl Into<QuestionId>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_option(mut self, id: impl Into<AnswerId>, text: impl Into<String>) -> Self {
        self.options.push(AnswerOption::new(id.into(), text));
        self
    }

    #[must_use]
    pub fn with_stimulus(mut self, stimulus: Stimulus) -> Self {
        self.stimulus = stimulus;
        self
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    #[must_use]
    pub fn with_duration_secs(mut self, secs: u32) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Validate the draft into an immutable `Question`.
    ///
    /// # Errors
    ///
    /// Returns `TestError` when the id is missing, the option count is outside
    /// `2..=4`, option ids repeat, or the duration is zero.
    pub fn validate(self) -> Result<Question, TestError> {
        let id = self.id.ok_or(TestError::MissingQuestionId)?;

        let count = self.options.len();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&count) {
            return Err(TestError::OptionCount {
                question_id: id,
                count,
            });
        }

        for (i, option) in self.options.iter().enumerate() {
            if self.options[..i].iter().any(|o| o.id == option.id) {
                return Err(TestError::DuplicateAnswerId(option.id.clone()));
            }
        }

        if self.duration_secs == Some(0) {
            return Err(TestError::ZeroQuestionDuration(id));
        }

        let explanation = self
            .explanation
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        Ok(Question {
            id,
            text: self.text,
            stimulus: self.stimulus,
            options: self.options,
            explanation,
            duration_secs: self.duration_secs,
        })
    }
}

/// A validated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    text: String,
    stimulus: Stimulus,
    options: Vec<AnswerOption>,
    explanation: Option<String>,
    duration_secs: Option<u32>,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn stimulus(&self) -> &Stimulus {
        &self.stimulus
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        &self.options
    }

    /// Per-question time budget in seconds, when the test uses one.
    #[must_use]
    pub fn duration_secs(&self) -> Option<u32> {
        self.duration_secs
    }

    #[must_use]
    pub fn has_option(&self, answer_id: &AnswerId) -> bool {
        self.options.iter().any(|o| &o.id == answer_id)
    }

    #[must_use]
    pub fn option(&self, answer_id: &AnswerId) -> Option<&AnswerOption> {
        self.options.iter().find(|o| &o.id == answer_id)
    }

    // Only the post-submission review may read this.
    pub(crate) fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}
