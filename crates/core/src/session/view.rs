use chrono::{DateTime, Utc};

use crate::model::{AnswerId, QuestionId, Stimulus};

use super::state::SessionState;
use super::status::SessionStatus;

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub status: SessionStatus,
    pub total: usize,
    pub answered: usize,
    pub unanswered: usize,
    pub current_index: usize,
    pub remaining_secs: Option<u32>,
}

/// An answer option as the live session may show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionView {
    pub id: AnswerId,
    pub text: String,
    pub selected: bool,
}

/// Everything needed to render the question on screen. Contains no
/// correctness data and no explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub number: usize,
    pub question_id: QuestionId,
    pub text: String,
    pub stimulus: Stimulus,
    pub options: Vec<OptionView>,
    pub selected_answer_id: Option<AnswerId>,
    pub locked: bool,
    pub remaining_secs: Option<u32>,
}

/// Post-submission line: the student's choice, the server verdict and the
/// explanation, which stays hidden until the session is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewItem {
    pub question_id: QuestionId,
    pub chosen_answer_id: Option<AnswerId>,
    pub correct: Option<bool>,
    pub explanation: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn progress(&self, now: DateTime<Utc>) -> SessionProgress {
        let total = self.questions().len();
        let answered = self
            .questions()
            .iter()
            .filter(|q| self.selected_answer(q.id()).is_some())
            .count();
        SessionProgress {
            status: self.status(),
            total,
            answered,
            unanswered: total - answered,
            current_index: self.current_index(),
            remaining_secs: self.remaining_secs(now),
        }
    }

    #[must_use]
    pub fn question_view(&self, index: usize, now: DateTime<Utc>) -> Option<QuestionView> {
        let question = self.questions().get(index)?;
        let selected = self.selected_answer(question.id()).map(|s| s.answer_id.clone());
        let options = question
            .options()
            .iter()
            .map(|o| OptionView {
                id: o.id().clone(),
                text: o.text().to_string(),
                selected: selected.as_ref() == Some(o.id()),
            })
            .collect();

        let remaining_secs = if index == self.current_index() {
            self.remaining_secs(now)
        } else {
            self.question_remaining_secs(index, now)
        };

        Some(QuestionView {
            index,
            number: index + 1,
            question_id: question.id().clone(),
            text: question.text().to_string(),
            stimulus: question.stimulus().clone(),
            options,
            selected_answer_id: selected,
            locked: self.is_locked(index) || !self.status().accepts_answers(),
            remaining_secs,
        })
    }

    #[must_use]
    pub fn current_question_view(&self, now: DateTime<Utc>) -> Option<QuestionView> {
        self.question_view(self.current_index(), now)
    }

    /// Per-question review. `None` until the session is submitted.
    #[must_use]
    pub fn review(&self) -> Option<Vec<ReviewItem>> {
        if self.status() != SessionStatus::Submitted {
            return None;
        }
        let result = self.result()?;
        let items = self
            .questions()
            .iter()
            .map(|q| ReviewItem {
                question_id: q.id().clone(),
                chosen_answer_id: self.selected_answer(q.id()).map(|s| s.answer_id.clone()),
                correct: result.correctness_of(q.id()),
                explanation: q.explanation().map(str::to_string),
            })
            .collect();
        Some(items)
    }
}
