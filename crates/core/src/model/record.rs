use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::answer_store::AnswerSnapshot;
use crate::model::ids::{AnswerId, QuestionId, StudentId, TestId};
use crate::model::question::Question;

/// One line of the submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_id: QuestionId,
    pub answer_id: Option<AnswerId>,
    /// When the answer was last changed; `None` for unanswered questions.
    pub captured_at: Option<DateTime<Utc>>,
}

/// Final answer set sent to the submission sink.
///
/// Holds exactly one entry per question, in the order the test was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub submission_id: Uuid,
    pub test_id: TestId,
    pub student_id: StudentId,
    pub answers: Vec<AnswerEntry>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

impl AnswerRecord {
    /// Build the payload from the question order and a frozen answer snapshot.
    #[must_use]
    pub fn build(
        submission_id: Uuid,
        test_id: TestId,
        student_id: StudentId,
        questions: &[Question],
        answers: &AnswerSnapshot,
        started_at: DateTime<Utc>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let answers = questions
            .iter()
            .map(|q| {
                let selected = answers.get(q.id());
                AnswerEntry {
                    question_id: q.id().clone(),
                    answer_id: selected.map(|s| s.answer_id.clone()),
                    captured_at: selected.map(|s| s.captured_at),
                }
            })
            .collect();

        Self {
            submission_id,
            test_id,
            student_id,
            answers,
            started_at,
            submitted_at,
        }
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.answer_id.is_some()).count()
    }
}

/// Server verdict for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCorrectness {
    pub question_id: QuestionId,
    pub correct: bool,
}

/// Server-computed outcome of a submission. Never derived locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub score: f64,
    #[serde(default)]
    pub per_question_correctness: Vec<QuestionCorrectness>,
}

impl SubmissionResult {
    #[must_use]
    pub fn correctness_of(&self, question_id: &QuestionId) -> Option<bool> {
        self.per_question_correctness
            .iter()
            .find(|c| &c.question_id == question_id)
            .map(|c| c.correct)
    }
}

/// Durable proof that a session was accepted by the backend.
///
/// Survives the deletion of the session draft, so a second tab or a later
/// reopen can see that the attempt is already graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub test_id: TestId,
    pub student_id: StudentId,
    pub submission_id: Uuid,
    pub result: SubmissionResult,
    pub submitted_at: DateTime<Utc>,
}
