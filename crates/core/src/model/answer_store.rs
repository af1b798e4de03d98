use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::ids::{AnswerId, QuestionId};

/// The answer currently chosen for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedAnswer {
    pub answer_id: AnswerId,
    pub answer_text: String,
    pub captured_at: DateTime<Utc>,
}

/// Mutable question -> answer mapping for one session.
///
/// Last write wins. No validation against the test happens here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerStore {
    answers: HashMap<QuestionId, SelectedAnswer>,
}

impl AnswerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an answer, replacing any earlier choice for the same question.
    pub fn set(
        &mut self,
        question_id: QuestionId,
        answer_id: AnswerId,
        answer_text: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) {
        self.answers.insert(
            question_id,
            SelectedAnswer {
                answer_id,
                answer_text: answer_text.into(),
                captured_at,
            },
        );
    }

    #[must_use]
    pub fn get(&self, question_id: &QuestionId) -> Option<&SelectedAnswer> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Immutable copy for persistence or submission.
    #[must_use]
    pub fn snapshot(&self) -> AnswerSnapshot {
        AnswerSnapshot {
            answers: self.answers.clone(),
        }
    }
}

/// Frozen copy of an `AnswerStore`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSnapshot {
    answers: HashMap<QuestionId, SelectedAnswer>,
}

impl AnswerSnapshot {
    #[must_use]
    pub fn get(&self, question_id: &QuestionId) -> Option<&SelectedAnswer> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn last_write_wins() {
        let mut store = AnswerStore::new();
        let q = QuestionId::new("q1");
        let picks = ["a", "c", "b", "d", "b"];
        for (i, pick) in picks.iter().enumerate() {
            let at = fixed_now() + chrono::Duration::seconds(i as i64);
            store.set(q.clone(), AnswerId::new(*pick), pick.to_uppercase(), at);
        }

        let current = store.get(&q).unwrap();
        assert_eq!(current.answer_id, AnswerId::new("b"));
        assert_eq!(current.answer_text, "B");
        assert_eq!(current.captured_at, fixed_now() + chrono::Duration::seconds(4));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let mut store = AnswerStore::new();
        let q = QuestionId::new("q1");
        store.set(q.clone(), AnswerId::new("a"), "A", fixed_now());

        let snapshot = store.snapshot();
        store.set(q.clone(), AnswerId::new("b"), "B", fixed_now());

        assert_eq!(snapshot.get(&q).unwrap().answer_id, AnswerId::new("a"));
        assert_eq!(store.get(&q).unwrap().answer_id, AnswerId::new("b"));
    }

    #[test]
    fn unknown_question_has_no_answer() {
        let store = AnswerStore::new();
        assert!(store.get(&QuestionId::new("missing")).is_none());
        assert!(store.snapshot().is_empty());
    }
}
