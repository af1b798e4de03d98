use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::countdown::Countdown;
use crate::model::{
    AnswerId, AnswerRecord, AnswerStore, Question, QuestionId, SelectedAnswer, StudentId,
    SubmissionResult, Test, TestId,
};

use super::status::{Change, IgnoreReason, SessionStatus, Transition};
use super::timing::{SessionConfig, SessionConfigError, TimingMode};

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// One student's attempt at one test.
///
/// Every mutation goes through a transition method that returns a `Transition`.
/// Events that do not fit the current status come back as `Transition::Ignored`
/// and leave the state untouched; once `submitted`, nothing changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    test_id: TestId,
    student_id: StudentId,
    questions: Vec<Question>,
    config: SessionConfig,
    status: SessionStatus,
    current: usize,
    countdown: Option<Countdown>,
    /// Per-question mode only: milliseconds left on questions that are not current.
    question_remaining_ms: Vec<i64>,
    timed_out: Vec<bool>,
    answers: AnswerStore,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    pending: Option<AnswerRecord>,
    result: Option<SubmissionResult>,
    last_error: Option<String>,
    revision: u64,
}

impl SessionState {
    /// Create a fresh session. The question list is copied out of `test`, so
    /// later edits to the test never reach this session.
    ///
    /// # Errors
    ///
    /// Returns `SessionConfigError` when the timing mode has no backing durations.
    pub fn new(
        test: &Test,
        student_id: StudentId,
        config: SessionConfig,
    ) -> Result<Self, SessionConfigError> {
        let questions = test.questions().to_vec();

        let question_remaining_ms = match config.timing {
            TimingMode::WholeTest { duration_secs } => {
                if duration_secs == 0 {
                    return Err(SessionConfigError::MissingTestDuration);
                }
                Vec::new()
            }
            TimingMode::PerQuestion => questions
                .iter()
                .map(|q| {
                    q.duration_secs()
                        .filter(|d| *d > 0)
                        .map(|d| i64::from(d) * 1_000)
                        .ok_or_else(|| SessionConfigError::MissingQuestionDuration(q.id().clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let count = questions.len();
        Ok(Self {
            test_id: test.id().clone(),
            student_id,
            questions,
            config,
            status: SessionStatus::NotStarted,
            current: 0,
            countdown: None,
            question_remaining_ms,
            timed_out: vec![false; count],
            answers: AnswerStore::new(),
            started_at: None,
            submitted_at: None,
            pending: None,
            result: None,
            last_error: None,
            revision: 0,
        })
    }

    // ─── accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    #[must_use]
    pub fn student_id(&self) -> &StudentId {
        &self.student_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    #[must_use]
    pub fn timing(&self) -> TimingMode {
        self.config.timing
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    #[must_use]
    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    #[must_use]
    pub fn selected_answer(&self, question_id: &QuestionId) -> Option<&SelectedAnswer> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    /// Frozen payload, present from the first `submitting` transition on.
    #[must_use]
    pub fn answer_record(&self) -> Option<&AnswerRecord> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&SubmissionResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Monotonic counter bumped by every applied transition.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Seconds left on the running countdown, if any.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u32> {
        self.countdown.as_ref().map(|c| c.remaining(now))
    }

    /// Seconds left for a question in per-question mode.
    #[must_use]
    pub fn question_remaining_secs(&self, index: usize, now: DateTime<Utc>) -> Option<u32> {
        if self.config.timing != TimingMode::PerQuestion {
            return None;
        }
        if index == self.current {
            return self.remaining_secs(now);
        }
        self.question_remaining_ms
            .get(index)
            .map(|ms| u32::try_from((ms + 999) / 1_000).unwrap_or(u32::MAX))
    }

    /// True when the question's own timer ran out and edits are not allowed.
    #[must_use]
    pub fn is_locked(&self, index: usize) -> bool {
        !self.config.allow_edit_after_timeout && self.timed_out.get(index).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn is_timed_out(&self, index: usize) -> bool {
        self.timed_out.get(index).copied().unwrap_or(false)
    }

    fn index_of(&self, question_id: &QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| q.id() == question_id)
    }

    // ─── transitions ──────────────────────────────────────────────────────────

    fn applied(&mut self, change: Change) -> Transition {
        self.revision += 1;
        Transition::Applied(change)
    }

    fn wrong_status(&self) -> Transition {
        Transition::Ignored(IgnoreReason::WrongStatus(self.status))
    }

    fn question_countdown(&self, index: usize, now: DateTime<Utc>) -> Option<Countdown> {
        if self.timed_out.get(index).copied().unwrap_or(true) {
            return None;
        }
        let duration = self.questions.get(index)?.duration_secs()?;
        let left = Duration::milliseconds(*self.question_remaining_ms.get(index)?);
        Some(Countdown::resume_from(duration, left, now, now))
    }

    /// `not_started` -> `in_progress`: start the clock and show question 0.
    pub fn start(&mut self, now: DateTime<Utc>) -> Transition {
        if self.status != SessionStatus::NotStarted {
            return self.wrong_status();
        }

        self.current = 0;
        self.countdown = match self.config.timing {
            TimingMode::WholeTest { duration_secs } => Some(Countdown::start(duration_secs, now)),
            TimingMode::PerQuestion => self.question_countdown(0, now),
        };
        self.started_at = Some(now);
        self.status = SessionStatus::InProgress;
        self.applied(Change::Started)
    }

    /// Record an answer for a question, replacing any earlier choice.
    pub fn select_answer(
        &mut self,
        question_id: &QuestionId,
        answer_id: &AnswerId,
        answer_text: &str,
        now: DateTime<Utc>,
    ) -> Transition {
        if !self.status.accepts_answers() {
            return self.wrong_status();
        }
        let Some(index) = self.index_of(question_id) else {
            return Transition::Ignored(IgnoreReason::UnknownQuestion(question_id.clone()));
        };
        if !self.questions[index].has_option(answer_id) {
            return Transition::Ignored(IgnoreReason::UnknownAnswer);
        }
        // A running per-question timer only covers the question on screen.
        if self.config.timing == TimingMode::PerQuestion && index != self.current {
            return Transition::Ignored(IgnoreReason::NotCurrentQuestion);
        }
        if self.is_locked(index) {
            return Transition::Ignored(IgnoreReason::QuestionLocked);
        }

        self.answers
            .set(question_id.clone(), answer_id.clone(), answer_text, now);
        self.applied(Change::AnswerSelected {
            question_id: question_id.clone(),
        })
    }

    /// Move to another question. Out-of-range targets are a no-op.
    pub fn navigate(&mut self, target: usize, now: DateTime<Utc>) -> Transition {
        if !self.status.accepts_answers() {
            return self.wrong_status();
        }
        if target >= self.questions.len() {
            return Transition::Ignored(IgnoreReason::OutOfBounds { index: target });
        }
        if target == self.current {
            return Transition::Unchanged;
        }

        let from = self.current;
        if self.config.timing == TimingMode::PerQuestion {
            let left = self
                .countdown
                .as_ref()
                .map_or(0, |c| c.remaining_time(now).num_milliseconds());
            if let Some(slot) = self.question_remaining_ms.get_mut(from) {
                *slot = left;
            }
            if left == 0 {
                self.timed_out[from] = true;
            }
            self.countdown = self.question_countdown(target, now);
        }

        self.current = target;
        self.applied(Change::Navigated { from, to: target })
    }

    /// Move one question forward.
    pub fn next(&mut self, now: DateTime<Utc>) -> Transition {
        match self.current.checked_add(1) {
            Some(target) => self.navigate(target, now),
            None => Transition::Ignored(IgnoreReason::OutOfBounds { index: self.current }),
        }
    }

    /// Move one question back. Going back from question 0 is a no-op.
    pub fn previous(&mut self, now: DateTime<Utc>) -> Transition {
        match self.current.checked_sub(1) {
            Some(target) => self.navigate(target, now),
            None => Transition::Ignored(IgnoreReason::OutOfBounds { index: 0 }),
        }
    }

    /// Apply the passage of time.
    ///
    /// The first tick of a `not_started` session starts it. While in progress,
    /// an expired per-question timer locks that question and advances to the
    /// next question with time left; past the last question, or when the
    /// whole-test timer runs out, the session becomes `expired`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Transition {
        match self.status {
            SessionStatus::NotStarted => self.start(now),
            SessionStatus::InProgress => self.tick_in_progress(now),
            _ => Transition::Unchanged,
        }
    }

    fn tick_in_progress(&mut self, now: DateTime<Utc>) -> Transition {
        let fired = self
            .countdown
            .as_mut()
            .is_some_and(|c| c.poll_expired(now));

        match self.config.timing {
            TimingMode::WholeTest { .. } => {
                if fired {
                    self.expire()
                } else {
                    Transition::Unchanged
                }
            }
            TimingMode::PerQuestion => {
                if fired {
                    self.expire_current_question(now)
                } else if self.timed_out.iter().all(|t| *t) {
                    self.expire()
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    fn expire(&mut self) -> Transition {
        self.status = SessionStatus::Expired;
        self.applied(Change::SessionExpired)
    }

    fn expire_current_question(&mut self, now: DateTime<Utc>) -> Transition {
        let index = self.current;
        self.timed_out[index] = true;
        if let Some(slot) = self.question_remaining_ms.get_mut(index) {
            *slot = 0;
        }

        let next = (index + 1..self.questions.len()).find(|i| !self.timed_out[*i]);
        match next {
            Some(target) => {
                let question_id = self.questions[index].id().clone();
                self.current = target;
                self.countdown = self.question_countdown(target, now);
                self.applied(Change::QuestionExpired {
                    question_id,
                    advanced_to: target,
                })
            }
            None => self.expire(),
        }
    }

    /// Freeze answers and build the payload.
    ///
    /// Accepted from `in_progress` (manual submit), `expired` (automatic) and
    /// `error` (manual retry). A retry reuses the payload frozen the first time,
    /// so the backend always sees the same submission id and answers.
    pub fn begin_submission(&mut self, submission_id: Uuid, now: DateTime<Utc>) -> Transition {
        match self.status {
            SessionStatus::InProgress | SessionStatus::Expired | SessionStatus::Error => {}
            _ => return self.wrong_status(),
        }

        if self.pending.is_none() {
            let started_at = self.started_at.unwrap_or(now);
            self.pending = Some(AnswerRecord::build(
                submission_id,
                self.test_id.clone(),
                self.student_id.clone(),
                &self.questions,
                &self.answers.snapshot(),
                started_at,
                now,
            ));
        }
        self.last_error = None;
        self.status = SessionStatus::Submitting;
        self.applied(Change::SubmissionStarted)
    }

    /// `submitting` -> `submitted` on a confirmed backend result.
    pub fn complete_submission(
        &mut self,
        result: SubmissionResult,
        now: DateTime<Utc>,
    ) -> Transition {
        if self.status != SessionStatus::Submitting {
            return self.wrong_status();
        }
        self.result = Some(result);
        self.submitted_at = Some(now);
        self.status = SessionStatus::Submitted;
        self.applied(Change::Submitted)
    }

    /// `submitting` -> `error` once retries are exhausted. Answers are kept.
    pub fn fail_submission(&mut self, message: impl Into<String>) -> Transition {
        if self.status != SessionStatus::Submitting {
            return self.wrong_status();
        }
        self.last_error = Some(message.into());
        self.status = SessionStatus::Error;
        self.applied(Change::SubmissionFailed)
    }

    /// Rebuild countdowns after the session was reloaded from a snapshot
    /// written at `saved_at`.
    ///
    /// Time that passed while the session was closed is charged in full and
    /// the deadline never moves later, however often the session is reloaded.
    pub fn restore_after_reload(&mut self, saved_at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(countdown) = self.countdown.as_mut() {
            if !countdown.has_fired() {
                countdown.rebase(saved_at, now);
            }
        }
    }

    /// Deadline of the running countdown, if it has not fired yet.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.countdown
            .as_ref()
            .filter(|c| !c.has_fired())
            .map(Countdown::deadline)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
