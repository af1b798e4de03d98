use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use exam_core::Clock;
use exam_core::model::{AnswerId, QuestionId, SubmissionReceipt, SubmissionResult};
use exam_core::session::{
    Change, IgnoreReason, QuestionView, ReviewItem, SessionProgress, SessionState, SessionStatus,
    Transition,
};
use storage::repository::SubmissionReceiptRepository;

use crate::persistence::SnapshotWriter;
use crate::submission::{RetryPolicy, SubmissionSink};

/// Input to the controller. Timer ticks and user actions share this type so
/// they can be serialized through one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    SelectAnswer {
        question_id: QuestionId,
        answer_id: AnswerId,
    },
    Navigate(usize),
    Next,
    Previous,
    Tick,
    /// Manual submit while in progress.
    Submit,
    /// Resend after retries were exhausted. Only accepted in `error`.
    RetrySubmit,
}

impl SessionEvent {
    #[must_use]
    pub fn is_tick(&self) -> bool {
        matches!(self, Self::Tick)
    }
}

type ExpireCallback = Box<dyn FnMut(&SessionState) + Send + Sync>;

/// Sole owner of a `SessionState`.
///
/// Applies one transition per event, persists after every applied change,
/// starts the submission when the session expires, and drives the retry loop
/// until the backend confirms or the attempt budget runs out.
pub struct SessionController {
    state: SessionState,
    clock: Clock,
    writer: SnapshotWriter,
    sink: Arc<dyn SubmissionSink>,
    receipts: Arc<dyn SubmissionReceiptRepository>,
    retry: RetryPolicy,
    tick_interval: Duration,
    on_expire: Option<ExpireCallback>,
    expire_notified: bool,
    resumed: bool,
}

impl SessionController {
    #[must_use]
    pub fn new(
        state: SessionState,
        clock: Clock,
        writer: SnapshotWriter,
        sink: Arc<dyn SubmissionSink>,
        receipts: Arc<dyn SubmissionReceiptRepository>,
    ) -> Self {
        Self {
            state,
            clock,
            writer,
            sink,
            receipts,
            retry: RetryPolicy::default(),
            tick_interval: Duration::from_secs(1),
            on_expire: None,
            expire_notified: false,
            resumed: false,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Length of the window a batch of events is treated as simultaneous in.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub(crate) fn with_resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    /// Register the callback run once when the session times out.
    pub fn on_expire(&mut self, callback: impl FnMut(&SessionState) + Send + Sync + 'static) {
        self.on_expire = Some(Box::new(callback));
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Mutable access to the clock, for advancing a fixed clock.
    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// True when the session was rebuilt from a stored draft.
    #[must_use]
    pub fn was_resumed(&self) -> bool {
        self.resumed
    }

    /// True once a draft read or write failed; resumption may be incomplete.
    #[must_use]
    pub fn is_persistence_degraded(&self) -> bool {
        self.writer.is_degraded()
    }

    #[must_use]
    pub fn result(&self) -> Option<&SubmissionResult> {
        self.state.result()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.state.progress(self.clock.now())
    }

    #[must_use]
    pub fn current_question_view(&self) -> Option<QuestionView> {
        self.state.current_question_view(self.clock.now())
    }

    #[must_use]
    pub fn review(&self) -> Option<Vec<ReviewItem>> {
        self.state.review()
    }

    //
    // ─── DISPATCH ──────────────────────────────────────────────────────────────
    //

    /// Apply a single event.
    ///
    /// A deadline that already passed is applied before the event, so a late
    /// click can never land after the timer ran out.
    pub async fn dispatch(&mut self, event: SessionEvent) -> Transition {
        if !event.is_tick() && self.state.status() == SessionStatus::InProgress {
            let now = self.clock.now();
            let expiry = self.state.tick(now);
            self.after(&expiry, now).await;
        }
        self.apply(event).await
    }

    /// Apply events that arrived within the same tick window.
    ///
    /// When the batch carries a tick, user events are applied first and the
    /// tick (one, however many were queued) last, so an answer given in the
    /// same window as the expiry still counts. A deadline that passed more
    /// than one tick interval ago is not in that window and is applied
    /// before anything else. Without a tick each event is dispatched on its
    /// own.
    pub async fn dispatch_batch(&mut self, events: Vec<SessionEvent>) -> Vec<Transition> {
        let mut out = Vec::with_capacity(events.len() + 1);
        if !events.iter().any(SessionEvent::is_tick) {
            for event in events {
                out.push(self.dispatch(event).await);
            }
            return out;
        }

        let now = self.clock.now();
        if self.expired_before_window(now) {
            tracing::debug!(?now, "deadline passed before this tick window");
            let expiry = self.state.tick(now);
            self.after(&expiry, now).await;
            out.push(expiry);
        }
        for event in events.into_iter().filter(|e| !e.is_tick()) {
            out.push(self.apply(event).await);
        }
        out.push(self.apply(SessionEvent::Tick).await);
        out
    }

    fn expired_before_window(&self, now: DateTime<Utc>) -> bool {
        if self.state.status() != SessionStatus::InProgress {
            return false;
        }
        self.state
            .deadline()
            .and_then(|deadline| (now - deadline).to_std().ok())
            .is_some_and(|late| late > self.tick_interval)
    }

    /// Write any debounced draft now.
    pub async fn flush(&mut self) {
        let now = self.clock.now();
        self.writer.flush(now).await;
    }

    async fn apply(&mut self, event: SessionEvent) -> Transition {
        let now = self.clock.now();
        let transition = match event {
            SessionEvent::Start => self.state.start(now),
            SessionEvent::SelectAnswer {
                question_id,
                answer_id,
            } => {
                let text = self
                    .state
                    .questions()
                    .iter()
                    .find(|q| q.id() == &question_id)
                    .and_then(|q| q.option(&answer_id))
                    .map(|o| o.text().to_string())
                    .unwrap_or_default();
                self.state.select_answer(&question_id, &answer_id, &text, now)
            }
            SessionEvent::Navigate(index) => self.state.navigate(index, now),
            SessionEvent::Next => self.state.next(now),
            SessionEvent::Previous => self.state.previous(now),
            SessionEvent::Tick => return self.on_tick(now).await,
            SessionEvent::Submit => {
                if self.state.status() != SessionStatus::InProgress {
                    Transition::Ignored(IgnoreReason::WrongStatus(self.state.status()))
                } else {
                    return self.submit(now).await;
                }
            }
            SessionEvent::RetrySubmit => {
                if self.state.status() != SessionStatus::Error {
                    Transition::Ignored(IgnoreReason::WrongStatus(self.state.status()))
                } else {
                    return self.submit(now).await;
                }
            }
        };

        if let Transition::Ignored(reason) = &transition {
            tracing::debug!(test_id = %self.state.test_id(), %reason, "event ignored");
        }
        self.after(&transition, now).await;
        transition
    }

    async fn on_tick(&mut self, now: DateTime<Utc>) -> Transition {
        let transition = self.state.tick(now);
        if transition.is_applied() {
            self.after(&transition, now).await;
        } else {
            // A draft restored mid-expiry or mid-submission picks up here.
            match self.state.status() {
                SessionStatus::Expired => {
                    self.notify_expired();
                    self.submit(now).await;
                }
                SessionStatus::Submitting => self.drive_submission().await,
                _ => {}
            }
        }
        self.writer.flush_if_due(now).await;
        transition
    }

    async fn after(&mut self, transition: &Transition, now: DateTime<Utc>) {
        let Some(change) = transition.change() else {
            return;
        };
        self.writer.record(&self.state, change, now).await;

        match change {
            Change::QuestionExpired {
                question_id,
                advanced_to,
            } => {
                tracing::info!(
                    test_id = %self.state.test_id(),
                    %question_id,
                    advanced_to,
                    "question timer expired"
                );
            }
            Change::SessionExpired => {
                tracing::info!(
                    test_id = %self.state.test_id(),
                    student_id = %self.state.student_id(),
                    "session expired; submitting"
                );
                self.notify_expired();
                self.submit(now).await;
            }
            _ => {}
        }
    }

    fn notify_expired(&mut self) {
        if self.expire_notified {
            return;
        }
        self.expire_notified = true;
        if let Some(callback) = self.on_expire.as_mut() {
            callback(&self.state);
        }
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    async fn submit(&mut self, now: DateTime<Utc>) -> Transition {
        let transition = self.state.begin_submission(Uuid::new_v4(), now);
        let Some(change) = transition.change() else {
            return transition;
        };
        self.writer.record(&self.state, change, now).await;
        self.drive_submission().await;
        transition
    }

    /// Send the frozen record until confirmed, failed for good, or found to be
    /// already graded through another session.
    async fn drive_submission(&mut self) {
        let Some(record) = self.state.answer_record().cloned() else {
            return;
        };
        let mut attempt: u32 = 0;

        while self.state.status() == SessionStatus::Submitting {
            attempt += 1;

            match self
                .receipts
                .get_receipt(&record.test_id, &record.student_id)
                .await
            {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        test_id = %record.test_id,
                        submission_id = %receipt.submission_id,
                        "session already graded elsewhere"
                    );
                    self.confirm(receipt.result).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(test_id = %record.test_id, error = %e, "receipt lookup failed");
                }
            }

            match self.sink.submit(&record).await {
                Ok(result) => {
                    tracing::info!(
                        test_id = %record.test_id,
                        student_id = %record.student_id,
                        attempt,
                        score = result.score,
                        "submission confirmed"
                    );
                    self.confirm(result).await;
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt, &e);
                    tracing::warn!(
                        test_id = %record.test_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "submission failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        test_id = %record.test_id,
                        attempt,
                        error = %e,
                        "submission failed; answers kept for manual retry"
                    );
                    let now = self.clock.now();
                    let transition = self.state.fail_submission(e.to_string());
                    if let Some(change) = transition.change() {
                        self.writer.record(&self.state, change, now).await;
                    }
                    return;
                }
            }
        }
    }

    async fn confirm(&mut self, result: SubmissionResult) {
        let now = self.clock.now();
        let transition = self.state.complete_submission(result.clone(), now);
        let Some(change) = transition.change() else {
            return;
        };
        self.writer.record(&self.state, change, now).await;

        let Some(record) = self.state.answer_record() else {
            return;
        };
        let receipt = SubmissionReceipt {
            test_id: record.test_id.clone(),
            student_id: record.student_id.clone(),
            submission_id: record.submission_id,
            result,
            submitted_at: now,
        };

        // The draft goes only once the receipt is durable; otherwise the
        // stored `submitted` draft is what keeps a reopen from starting over.
        match self.receipts.record_receipt(&receipt).await {
            Ok(_) => {
                self.writer
                    .clear(&receipt.test_id, &receipt.student_id)
                    .await;
            }
            Err(e) => {
                self.writer.mark_degraded();
                tracing::warn!(test_id = %receipt.test_id, error = %e, "receipt not stored");
            }
        }
    }
}
