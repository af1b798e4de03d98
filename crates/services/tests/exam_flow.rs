use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use exam_core::model::{
    AnswerId, AnswerRecord, QuestionCorrectness, QuestionDraft, QuestionId, StudentId,
    SubmissionReceipt, SubmissionResult, Test, TestDraft, TestId,
};
use exam_core::session::{
    Change, IgnoreReason, SessionSnapshot, SessionStatus, TimingSelection, Transition,
};
use exam_core::time::fixed_now;
use exam_core::Clock;
use services::{
    ExamSessionService, OpenOptions, RetryPolicy, SessionController, SessionError, SessionEvent,
    StaticTestSource, SubmissionError, SubmissionSink,
};
use storage::repository::{
    InMemoryRepository, SaveOutcome, SessionSnapshotRepository, Storage, StorageError,
};

// ─── Fixtures ──────────────────────────────────────────────────────────────────

fn question(id: &str, duration: Option<u32>) -> QuestionDraft {
    let mut draft = QuestionDraft::new(id, format!("Question {id}"))
        .with_option(format!("{id}-a").as_str(), "A")
        .with_option(format!("{id}-b").as_str(), "B")
        .with_option(format!("{id}-c").as_str(), "C");
    if let Some(secs) = duration {
        draft = draft.with_duration_secs(secs);
    }
    draft
}

fn whole_test(questions: usize) -> Test {
    let mut draft = TestDraft::new("math", "Math").with_duration_minutes(10);
    for i in 1..=questions {
        draft = draft.with_question(question(&format!("q{i}"), None));
    }
    draft.validate().unwrap()
}

fn per_question_test() -> Test {
    TestDraft::new("bio", "Biology")
        .with_question(question("q1", Some(60)))
        .with_question(question("q2", Some(60)))
        .with_question(question("q3", Some(60)))
        .validate()
        .unwrap()
}

fn student() -> StudentId {
    StudentId::new("s-1")
}

fn select(question: &str, answer: &str) -> SessionEvent {
    SessionEvent::SelectAnswer {
        question_id: QuestionId::new(question),
        answer_id: AnswerId::new(answer),
    }
}

/// Grades every answered question as correct after `failures` failed calls.
struct ScriptedSink {
    failures: Mutex<u32>,
    failure: SubmissionError,
    calls: AtomicUsize,
    seen: Mutex<Vec<AnswerRecord>>,
}

impl ScriptedSink {
    fn ok() -> Arc<Self> {
        Self::failing(0, SubmissionError::Network("unused".into()))
    }

    fn failing(failures: u32, failure: SubmissionError) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures),
            failure,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn records(&self) -> Vec<AnswerRecord> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionSink for ScriptedSink {
    async fn submit(&self, record: &AnswerRecord) -> Result<SubmissionResult, SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(record.clone());
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(self.failure.clone());
            }
        }
        let per_question_correctness: Vec<_> = record
            .answers
            .iter()
            .map(|a| QuestionCorrectness {
                question_id: a.question_id.clone(),
                correct: a.answer_id.is_some(),
            })
            .collect();
        let correct = per_question_correctness.iter().filter(|c| c.correct).count();
        Ok(SubmissionResult {
            score: correct as f64 / record.answers.len() as f64,
            per_question_correctness,
        })
    }
}

struct Harness {
    service: ExamSessionService,
    storage: Storage,
    sink: Arc<ScriptedSink>,
}

fn harness(test: Test, sink: Arc<ScriptedSink>) -> Harness {
    harness_with(test, sink, Storage::in_memory(), Clock::fixed(fixed_now()))
}

fn harness_with(test: Test, sink: Arc<ScriptedSink>, storage: Storage, clock: Clock) -> Harness {
    let service = ExamSessionService::new(
        clock,
        Arc::new(StaticTestSource::new().with_test(test)),
        storage.clone(),
        sink.clone(),
    )
    .with_retry_policy(RetryPolicy::new(5, Duration::ZERO, Duration::ZERO))
    .with_save_debounce(Duration::from_secs(2));
    Harness {
        service,
        storage,
        sink,
    }
}

async fn open(h: &Harness, test_id: &str) -> SessionController {
    h.service
        .open(&TestId::new(test_id), &student(), OpenOptions::default())
        .await
        .unwrap()
}

// ─── Flows ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn per_question_payload_lists_every_question_in_order() {
    let h = harness(per_question_test(), ScriptedSink::ok());
    let mut session = open(&h, "bio").await;

    session.dispatch(SessionEvent::Start).await;
    assert!(session.dispatch(select("q1", "q1-b")).await.is_applied());
    session.dispatch(SessionEvent::Next).await;

    // q2 is left to run out; the timer moves the session on to q3.
    session.clock_mut().advance_secs(60);
    session.dispatch(SessionEvent::Tick).await;
    assert_eq!(session.state().current_index(), 2);
    assert!(session.dispatch(select("q3", "q3-a")).await.is_applied());
    session.dispatch(SessionEvent::Submit).await;

    assert_eq!(session.status(), SessionStatus::Submitted);
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    let answers: Vec<_> = records[0]
        .answers
        .iter()
        .map(|a| {
            (
                a.question_id.as_str().to_string(),
                a.answer_id.as_ref().map(|id| id.as_str().to_string()),
            )
        })
        .collect();
    assert_eq!(
        answers,
        vec![
            ("q1".to_string(), Some("q1-b".to_string())),
            ("q2".to_string(), None),
            ("q3".to_string(), Some("q3-a".to_string())),
        ]
    );
}

#[tokio::test]
async fn per_question_expiry_locks_and_advances() {
    let h = harness(per_question_test(), ScriptedSink::ok());
    let mut session = open(&h, "bio").await;
    session.dispatch(SessionEvent::Start).await;

    session.clock_mut().advance_secs(60);
    let transition = session.dispatch(SessionEvent::Tick).await;
    assert_eq!(
        transition,
        Transition::Applied(Change::QuestionExpired {
            question_id: QuestionId::new("q1"),
            advanced_to: 1,
        })
    );
    assert_eq!(session.state().current_index(), 1);
    assert!(session.state().is_locked(0));

    // Answers for another question than the one on screen are refused.
    assert_eq!(
        session.dispatch(select("q1", "q1-a")).await,
        Transition::Ignored(IgnoreReason::NotCurrentQuestion)
    );
}

#[tokio::test]
async fn whole_test_expiry_auto_submits_with_unanswered_nulls() {
    let h = harness(whole_test(5), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    let expired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expired);
    session.on_expire(move |state| {
        assert_eq!(state.status(), SessionStatus::Expired);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q1", "q1-c")).await;
    session.dispatch(SessionEvent::Navigate(1)).await;
    assert_eq!(session.progress().remaining_secs, Some(600));

    session.clock_mut().advance_secs(600);
    let transition = session.dispatch(SessionEvent::Tick).await;
    assert_eq!(transition, Transition::Applied(Change::SessionExpired));
    assert_eq!(session.status(), SessionStatus::Submitted);

    // More ticks never fire the expiry again.
    session.dispatch(SessionEvent::Tick).await;
    session.dispatch(SessionEvent::Tick).await;
    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.calls(), 1);

    let record = &h.sink.records()[0];
    assert_eq!(record.answers.len(), 5);
    assert_eq!(record.answered_count(), 1);
    assert!(record.answers[1..].iter().all(|a| a.answer_id.is_none()));

    let result = session.result().unwrap();
    assert!((result.score - 0.2).abs() < f64::EPSILON);
}

#[tokio::test]
async fn late_answer_after_deadline_is_ignored() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;

    session.clock_mut().advance_secs(601);
    let transition = session.dispatch(select("q1", "q1-a")).await;

    assert!(matches!(
        transition,
        Transition::Ignored(IgnoreReason::WrongStatus(_))
    ));
    assert_eq!(session.status(), SessionStatus::Submitted);
    assert_eq!(h.sink.records()[0].answered_count(), 0);
}

#[tokio::test]
async fn answer_in_same_batch_as_expiry_counts() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;

    session.clock_mut().advance_secs(600);
    let transitions = session
        .dispatch_batch(vec![SessionEvent::Tick, select("q2", "q2-b"), SessionEvent::Tick])
        .await;

    assert_eq!(transitions.len(), 2);
    assert!(transitions[0].is_applied());
    assert_eq!(transitions[1], Transition::Applied(Change::SessionExpired));
    let record = &h.sink.records()[0];
    assert_eq!(record.answers[1].answer_id, Some(AnswerId::new("q2-b")));
}

#[tokio::test]
async fn answer_long_after_expiry_is_ignored_even_in_a_tick_batch() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;

    session.clock_mut().advance_secs(3_600);
    let transitions = session
        .dispatch_batch(vec![SessionEvent::Tick, select("q2", "q2-b")])
        .await;

    assert_eq!(transitions[0], Transition::Applied(Change::SessionExpired));
    assert!(!transitions[1].is_applied());
    assert_eq!(session.status(), SessionStatus::Submitted);
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].answers[1].answer_id, None);
}

#[tokio::test]
async fn stale_expiry_respects_a_longer_tick_window() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math")
        .await
        .with_tick_interval(Duration::from_secs(5));
    session.dispatch(SessionEvent::Start).await;

    session.clock_mut().advance_secs(603);
    session
        .dispatch_batch(vec![select("q2", "q2-c"), SessionEvent::Tick])
        .await;

    assert_eq!(session.status(), SessionStatus::Submitted);
    let record = &h.sink.records()[0];
    assert_eq!(record.answers[1].answer_id, Some(AnswerId::new("q2-c")));
}

#[tokio::test]
async fn transient_failures_retry_to_a_single_submission() {
    let h = harness(
        whole_test(3),
        ScriptedSink::failing(2, SubmissionError::Network("connection reset".into())),
    );
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q2", "q2-a")).await;
    session.dispatch(SessionEvent::Submit).await;

    assert_eq!(session.status(), SessionStatus::Submitted);
    assert_eq!(h.sink.calls(), 3);
    let records = h.sink.records();
    assert!(records.iter().all(|r| r == &records[0]));

    let receipt = h
        .storage
        .receipts
        .get_receipt(&TestId::new("math"), &student())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(receipt.submission_id, records[0].submission_id);
    assert!(
        h.storage
            .snapshots
            .load_snapshot(&TestId::new("math"), &student())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn exhausted_retries_keep_answers_for_manual_retry() {
    let sink = ScriptedSink::failing(
        2,
        SubmissionError::Status {
            status: 503,
            message: "maintenance".into(),
        },
    );
    let mut h = harness(whole_test(2), sink);
    h.service = h
        .service
        .clone()
        .with_retry_policy(RetryPolicy::new(2, Duration::ZERO, Duration::ZERO));
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q1", "q1-b")).await;
    session.dispatch(SessionEvent::Submit).await;

    assert_eq!(session.status(), SessionStatus::Error);
    assert!(session.state().last_error().is_some());
    assert!(session.state().selected_answer(&QuestionId::new("q1")).is_some());

    let draft = h
        .storage
        .snapshots
        .load_snapshot(&TestId::new("math"), &student())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.state.status(), SessionStatus::Error);

    // Only a manual retry leaves the error state.
    assert!(!session.dispatch(SessionEvent::Tick).await.is_applied());
    assert!(!session.dispatch(SessionEvent::Submit).await.is_applied());
    assert_eq!(session.status(), SessionStatus::Error);

    assert!(session.dispatch(SessionEvent::RetrySubmit).await.is_applied());
    assert_eq!(session.status(), SessionStatus::Submitted);
    let records = h.sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].submission_id, records[2].submission_id);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let h = harness(
        whole_test(2),
        ScriptedSink::failing(
            1,
            SubmissionError::Status {
                status: 422,
                message: "unknown answer".into(),
            },
        ),
    );
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(SessionEvent::Submit).await;

    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(h.sink.calls(), 1);
}

#[tokio::test]
async fn retry_uses_receipt_recorded_elsewhere() {
    let h = harness(
        whole_test(2),
        ScriptedSink::failing(1, SubmissionError::Decode("truncated".into())),
    );
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(SessionEvent::Submit).await;
    assert_eq!(session.status(), SessionStatus::Error);

    let graded = SubmissionResult {
        score: 1.0,
        per_question_correctness: Vec::new(),
    };
    h.storage
        .receipts
        .record_receipt(&SubmissionReceipt {
            test_id: TestId::new("math"),
            student_id: student(),
            submission_id: uuid::Uuid::new_v4(),
            result: graded.clone(),
            submitted_at: fixed_now(),
        })
        .await
        .unwrap();

    session.dispatch(SessionEvent::RetrySubmit).await;
    assert_eq!(session.status(), SessionStatus::Submitted);
    assert_eq!(session.result(), Some(&graded));
    assert_eq!(h.sink.calls(), 1);
}

#[tokio::test]
async fn submitted_session_is_immutable() {
    let h = harness(whole_test(3), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q1", "q1-a")).await;
    session.dispatch(SessionEvent::Submit).await;
    assert_eq!(session.status(), SessionStatus::Submitted);
    let revision = session.state().revision();

    for event in [
        select("q1", "q1-b"),
        SessionEvent::Navigate(2),
        SessionEvent::Next,
        SessionEvent::Submit,
        SessionEvent::RetrySubmit,
        SessionEvent::Start,
    ] {
        assert!(!session.dispatch(event).await.is_applied());
    }
    assert_eq!(session.dispatch(SessionEvent::Tick).await, Transition::Unchanged);
    assert_eq!(session.state().revision(), revision);
    assert_eq!(h.sink.calls(), 1);

    let review = session.review().unwrap();
    assert_eq!(review.len(), 3);
    assert_eq!(review[0].chosen_answer_id, Some(AnswerId::new("q1-a")));
    assert_eq!(review[0].correct, Some(true));
}

#[tokio::test]
async fn reopening_charges_time_spent_away() {
    let storage = Storage::in_memory();
    let first = harness_with(
        whole_test(3),
        ScriptedSink::ok(),
        storage.clone(),
        Clock::fixed(fixed_now()),
    );
    let mut session = open(&first, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.clock_mut().advance_secs(100);
    session.dispatch(select("q2", "q2-c")).await;
    session.flush().await;
    drop(session);

    let mut later = Clock::fixed(fixed_now());
    later.advance_secs(300);
    let second = harness_with(whole_test(3), ScriptedSink::ok(), storage, later);
    let resumed = open(&second, "math").await;

    assert!(resumed.was_resumed());
    assert_eq!(resumed.status(), SessionStatus::InProgress);
    assert_eq!(resumed.progress().remaining_secs, Some(300));
    assert_eq!(
        resumed
            .state()
            .selected_answer(&QuestionId::new("q2"))
            .map(|a| a.answer_id.clone()),
        Some(AnswerId::new("q2-c"))
    );
}

#[tokio::test]
async fn draft_that_expired_while_closed_submits_on_first_tick() {
    let storage = Storage::in_memory();
    let first = harness_with(
        whole_test(2),
        ScriptedSink::ok(),
        storage.clone(),
        Clock::fixed(fixed_now()),
    );
    let mut session = open(&first, "math").await;
    session.dispatch(SessionEvent::Start).await;
    drop(session);

    let mut later = Clock::fixed(fixed_now());
    later.advance_secs(3_600);
    let second = harness_with(whole_test(2), ScriptedSink::ok(), storage, later);
    let mut resumed = open(&second, "math").await;
    assert_eq!(resumed.progress().remaining_secs, Some(0));

    resumed.dispatch(SessionEvent::Tick).await;
    assert_eq!(resumed.status(), SessionStatus::Submitted);
    assert_eq!(second.sink.calls(), 1);
}

#[tokio::test]
async fn reopening_a_submitted_test_is_refused() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(SessionEvent::Submit).await;

    let err = h
        .service
        .open(&TestId::new("math"), &student(), OpenOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::AlreadySubmitted { .. }));
    assert!(h
        .service
        .receipt(&TestId::new("math"), &student())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn starting_over_discards_the_draft() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let mut session = open(&h, "math").await;
    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q1", "q1-a")).await;
    session.flush().await;

    let fresh = h
        .service
        .open(
            &TestId::new("math"),
            &student(),
            OpenOptions::default().with_resume(false),
        )
        .await
        .unwrap();
    assert!(!fresh.was_resumed());
    assert_eq!(fresh.status(), SessionStatus::NotStarted);
}

#[tokio::test]
async fn impossible_timing_mode_is_rejected_at_open() {
    let h = harness(whole_test(2), ScriptedSink::ok());
    let err = h
        .service
        .open(
            &TestId::new("math"),
            &student(),
            OpenOptions::default().with_timing(TimingSelection::PerQuestion),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Timing(_)));

    let missing = h
        .service
        .open(&TestId::new("nope"), &student(), OpenOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(missing, SessionError::Load(_)));
}

struct FailingSnapshots;

#[async_trait]
impl SessionSnapshotRepository for FailingSnapshots {
    async fn save_snapshot(&self, _: &SessionSnapshot) -> Result<SaveOutcome, StorageError> {
        Err(StorageError::Connection("quota exceeded".into()))
    }

    async fn load_snapshot(
        &self,
        _: &TestId,
        _: &StudentId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        Err(StorageError::Connection("quota exceeded".into()))
    }

    async fn delete_snapshot(&self, _: &TestId, _: &StudentId) -> Result<(), StorageError> {
        Err(StorageError::Connection("quota exceeded".into()))
    }
}

#[tokio::test]
async fn storage_outage_degrades_but_session_completes() {
    let storage = Storage {
        snapshots: Arc::new(FailingSnapshots),
        receipts: Arc::new(InMemoryRepository::new()),
    };
    let h = harness_with(
        whole_test(2),
        ScriptedSink::ok(),
        storage,
        Clock::fixed(fixed_now()),
    );
    let mut session = open(&h, "math").await;
    assert!(session.is_persistence_degraded());

    session.dispatch(SessionEvent::Start).await;
    session.dispatch(select("q1", "q1-b")).await;
    session.dispatch(SessionEvent::Submit).await;
    assert_eq!(session.status(), SessionStatus::Submitted);
}
