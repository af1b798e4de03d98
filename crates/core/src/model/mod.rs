mod answer_store;
mod ids;
mod question;
mod record;

pub use ids::{AnswerId, ParseIdError, QuestionId, StudentId, TestId};

pub use answer_store::{AnswerSnapshot, AnswerStore, SelectedAnswer};
pub use question::{
    AnswerOption, MAX_OPTIONS, MIN_OPTIONS, Question, QuestionDraft, Stimulus, StimulusKind,
};
pub use record::{
    AnswerEntry, AnswerRecord, QuestionCorrectness, SubmissionReceipt, SubmissionResult,
};
pub use test::{Test, TestDraft, TestError, TestSummary};
