use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use exam_core::model::{
    QuestionDraft, QuestionId, Stimulus, StimulusKind, Test, TestDraft, TestId, TestSummary,
};

use crate::error::LoadError;
use crate::http::{Envelope, WireId, endpoint};

/// Read side of the exam backend.
#[async_trait]
pub trait TestSource: Send + Sync {
    /// Tests the student may take.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when the catalogue cannot be fetched or decoded.
    async fn list_tests(&self) -> Result<Vec<TestSummary>, LoadError>;

    /// Fetch one test with its ordered questions.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` when the test is missing, unreachable or invalid.
    async fn load_test(&self, test_id: &TestId) -> Result<Test, LoadError>;
}

//
// ─── HTTP SOURCE ───────────────────────────────────────────────────────────────
//

/// `GET {base}/tests` and `GET {base}/tests/{id}`.
#[derive(Clone)]
pub struct HttpTestSource {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTestSource {
    #[must_use]
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        test_id: Option<&TestId>,
    ) -> Result<T, LoadError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = test_id {
                return Err(LoadError::NotFound(id.clone()));
            }
        }
        if !status.is_success() {
            return Err(LoadError::HttpStatus(status));
        }

        let body = response.text().await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| LoadError::Decode(e.to_string()))?;
        Ok(envelope.into_inner())
    }
}

#[async_trait]
impl TestSource for HttpTestSource {
    #[instrument(skip(self))]
    async fn list_tests(&self) -> Result<Vec<TestSummary>, LoadError> {
        let url = endpoint(&self.base_url, &["tests"])?;
        let wire: Vec<WireSummary> = self.get_json(url, None).await?;
        Ok(wire.into_iter().map(TestSummary::from).collect())
    }

    #[instrument(skip(self), fields(test_id = %test_id))]
    async fn load_test(&self, test_id: &TestId) -> Result<Test, LoadError> {
        let url = endpoint(&self.base_url, &["tests", test_id.as_str()])?;
        let wire: WireTest = self.get_json(url, Some(test_id)).await?;
        let test = wire.into_draft(test_id).validate()?;
        tracing::debug!(questions = test.questions().len(), "test loaded");
        Ok(test)
    }
}

#[derive(Debug, Deserialize)]
struct WireSummary {
    id: WireId,
    title: String,
    #[serde(default)]
    description: Option<String>,
}

impl From<WireSummary> for TestSummary {
    fn from(wire: WireSummary) -> Self {
        Self {
            id: TestId::new(wire.id.into_string()),
            title: wire.title,
            description: wire.description.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireTest {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    questions: Vec<WireQuestion>,
}

#[derive(Debug, Deserialize)]
struct WireQuestion {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(alias = "question")]
    question_text: String,
    #[serde(default)]
    stimulus_type: Option<StimulusKind>,
    #[serde(default)]
    stimulus: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    answers: Vec<WireAnswer>,
}

#[derive(Debug, Deserialize)]
struct WireAnswer {
    id: WireId,
    answer_text: String,
}

impl WireTest {
    fn into_draft(self, requested: &TestId) -> TestDraft {
        let id = self
            .id
            .map_or_else(|| requested.clone(), |id| TestId::new(id.into_string()));

        let mut draft = TestDraft::new(id, self.title)
            .with_description(self.description.unwrap_or_default());
        draft.duration_minutes = self.duration_minutes;
        draft.questions = self.questions.into_iter().map(WireQuestion::into_draft).collect();
        draft
    }
}

impl WireQuestion {
    fn into_draft(self) -> QuestionDraft {
        let kind = self.stimulus_type.unwrap_or(StimulusKind::None);
        let mut draft = QuestionDraft {
            id: self.id.map(|id| QuestionId::new(id.into_string())),
            text: self.question_text,
            stimulus: Stimulus::from_parts(kind, self.stimulus),
            options: Vec::new(),
            explanation: self.explanation,
            duration_secs: self.duration,
        };
        for answer in self.answers {
            draft = draft.with_option(answer.id.into_string(), answer.answer_text);
        }
        draft
    }
}

//
// ─── STATIC SOURCE ─────────────────────────────────────────────────────────────
//

/// Serves tests held in memory. Useful for embedding and tests.
#[derive(Clone, Default)]
pub struct StaticTestSource {
    tests: HashMap<TestId, Test>,
    order: Vec<TestId>,
}

impl StaticTestSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_test(mut self, test: Test) -> Self {
        let id = test.id().clone();
        if self.tests.insert(id.clone(), test).is_none() {
            self.order.push(id);
        }
        self
    }
}

#[async_trait]
impl TestSource for StaticTestSource {
    async fn list_tests(&self) -> Result<Vec<TestSummary>, LoadError> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| self.tests.get(id))
            .map(Test::summary)
            .collect())
    }

    async fn load_test(&self, test_id: &TestId) -> Result<Test, LoadError> {
        self.tests
            .get(test_id)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(test_id.clone()))
    }
}
