//! Question source
//!
//! Loads the questionnaire from the document store. Individual documents that
//! fail to decode are skipped with a warning; only an unreachable store or an
//! empty result is fatal.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::schema::{decode_question, QuestionDocumentReport};
use crate::store::{with_timeout, DocumentStore, QUESTIONS_COLLECTION};
use crate::types::Question;
use crate::EXPECTED_QUESTION_COUNT;

/// Questions plus the per-document decode outcome
#[derive(Debug, Clone)]
pub struct QuestionLoad {
    pub questions: Vec<Question>,
    pub reports: Vec<QuestionDocumentReport>,
}

impl QuestionLoad {
    pub fn rejected(&self) -> impl Iterator<Item = &QuestionDocumentReport> {
        self.reports.iter().filter(|r| r.error.is_some())
    }
}

/// Loads questions from the `questionare` collection
pub struct QuestionSource {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl QuestionSource {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch and decode the questionnaire
    pub async fn fetch_questions(&self) -> Result<Vec<Question>, PipelineError> {
        Ok(self.load().await?.questions)
    }

    /// Fetch, decode and report on every stored document
    pub async fn load(&self) -> Result<QuestionLoad, PipelineError> {
        tracing::debug!(collection = QUESTIONS_COLLECTION, "Fetching questions");

        let documents = with_timeout(self.timeout, self.store.list(QUESTIONS_COLLECTION))
            .await
            .map_err(|e| PipelineError::DataSource(e.to_string()))?;

        let mut questions = Vec::with_capacity(documents.len());
        let mut reports = Vec::with_capacity(documents.len());

        for doc in &documents {
            match decode_question(doc) {
                Ok(question) => {
                    questions.push(question);
                    reports.push(QuestionDocumentReport {
                        document_id: doc.id.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(document_id = %doc.id, error = %e, "Skipping invalid question");
                    reports.push(QuestionDocumentReport {
                        document_id: doc.id.clone(),
                        error: Some(e),
                    });
                }
            }
        }

        if questions.is_empty() {
            return Err(PipelineError::NoValidQuestions);
        }

        if questions.len() != EXPECTED_QUESTION_COUNT {
            tracing::warn!(
                expected = EXPECTED_QUESTION_COUNT,
                actual = questions.len(),
                "Unexpected number of questions"
            );
        }

        tracing::info!(count = questions.len(), "Loaded valid questions");
        Ok(QuestionLoad { questions, reports })
    }
}
