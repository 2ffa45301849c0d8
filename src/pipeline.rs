//! Pipeline orchestration
//!
//! This module provides the public entry point of Calmia. It wires the
//! injected backends into each stage and runs one assessment session:
//! question loading → response collection → normalization → recommendation.

use serde::Serialize;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::TherapyApi;
use crate::auth::{require_user, AuthProvider};
use crate::cache::{LocalTier, RecommendationCache};
use crate::clock::{new_session_id, Clock};
use crate::collector::ResponseCollector;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::feedback::{FeedbackImage, FeedbackRecorder};
use crate::fetcher::{cancellable, FetchPhase, RecommendationFetcher};
use crate::journal::{HistoryEntry, HistoryKind, Journal};
use crate::normalizer::Normalizer;
use crate::questions::{QuestionLoad, QuestionSource};
use crate::responses::{LogOutcome, ResponseLog};
use crate::store::{DocumentStore, LocalCache};
use crate::types::{
    AnswerMap, FeedbackRecord, JournalRecord, NormalizationFlag, Question, RecommendationResult,
};

/// Backends the pipeline runs against
#[derive(Clone)]
pub struct Backends {
    pub api: Arc<dyn TherapyApi>,
    pub store: Arc<dyn DocumentStore>,
    pub local: Arc<dyn LocalCache>,
    pub auth: Arc<dyn AuthProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of a submitted assessment
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub recommendation: RecommendationResult,
    /// `None` when logging the responses failed
    pub responses_logged: Option<LogOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defaulted_answers: Vec<NormalizationFlag>,
}

/// Assessment-to-recommendation pipeline
pub struct AssessmentPipeline {
    questions: QuestionSource,
    fetcher: RecommendationFetcher,
    responses: ResponseLog,
    feedback: FeedbackRecorder,
    journal: Journal,
    api: Arc<dyn TherapyApi>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl AssessmentPipeline {
    pub fn new(backends: Backends, config: PipelineConfig) -> Self {
        let Backends {
            api,
            store,
            local,
            auth,
            clock,
        } = backends;

        let tier = LocalTier::new(
            local,
            clock.clone(),
            config.cache_ttl(),
            config.store_timeout(),
        );
        let cache = RecommendationCache::new(tier, store.clone(), config.store_timeout());

        Self {
            questions: QuestionSource::new(store.clone(), config.store_timeout()),
            fetcher: RecommendationFetcher::new(
                api.clone(),
                store.clone(),
                auth.clone(),
                cache.clone(),
                clock.clone(),
                config.clone(),
            ),
            responses: ResponseLog::new(cache.clone(), clock.clone()),
            feedback: FeedbackRecorder::new(
                api.clone(),
                store.clone(),
                auth.clone(),
                cache,
                clock.clone(),
                config.store_timeout(),
            ),
            journal: Journal::new(store, auth.clone(), clock.clone(), config.store_timeout()),
            api,
            auth,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Progress of the running recommendation fetch
    pub fn subscribe(&self) -> watch::Receiver<FetchPhase> {
        self.fetcher.subscribe()
    }

    pub async fn load_questions(&self) -> Result<QuestionLoad, PipelineError> {
        self.questions.load().await
    }

    pub fn new_session_id(&self) -> String {
        new_session_id(self.clock.as_ref())
    }

    /// Load the questionnaire and open a collector over it
    pub async fn start_session(&self) -> Result<(String, ResponseCollector), PipelineError> {
        let questions = self.questions.fetch_questions().await?;
        let session_id = self.new_session_id();
        tracing::info!(session_id = %session_id, questions = questions.len(), "Started session");
        Ok((session_id, ResponseCollector::new(questions)?))
    }

    /// Normalize submitted answers and fetch the recommendation
    ///
    /// Logging the responses and fetching the recommendation run concurrently;
    /// a failed log is reported in the outcome but does not fail the session.
    pub async fn recommend(
        &self,
        answers: &AnswerMap,
        questions: &[Question],
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, PipelineError> {
        let normalized = Normalizer::normalize(answers, questions)?;

        cancellable(cancel, self.api.check_connectivity()).await?;

        let user_id = cancellable(
            cancel,
            require_user(self.auth.as_ref(), self.config.auth_timeout()),
        )
        .await?;

        let (logged, recommendation) = tokio::join!(
            self.responses.record(&user_id, session_id, &normalized, cancel),
            self.fetcher.get_recommendation(&normalized, session_id, cancel),
        );

        let responses_logged = match logged {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to log responses");
                None
            }
        };

        Ok(SessionReport {
            session_id: session_id.to_string(),
            recommendation: recommendation?,
            responses_logged,
            defaulted_answers: normalized.flags().to_vec(),
        })
    }

    pub async fn record_feedback(
        &self,
        session_id: &str,
        text: &str,
        image: Option<FeedbackImage>,
    ) -> Result<FeedbackRecord, PipelineError> {
        self.feedback.record_feedback(session_id, text, image).await
    }

    pub async fn record_journal_entry(&self, text: &str) -> Result<JournalRecord, PipelineError> {
        self.journal.record_entry(text).await
    }

    /// Journal or feedback history of the signed-in user, newest first
    pub async fn history(&self, kind: HistoryKind) -> Result<Vec<HistoryEntry>, PipelineError> {
        self.journal.history(kind).await
    }
}
