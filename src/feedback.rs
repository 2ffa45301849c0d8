//! Post-session feedback
//!
//! Feedback text is scored by the sentiment endpoint and, when a face image is
//! supplied, the emotion endpoint. Analysis failures degrade to "neutral"
//! rather than losing the user's feedback.

use std::sync::Arc;
use std::time::Duration;

use crate::api::TherapyApi;
use crate::auth::AuthProvider;
use crate::cache::{CacheKey, RecommendationCache};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::store::{
    idempotency_key, with_timeout, DocumentStore, FieldFilter, FEEDBACK_COLLECTION,
    SUGGESTIONS_COLLECTION,
};
use crate::types::{FeedbackRecord, TherapySuggestionRecord};

const NEUTRAL: &str = "neutral";
const DEFAULT_CONDITION: &str = "stress";
const UNKNOWN_THERAPY: &str = "Unknown Therapy";

/// Image attached to feedback for emotion analysis
#[derive(Debug, Clone)]
pub struct FeedbackImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

pub struct FeedbackRecorder {
    api: Arc<dyn TherapyApi>,
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    cache: RecommendationCache,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl FeedbackRecorder {
    pub fn new(
        api: Arc<dyn TherapyApi>,
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        cache: RecommendationCache,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            store,
            auth,
            cache,
            clock,
            timeout,
        }
    }

    /// Analyze and store feedback for a finished session
    pub async fn record_feedback(
        &self,
        session_id: &str,
        text: &str,
        image: Option<FeedbackImage>,
    ) -> Result<FeedbackRecord, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Validation("Feedback text is required".to_string()));
        }
        let user_id = self
            .auth
            .current_user()
            .ok_or(PipelineError::AuthenticationRequired)?;

        let (sentiment, sentiment_label) = match self.api.analyze_sentiment(text).await {
            Ok(analysis) => (analysis.result, analysis.label),
            Err(e) => {
                tracing::warn!(error = %e, "Sentiment analysis failed");
                (NEUTRAL.to_string(), None)
            }
        };

        let emotion = match image {
            Some(image) => match self.api.analyze_emotion(image.bytes, &image.file_name).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "Emotion analysis failed");
                    NEUTRAL.to_string()
                }
            },
            None => NEUTRAL.to_string(),
        };

        let suggestion = match self
            .cache
            .get::<TherapySuggestionRecord>(&CacheKey::therapy_suggestion(&user_id, session_id))
            .await
        {
            Ok(suggestion) => suggestion,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load session recommendation");
                None
            }
        };
        let (mental_health_issue, therapy) = match suggestion {
            Some(s) => (s.condition, s.suggestion),
            None => (DEFAULT_CONDITION.to_string(), UNKNOWN_THERAPY.to_string()),
        };

        let sessions_taken = with_timeout(
            self.timeout,
            self.store
                .find(SUGGESTIONS_COLLECTION, &[FieldFilter::eq("userId", user_id.as_str())]),
        )
        .await?
        .len();

        let now = self.clock.now();
        let record = FeedbackRecord {
            user_id: user_id.clone(),
            session_id: session_id.to_string(),
            feedback: text.to_string(),
            sentiment,
            sentiment_label,
            emotion,
            sessions_taken,
            mental_health_issue,
            therapy,
            timestamp: now,
            created_at: now,
        };

        let id = idempotency_key(&user_id, session_id, "feedback");
        with_timeout(
            self.timeout,
            self.store
                .upsert(FEEDBACK_COLLECTION, &id, serde_json::to_value(&record)?),
        )
        .await?;

        tracing::info!(user_id = %user_id, session_id, sessions_taken, "Saved feedback");
        Ok(record)
    }
}
