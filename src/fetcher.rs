//! Recommendation fetcher
//!
//! Turns a normalized response into a [`RecommendationResult`]:
//!
//! 1. Resolve the signed-in user (waiting once for an auth event)
//! 2. Local cache hit → return
//! 3. Remote store hit for (user, session) → warm the cache and return
//! 4. Predict the condition
//! 5. Recommend a therapy for that condition
//! 6. Load the therapy environment
//! 7. Compose, persist and return
//!
//! Steps 4-6 run as one unit under an exponential-backoff retry. Progress
//! is published as [`FetchPhase`] values on a watch channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::{TherapyApi, TherapyRecommendation};
use crate::auth::{require_user, AuthProvider};
use crate::cache::{CacheKey, RecommendationCache};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::schema::decode_environment;
use crate::store::{with_timeout, DocumentStore, ENVIRONMENTS_COLLECTION};
use crate::types::{
    EnvironmentMetadata, NormalizedResponse, RecommendationResult, TherapySuggestionRecord,
    DEFAULT_THERAPY_DESCRIPTION,
};

/// Advisory progress of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    CheckingCache,
    PredictingCondition,
    FetchingRecommendation,
    FetchingEnvironment,
    Saving,
    Done,
}

impl FetchPhase {
    /// User-facing status line
    pub fn message(&self) -> &'static str {
        match self {
            FetchPhase::Idle => "Waiting",
            FetchPhase::CheckingCache => "Checking for a saved recommendation...",
            FetchPhase::PredictingCondition => "Analyzing your responses...",
            FetchPhase::FetchingRecommendation => "Finding the right therapy...",
            FetchPhase::FetchingEnvironment => "Preparing your environment...",
            FetchPhase::Saving => "Saving your recommendation...",
            FetchPhase::Done => "Your recommendation is ready",
        }
    }
}

pub struct RecommendationFetcher {
    api: Arc<dyn TherapyApi>,
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    cache: RecommendationCache,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    phase: watch::Sender<FetchPhase>,
}

impl RecommendationFetcher {
    pub fn new(
        api: Arc<dyn TherapyApi>,
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        cache: RecommendationCache,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let (phase, _) = watch::channel(FetchPhase::Idle);
        Self {
            api,
            store,
            auth,
            cache,
            clock,
            config,
            phase,
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> watch::Receiver<FetchPhase> {
        self.phase.subscribe()
    }

    /// Fetch (or reuse) the recommendation for `session_id`
    pub async fn get_recommendation(
        &self,
        responses: &NormalizedResponse,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecommendationResult, PipelineError> {
        let span = tracing::info_span!(
            "recommendation",
            request_id = %Uuid::new_v4(),
            session_id = %session_id
        );
        self.run(responses, session_id, cancel).instrument(span).await
    }

    async fn run(
        &self,
        responses: &NormalizedResponse,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecommendationResult, PipelineError> {
        let user_id = cancellable(
            cancel,
            require_user(self.auth.as_ref(), self.config.auth_timeout()),
        )
        .await?;

        self.set_phase(FetchPhase::CheckingCache);
        let key = CacheKey::therapy_suggestion(&user_id, session_id);

        if let Some(record) = self.cache.get_local::<TherapySuggestionRecord>(&key).await {
            tracing::info!(user_id = %user_id, "Using cached recommendation");
            self.set_phase(FetchPhase::Done);
            return Ok(record.into_result());
        }

        match cancellable(cancel, self.cache.get_remote::<TherapySuggestionRecord>(&key)).await {
            Ok(Some(record)) => {
                tracing::info!(user_id = %user_id, "Using stored recommendation");
                self.set_phase(FetchPhase::Done);
                return Ok(record.into_result());
            }
            Ok(None) => {}
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Stored recommendation lookup failed, fetching fresh");
            }
        }

        let result = self.fetch_with_retry(responses, cancel).await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.set_phase(FetchPhase::Saving);
        let record = TherapySuggestionRecord::new(&user_id, session_id, &result, self.clock.now());
        if let Err(e) = self.cache.put(&key, &record).await {
            tracing::warn!(error = %e, "Failed to persist recommendation");
        }

        tracing::info!(
            condition = %result.condition,
            therapy = %result.therapy,
            environment_id = %result.environment_id,
            "Recommendation ready"
        );
        self.set_phase(FetchPhase::Done);
        Ok(result)
    }

    /// Run predict → recommend → environment, retrying the whole sequence
    async fn fetch_with_retry(
        &self,
        responses: &NormalizedResponse,
        cancel: &CancellationToken,
    ) -> Result<RecommendationResult, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_remote(responses, cancel).await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                    tracing::error!(attempt, error = %e, "Recommendation failed");
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff_delay(self.config.retry_base_delay(), attempt);
                    tracing::warn!(attempt, max_attempts, delay = ?delay, error = %e, "Retrying recommendation");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_remote(
        &self,
        responses: &NormalizedResponse,
        cancel: &CancellationToken,
    ) -> Result<RecommendationResult, PipelineError> {
        self.set_phase(FetchPhase::PredictingCondition);
        let condition = cancellable(cancel, self.api.predict_condition(responses)).await?;
        tracing::info!(condition = %condition, "Predicted condition");

        self.set_phase(FetchPhase::FetchingRecommendation);
        let recommendation = cancellable(cancel, self.api.recommend_therapy(&condition)).await?;
        tracing::info!(
            therapy = %recommendation.therapy,
            environment_id = %recommendation.environment_id,
            "Received therapy recommendation"
        );

        self.set_phase(FetchPhase::FetchingEnvironment);
        let environment =
            cancellable(cancel, self.fetch_environment(&recommendation.environment_id)).await?;

        Ok(compose(condition, recommendation, environment))
    }

    /// Environment metadata, from the local cache or the `environments` collection
    pub async fn fetch_environment(
        &self,
        environment_id: &str,
    ) -> Result<EnvironmentMetadata, PipelineError> {
        let key = CacheKey::environment(environment_id);
        if let Some(environment) = self.cache.local().get::<EnvironmentMetadata>(&key).await {
            return Ok(environment);
        }

        let doc = with_timeout(
            self.config.store_timeout(),
            self.store.get(ENVIRONMENTS_COLLECTION, environment_id),
        )
        .await?
        .ok_or_else(|| PipelineError::EnvironmentNotFound {
            id: environment_id.to_string(),
            reason: "document does not exist".to_string(),
        })?;

        let environment = decode_environment(environment_id, &doc.data)?;
        if let Err(e) = self.cache.local().put(&key, &environment).await {
            tracing::warn!(environment_id, error = %e, "Failed to cache environment");
        }
        Ok(environment)
    }

    fn set_phase(&self, phase: FetchPhase) {
        tracing::debug!(phase = ?phase, "{}", phase.message());
        self.phase.send_replace(phase);
    }
}

fn compose(
    condition: String,
    recommendation: TherapyRecommendation,
    environment: EnvironmentMetadata,
) -> RecommendationResult {
    RecommendationResult {
        condition,
        therapy: recommendation.therapy,
        therapy_description: recommendation
            .therapy_description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_THERAPY_DESCRIPTION.to_string()),
        environment_id: recommendation.environment_id,
        environment,
    }
}

/// Delay before retry number `attempt` (1-based): base, 2·base, 4·base, ...
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// Race `fut` against cancellation
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::cache::LocalTier;
    use crate::clock::ManualClock;
    use crate::store::{MemoryCache, MemoryDocumentStore, SUGGESTIONS_COLLECTION};
    use crate::testing::{environment_doc, normalized_response, seeded_store, ApiCall, StubApi};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        api: Arc<StubApi>,
        store: Arc<MemoryDocumentStore>,
        local: Arc<MemoryCache>,
        fetcher: RecommendationFetcher,
    }

    fn harness(api: StubApi, store: MemoryDocumentStore, auth: StaticAuth) -> Harness {
        let api = Arc::new(api);
        let store = Arc::new(store);
        let local = Arc::new(MemoryCache::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap(),
        ));
        let config = PipelineConfig {
            retry_base_delay_ms: 5,
            auth_timeout_secs: 1,
            ..Default::default()
        };
        let tier = LocalTier::new(
            local.clone(),
            clock.clone(),
            config.cache_ttl(),
            config.store_timeout(),
        );
        let cache = RecommendationCache::new(tier, store.clone(), config.store_timeout());
        let fetcher = RecommendationFetcher::new(
            api.clone(),
            store.clone(),
            Arc::new(auth),
            cache,
            clock,
            config,
        );
        Harness {
            api,
            store,
            local,
            fetcher,
        }
    }

    fn default_harness(api: StubApi) -> Harness {
        harness(api, seeded_store(), StaticAuth::signed_in("user-1"))
    }

    async fn fetch(h: &Harness) -> Result<RecommendationResult, PipelineError> {
        h.fetcher
            .get_recommendation(&normalized_response(), "session_1", &CancellationToken::new())
            .await
    }

    fn is_predict(call: &ApiCall) -> bool {
        matches!(call, ApiCall::Predict(_))
    }

    fn is_recommend(call: &ApiCall) -> bool {
        matches!(call, ApiCall::Recommend(_))
    }

    #[tokio::test]
    async fn test_full_fetch_composes_result() {
        let h = default_harness(StubApi::healthy());
        let result = fetch(&h).await.unwrap();

        assert_eq!(result.condition, "stress");
        assert_eq!(result.therapy, "stress Therapy");
        assert_eq!(result.therapy_description, "Guided forest immersion");
        assert_eq!(result.environment_id, "forest");
        assert_eq!(result.environment.title, "Forest");
        assert_eq!(h.store.count(SUGGESTIONS_COLLECTION), 1);
        assert!(h.local.contains("therapy_suggestion_user-1_session_1"));
        assert!(h.local.contains("environment_forest"));
        assert_eq!(*h.fetcher.subscribe().borrow(), FetchPhase::Done);
    }

    #[tokio::test]
    async fn test_recommendation_follows_prediction_with_condition_only() {
        let h = default_harness(StubApi::healthy());
        fetch(&h).await.unwrap();

        let calls = h.api.calls();
        assert_eq!(calls.len(), 2);
        assert!(is_predict(&calls[0]));
        assert_eq!(calls[1], ApiCall::Recommend(json!({"condition": "stress"})));
    }

    #[tokio::test]
    async fn test_recommendation_failure_exhausts_attempts() {
        let h = default_harness(StubApi::healthy().without_recommendation());
        let err = fetch(&h).await.unwrap_err();

        assert!(matches!(err, PipelineError::Recommendation(_)));
        assert_eq!(h.api.count(is_recommend), 3);
        // Each attempt re-runs from prediction
        assert_eq!(h.api.count(is_predict), 3);
        assert_eq!(h.store.count(SUGGESTIONS_COLLECTION), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_on_retry() {
        let h = default_harness(StubApi::healthy().failing_recommendations(2));
        let result = fetch(&h).await.unwrap();
        assert_eq!(result.therapy, "stress Therapy");
        assert_eq!(h.api.count(is_recommend), 3);
    }

    #[tokio::test]
    async fn test_missing_condition_is_prediction_error() {
        let h = default_harness(StubApi::healthy().without_condition());
        let err = fetch(&h).await.unwrap_err();
        assert!(matches!(err, PipelineError::Prediction(_)));
        assert_eq!(h.api.count(is_recommend), 0);
    }

    #[tokio::test]
    async fn test_environment_without_benefits_not_found() {
        let store = seeded_store();
        store
            .insert(
                ENVIRONMENTS_COLLECTION,
                "beach",
                json!({"title": "Beach", "description": "Waves", "imageUrl": "https://img/beach.jpg"}),
            )
            .unwrap();
        let h = harness(
            StubApi::healthy().with_environment("beach"),
            store,
            StaticAuth::signed_in("user-1"),
        );

        let err = fetch(&h).await.unwrap_err();
        match err {
            PipelineError::EnvironmentNotFound { id, reason } => {
                assert_eq!(id, "beach");
                assert!(reason.contains("benefits"));
            }
            other => panic!("expected EnvironmentNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_environment_document_not_found() {
        let h = default_harness(StubApi::healthy().with_environment("mountain"));
        let err = fetch(&h).await.unwrap_err();
        assert!(matches!(err, PipelineError::EnvironmentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cached_recommendation_skips_remote_calls() {
        let h = default_harness(StubApi::healthy());
        let first = fetch(&h).await.unwrap();
        let second = fetch(&h).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.api.count(is_predict), 1);
    }

    #[tokio::test]
    async fn test_stored_recommendation_reused() {
        let store = seeded_store();
        store
            .insert(
                SUGGESTIONS_COLLECTION,
                "existing",
                json!({
                    "userId": "user-1",
                    "sessionId": "session_1",
                    "condition": "anxiety",
                    "suggestion": "anxiety Therapy",
                    "environmentId": "forest",
                    "environment": environment_doc("Forest"),
                    "recommendedAt": "2024-05-10T09:00:00Z"
                }),
            )
            .unwrap();
        let h = harness(StubApi::healthy(), store, StaticAuth::signed_in("user-1"));

        let result = fetch(&h).await.unwrap();
        assert_eq!(result.condition, "anxiety");
        assert_eq!(result.therapy_description, DEFAULT_THERAPY_DESCRIPTION);
        assert!(h.api.calls().is_empty());
        assert!(h.local.contains("therapy_suggestion_user-1_session_1"));
    }

    #[tokio::test]
    async fn test_signed_out_user_rejected() {
        let h = harness(StubApi::healthy(), seeded_store(), StaticAuth::signed_out());
        let err = fetch(&h).await.unwrap_err();
        assert!(matches!(err, PipelineError::AuthenticationRequired));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_makes_no_calls() {
        let h = default_harness(StubApi::healthy());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .fetcher
            .get_recommendation(&normalized_response(), "session_1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(h.api.calls().is_empty());
        assert_eq!(h.store.count(SUGGESTIONS_COLLECTION), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let h = default_harness(StubApi::healthy().without_recommendation());
        let started = tokio::time::Instant::now();
        fetch(&h).await.unwrap_err();
        // 5ms + 10ms
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_backoff_delay_sequence() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }
}
