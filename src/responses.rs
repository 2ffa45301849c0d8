//! Questionnaire response log
//!
//! Each (user, session) pair gets exactly one `Responses` document. The log
//! consults the two-tier cache first so that re-submissions do not write again.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, RecommendationCache};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::fetcher::cancellable;
use crate::types::{NormalizedResponse, ResponseRecord};

/// Outcome of logging a response set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    /// Already present locally or in the store
    AlreadyLogged,
    Written,
}

pub struct ResponseLog {
    cache: RecommendationCache,
    clock: Arc<dyn Clock>,
}

impl ResponseLog {
    pub fn new(cache: RecommendationCache, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Log the normalized responses of a session unless they already are
    ///
    /// Nothing is written once `cancel` fires.
    pub async fn record(
        &self,
        user_id: &str,
        session_id: &str,
        responses: &NormalizedResponse,
        cancel: &CancellationToken,
    ) -> Result<LogOutcome, PipelineError> {
        let key = CacheKey::responses(user_id, session_id);

        let existing = cancellable(cancel, self.cache.get::<ResponseRecord>(&key)).await?;
        if existing.is_some() {
            tracing::debug!(user_id, session_id, "Responses already logged");
            return Ok(LogOutcome::AlreadyLogged);
        }

        let record = ResponseRecord {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            responses: responses.values().to_vec(),
            timestamp: self.clock.now(),
        };
        cancellable(cancel, self.cache.put(&key, &record)).await?;

        tracing::info!(user_id, session_id, "Logged questionnaire responses");
        Ok(LogOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalTier;
    use crate::clock::SystemClock;
    use crate::store::{MemoryCache, MemoryDocumentStore, RESPONSES_COLLECTION};
    use crate::testing::normalized_response;
    use serde_json::json;
    use std::time::Duration;

    fn log(store: Arc<MemoryDocumentStore>, local: Arc<MemoryCache>) -> ResponseLog {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tier = LocalTier::new(
            local,
            clock.clone(),
            chrono::Duration::hours(24),
            Duration::from_secs(1),
        );
        ResponseLog::new(
            RecommendationCache::new(tier, store, Duration::from_secs(1)),
            clock,
        )
    }

    #[tokio::test]
    async fn test_first_submission_writes_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let local = Arc::new(MemoryCache::new());
        let log = log(store.clone(), local.clone());

        let outcome = log.record("u1", "s1", &normalized_response(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LogOutcome::Written);
        let outcome = log.record("u1", "s1", &normalized_response(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LogOutcome::AlreadyLogged);

        assert_eq!(store.count(RESPONSES_COLLECTION), 1);
        assert!(local.contains("responses_u1_s1"));
    }

    #[tokio::test]
    async fn test_existing_document_warms_cache() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(
                RESPONSES_COLLECTION,
                "legacy",
                json!({
                    "userId": "u1",
                    "sessionId": "s1",
                    "responses": [1, "Yes"],
                    "timestamp": "2024-05-10T09:00:00Z"
                }),
            )
            .unwrap();
        let local = Arc::new(MemoryCache::new());
        let log = log(store.clone(), local.clone());

        let outcome = log.record("u1", "s1", &normalized_response(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LogOutcome::AlreadyLogged);
        assert_eq!(store.count(RESPONSES_COLLECTION), 1);
        assert!(local.contains("responses_u1_s1"));
    }

    #[tokio::test]
    async fn test_cancelled_log_writes_nothing() {
        let store = Arc::new(MemoryDocumentStore::new());
        let local = Arc::new(MemoryCache::new());
        let log = log(store.clone(), local.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = log
            .record("u1", "s1", &normalized_response(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(store.count(RESPONSES_COLLECTION), 0);
        assert!(!local.contains("responses_u1_s1"));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_offline(true);
        let log = log(store, Arc::new(MemoryCache::new()));
        let err = log.record("u1", "s1", &normalized_response(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
