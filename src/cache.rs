//! Two-tier recommendation cache
//!
//! The local tier is a device-private key-value cache whose entries carry a
//! write timestamp and expire after the configured TTL. The remote tier is the
//! shared document store, queried by (`userId`, `sessionId`). Reads try local
//! first and warm it from a remote hit; writes go remote first and then mirror
//! locally.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::store::{
    idempotency_key, with_timeout, DocumentStore, FieldFilter, LocalCache, RESPONSES_COLLECTION,
    SUGGESTIONS_COLLECTION,
};

/// Local cache key; each kind has its own prefix so kinds never collide
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Responses { user_id: String, session_id: String },
    TherapySuggestion { user_id: String, session_id: String },
    Environment { environment_id: String },
}

impl CacheKey {
    pub fn responses(user_id: &str, session_id: &str) -> Self {
        CacheKey::Responses {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn therapy_suggestion(user_id: &str, session_id: &str) -> Self {
        CacheKey::TherapySuggestion {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn environment(environment_id: &str) -> Self {
        CacheKey::Environment {
            environment_id: environment_id.to_string(),
        }
    }

    /// Remote collection and write operation for session-scoped keys
    fn remote(&self) -> Option<(&'static str, &'static str, &str, &str)> {
        match self {
            CacheKey::Responses {
                user_id,
                session_id,
            } => Some((RESPONSES_COLLECTION, "responses", user_id, session_id)),
            CacheKey::TherapySuggestion {
                user_id,
                session_id,
            } => Some((SUGGESTIONS_COLLECTION, "suggestion", user_id, session_id)),
            CacheKey::Environment { .. } => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Responses {
                user_id,
                session_id,
            } => write!(f, "responses_{user_id}_{session_id}"),
            CacheKey::TherapySuggestion {
                user_id,
                session_id,
            } => write!(f, "therapy_suggestion_{user_id}_{session_id}"),
            CacheKey::Environment { environment_id } => write!(f, "environment_{environment_id}"),
        }
    }
}

/// Serialized local cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch milliseconds
    pub timestamp: i64,
}

/// TTL-enforcing view over a local cache
#[derive(Clone)]
pub struct LocalTier {
    cache: Arc<dyn LocalCache>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    timeout: Duration,
}

impl LocalTier {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            clock,
            ttl,
            timeout,
        }
    }

    /// Read a fresh entry; expired or unreadable entries are removed and miss
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let key = key.to_string();
        let raw = match with_timeout(self.timeout, self.cache.get_item(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = %key, "Local cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Local cache read failed");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                self.evict(&key).await;
                return None;
            }
        };

        let age_ms = self.clock.now_millis() - entry.timestamp;
        if age_ms >= self.ttl.num_milliseconds() {
            tracing::debug!(key = %key, age_ms, "Cache entry expired");
            self.evict(&key).await;
            return None;
        }

        tracing::debug!(key = %key, age_ms, "Local cache hit");
        Some(entry.data)
    }

    /// Write an entry stamped with the current time
    pub async fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), PipelineError> {
        let entry = CacheEntry {
            data: value,
            timestamp: self.clock.now_millis(),
        };
        let raw = serde_json::to_string(&entry)?;
        with_timeout(self.timeout, self.cache.set_item(&key.to_string(), raw)).await?;
        Ok(())
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = with_timeout(self.timeout, self.cache.remove_item(key)).await {
            tracing::warn!(key = %key, error = %e, "Failed to evict cache entry");
        }
    }
}

/// Local tier backed by the shared document store
#[derive(Clone)]
pub struct RecommendationCache {
    local: LocalTier,
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl RecommendationCache {
    pub fn new(local: LocalTier, store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            local,
            store,
            timeout,
        }
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub async fn get_local<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.local.get(key).await
    }

    /// Look the key up in the document store and warm the local tier on a hit
    pub async fn get_remote<T>(&self, key: &CacheKey) -> Result<Option<T>, PipelineError>
    where
        T: Serialize + DeserializeOwned,
    {
        let Some((collection, _, user_id, session_id)) = key.remote() else {
            return Ok(None);
        };

        let filters = [
            FieldFilter::eq("userId", user_id),
            FieldFilter::eq("sessionId", session_id),
        ];
        let documents = with_timeout(self.timeout, self.store.find(collection, &filters)).await?;

        for doc in documents {
            match serde_json::from_value::<T>(doc.data) {
                Ok(value) => {
                    tracing::debug!(key = %key, document_id = %doc.id, "Remote cache hit");
                    self.mirror(key, &value).await;
                    return Ok(Some(value));
                }
                Err(e) => {
                    tracing::warn!(document_id = %doc.id, error = %e, "Skipping malformed document");
                }
            }
        }

        tracing::debug!(key = %key, "Remote cache miss");
        Ok(None)
    }

    /// Local tier first, then the document store
    pub async fn get<T>(&self, key: &CacheKey) -> Result<Option<T>, PipelineError>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(value) = self.get_local(key).await {
            return Ok(Some(value));
        }
        self.get_remote(key).await
    }

    /// Upsert into the document store, then mirror locally
    pub async fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), PipelineError> {
        if let Some((collection, operation, user_id, session_id)) = key.remote() {
            let id = idempotency_key(user_id, session_id, operation);
            let data = serde_json::to_value(value)?;
            with_timeout(self.timeout, self.store.upsert(collection, &id, data)).await?;
            tracing::debug!(collection, document_id = %id, "Stored document");
        }

        self.mirror(key, value).await;
        Ok(())
    }

    async fn mirror<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if let Err(e) = self.local.put(key, value).await {
            tracing::warn!(key = %key, error = %e, "Failed to mirror into local cache");
        }
    }
}
