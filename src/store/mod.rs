//! Storage backends
//!
//! The pipeline talks to two independently owned stores: a remote document
//! store (shared across devices) and a local key-value cache (private to the
//! device). Both are reached through the traits in this module so that the
//! managed backend can be swapped for the in-memory or file-backed
//! implementations shipped here.

mod file_cache;
mod memory;

pub use file_cache::FileCache;
pub use memory::{MemoryCache, MemoryDocumentStore};

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Questionnaire collection
pub const QUESTIONS_COLLECTION: &str = "questionare";
/// Therapy environment metadata collection
pub const ENVIRONMENTS_COLLECTION: &str = "environments";
/// Logged questionnaire responses
pub const RESPONSES_COLLECTION: &str = "Responses";
/// Composed recommendations
pub const SUGGESTIONS_COLLECTION: &str = "therapySuggestions";
/// Post-session feedback
pub const FEEDBACK_COLLECTION: &str = "feedback";
/// Free-form journal entries
pub const JOURNAL_COLLECTION: &str = "journal";

/// A stored document and its identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Equality filter on a top-level document field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Value) -> bool {
        data.get(&self.field) == Some(&self.value)
    }
}

/// Remote document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of a collection, ordered by document id
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// A single document by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Documents whose fields equal every filter
    async fn find(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<Document>, StoreError>;

    /// Create or replace the document with the given id
    async fn upsert(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;
}

/// Local persistent key-value cache holding serialized strings
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_item(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// Bound a storage call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Deterministic document id for a (user, session, operation) write
pub fn idempotency_key(user_id: &str, session_id: &str, operation: &str) -> String {
    format!("{user_id}_{session_id}_{operation}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_filter_matches_top_level_field() {
        let doc = json!({"userId": "u1", "sessionId": "s1"});
        assert!(FieldFilter::eq("userId", "u1").matches(&doc));
        assert!(!FieldFilter::eq("userId", "u2").matches(&doc));
        assert!(!FieldFilter::eq("missing", "u1").matches(&doc));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), StoreError> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        assert_eq!(
            idempotency_key("u1", "session_1", "suggestion"),
            idempotency_key("u1", "session_1", "suggestion")
        );
        assert_ne!(
            idempotency_key("u1", "session_1", "suggestion"),
            idempotency_key("u1", "session_1", "responses")
        );
    }
}
