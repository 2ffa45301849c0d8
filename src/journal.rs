//! Journal entries and per-user history
//!
//! Journal entries are free text saved outside any session. History lists a
//! user's journal entries or feedback, newest first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::store::{
    with_timeout, Document, DocumentStore, FieldFilter, FEEDBACK_COLLECTION, JOURNAL_COLLECTION,
};
use crate::types::JournalRecord;

/// Which history to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Journal,
    Feedback,
}

impl HistoryKind {
    pub fn collection(&self) -> &'static str {
        match self {
            HistoryKind::Journal => JOURNAL_COLLECTION,
            HistoryKind::Feedback => FEEDBACK_COLLECTION,
        }
    }

    /// Document field holding the entry text
    fn content_field(&self) -> &'static str {
        match self {
            HistoryKind::Journal => "content",
            HistoryKind::Feedback => "feedback",
        }
    }
}

/// One listed history entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Journal {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Journal {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            clock,
            timeout,
        }
    }

    /// Save a journal entry for the signed-in user
    pub async fn record_entry(&self, text: &str) -> Result<JournalRecord, PipelineError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(PipelineError::Validation("Journal entry is empty".to_string()));
        }
        let user_id = self
            .auth
            .current_user()
            .ok_or(PipelineError::AuthenticationRequired)?;

        let record = JournalRecord {
            user_id,
            content: content.to_string(),
            timestamp: self.clock.now(),
        };

        // Entries are not tied to a session, so each save is a new document
        let id = uuid::Uuid::new_v4().to_string();
        with_timeout(
            self.timeout,
            self.store
                .upsert(JOURNAL_COLLECTION, &id, serde_json::to_value(&record)?),
        )
        .await?;

        tracing::info!(user_id = %record.user_id, entry_id = %id, "Saved journal entry");
        Ok(record)
    }

    /// The signed-in user's entries of `kind`, newest first
    pub async fn history(&self, kind: HistoryKind) -> Result<Vec<HistoryEntry>, PipelineError> {
        let user_id = self
            .auth
            .current_user()
            .ok_or(PipelineError::AuthenticationRequired)?;

        let docs = with_timeout(
            self.timeout,
            self.store.find(
                kind.collection(),
                &[FieldFilter::eq("userId", user_id.as_str())],
            ),
        )
        .await?;

        let mut entries: Vec<HistoryEntry> = docs
            .iter()
            .filter_map(|doc| {
                let entry = decode_entry(doc, kind);
                if entry.is_none() {
                    tracing::warn!(
                        collection = kind.collection(),
                        document_id = %doc.id,
                        "Skipping history document without content or timestamp"
                    );
                }
                entry
            })
            .collect();

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}

fn decode_entry(doc: &Document, kind: HistoryKind) -> Option<HistoryEntry> {
    let content = doc.data.get(kind.content_field())?.as_str()?;
    // Feedback saved before `timestamp` was written only has `createdAt`
    let timestamp = ["timestamp", "createdAt"]
        .iter()
        .find_map(|field| parse_timestamp(doc.data.get(*field)?))?;

    Some(HistoryEntry {
        id: doc.id.clone(),
        content: content.to_string(),
        timestamp,
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
