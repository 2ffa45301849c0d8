//! In-memory store implementations
//!
//! Used by the CLI (seeded from a JSON snapshot) and as test doubles.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{Document, DocumentStore, FieldFilter, LocalCache};
use crate::error::StoreError;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

/// Document store held in process memory
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
    offline: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot shaped as `{collection: {docId: document}}`
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let collections: Collections = serde_json::from_str(json)?;
        Ok(Self {
            collections: RwLock::new(collections),
            offline: AtomicBool::new(false),
        })
    }

    /// Serialize the current contents as a snapshot
    pub fn to_json(&self) -> Result<String, StoreError> {
        let collections = self.read()?;
        Ok(serde_json::to_string_pretty(&*collections)?)
    }

    /// Insert a document synchronously (seeding helper)
    pub fn insert(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let mut collections = self.write()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        Ok(())
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.read()
            .map(|c| c.get(collection).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Simulate loss of connectivity; every call fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("document store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_online()?;
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn find(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.list(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(&doc.data)))
            .collect())
    }

    async fn upsert(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.insert(collection, id, data)
    }
}

/// Local cache held in process memory
#[derive(Debug, Default)]
pub struct MemoryCache {
    items: RwLock<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, as a full or corrupted device store would
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items
            .read()
            .map(|items| items.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::Unavailable("cache lock poisoned".to_string()))?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("cache is read-only".to_string()));
        }
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::Unavailable("cache lock poisoned".to_string()))?;
        items.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::Unavailable("cache lock poisoned".to_string()))?;
        items.remove(key);
        Ok(())
    }
}
