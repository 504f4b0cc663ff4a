//! In-memory `Backend`: account → collection → documents, plus per-collection blob stores

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use scenery_core::{Document, codec, labels};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{Backend, Query};
use crate::error::BackendError;
use crate::filter;

type Collections = BTreeMap<String, BTreeMap<String, Vec<Document>>>;
type Blobs = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<u8>>>>;

/// Full contents of a `MemoryBackend`, used for persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub collections: Collections,
    pub blobs: Blobs,
}

/// Backend that keeps everything in process memory.
///
/// Locks are only held for the duration of a single call and never across
/// another await point.
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<Collections>,
    blobs: RwLock<Blobs>,
    failures: DashMap<(String, String), String>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        MemoryBackend {
            collections: RwLock::new(snapshot.collections),
            blobs: RwLock::new(snapshot.blobs),
            failures: DashMap::new(),
        }
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            collections: self.collections.read().await.clone(),
            blobs: self.blobs.read().await.clone(),
        }
    }

    /// Make every call touching `collection` fail with `Unavailable`.
    pub fn fail_collection(&self, account: &str, collection: &str, reason: impl Into<String>) {
        self.failures
            .insert((account.to_string(), collection.to_string()), reason.into());
    }

    pub fn heal_collection(&self, account: &str, collection: &str) {
        self.failures.remove(&(account.to_string(), collection.to_string()));
    }

    pub async fn accounts(&self) -> Vec<String> {
        self.collections.read().await.keys().cloned().collect()
    }

    pub async fn collection_names(&self, account: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(account)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, account: &str, collection: &str) -> Result<(), BackendError> {
        match self.failures.get(&(account.to_string(), collection.to_string())) {
            Some(reason) => Err(BackendError::Unavailable(reason.value().clone())),
            None => Ok(()),
        }
    }
}

fn text_of(value: &serde_json::Value) -> String {
    codec::id_text(value).unwrap_or_else(|| value.to_string())
}

/// Unique key of a document: its `_id`, compounded with `rev_id` when present
/// so a stash collection can hold the same node for several revisions.
fn key_of(doc: &Document) -> Option<String> {
    let id = text_of(doc.get(labels::UNIQUE_ID)?);
    Some(match doc.get(labels::REV_ID) {
        Some(rev) => format!("{id}@{}", text_of(rev)),
        None => id,
    })
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn find(
        &self,
        account: &str,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, BackendError> {
        self.check(account, collection)?;
        filter::validate(&query.filter)?;

        let mut found = {
            let collections = self.collections.read().await;
            let Some(docs) = collections.get(account).and_then(|c| c.get(collection)) else {
                return Ok(Vec::new());
            };
            let mut found = Vec::new();
            for doc in docs {
                if filter::matches(doc, &query.filter)? {
                    found.push(doc.clone());
                }
            }
            found
        };

        filter::sort(&mut found, &query.sort);
        let window = found
            .into_iter()
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX));
        match &query.fields {
            Some(fields) => window.map(|doc| filter::project(doc, fields)).collect(),
            None => Ok(window.collect()),
        }
    }

    async fn insert_many(
        &self,
        account: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<(), BackendError> {
        self.check(account, collection)?;
        if docs.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.write().await;
        let target = collections
            .entry(account.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut keys: std::collections::HashSet<String> =
            target.iter().filter_map(key_of).collect();
        for doc in &docs {
            if let Some(key) = key_of(doc) {
                if !keys.insert(key.clone()) {
                    return Err(BackendError::DuplicateKey {
                        collection: collection.to_string(),
                        key,
                    });
                }
            }
        }

        debug!(account, collection, count = docs.len(), "inserting documents");
        target.extend(docs);
        Ok(())
    }

    async fn get_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.check(account, collection)?;
        Ok(self
            .blobs
            .read()
            .await
            .get(account)
            .and_then(|c| c.get(collection))
            .and_then(|b| b.get(name))
            .cloned())
    }

    async fn put_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.check(account, collection)?;
        self.blobs
            .write()
            .await
            .entry(account.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .insert(name.to_string(), bytes);
        Ok(())
    }
}
