//! Backing-store seam: collections, queries and the `Backend` trait

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use scenery_core::Document;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Derived representation stored in a `stash.*` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StashFormat {
    #[default]
    #[serde(rename = "3drepo")]
    Repo,
    Src,
    Json,
    X3d,
}

impl StashFormat {
    pub const ALL: [StashFormat; 4] = [
        StashFormat::Repo,
        StashFormat::Src,
        StashFormat::Json,
        StashFormat::X3d,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            StashFormat::Repo => "3drepo",
            StashFormat::Src => "src",
            StashFormat::Json => "json",
            StashFormat::X3d => "x3d",
        }
    }
}

impl fmt::Display for StashFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for StashFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StashFormat::ALL
            .into_iter()
            .find(|f| f.suffix() == s)
            .ok_or_else(|| format!("unknown stash format {s:?}"))
    }
}

/// Per-project collection family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Scene,
    History,
    Stash(StashFormat),
}

impl Collection {
    /// Stored name, e.g. `house.scene` or `house.stash.3drepo`.
    pub fn name(&self, project: &str) -> String {
        match self {
            Collection::Scene => format!("{project}.scene"),
            Collection::History => format!("{project}.history"),
            Collection::Stash(format) => format!("{project}.stash.{}", format.suffix()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A find request: filter, field projection, sort and window.
///
/// `filter` and `fields` use MongoDB query and projection syntax.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Document,
    pub fields: Option<Document>,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(filter: Document) -> Self {
        Query {
            filter,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn fields(mut self, fields: Option<Document>) -> Self {
        self.fields = fields;
        self
    }

    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Document store holding per-account collections and blob stores.
///
/// Implementations must make `insert_many` all-or-nothing: a reader sees
/// either every inserted document or none of them.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn find(
        &self,
        account: &str,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, BackendError>;

    async fn find_one(
        &self,
        account: &str,
        collection: &str,
        query: &Query,
    ) -> Result<Option<Document>, BackendError> {
        let query = query.clone().limit(1);
        Ok(self.find(account, collection, &query).await?.into_iter().next())
    }

    async fn count(
        &self,
        account: &str,
        collection: &str,
        filter: &Document,
    ) -> Result<usize, BackendError> {
        Ok(self.find(account, collection, &Query::new(filter.clone())).await?.len())
    }

    async fn insert_many(
        &self,
        account: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<(), BackendError>;

    async fn get_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, BackendError>;

    async fn put_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BackendError>;
}

pub type SharedBackend = Arc<dyn Backend>;

/// Unwrap a `json!` object literal into a `Document`; anything else yields an empty one.
pub(crate) fn document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Scene.name("house"), "house.scene");
        assert_eq!(Collection::History.name("house"), "house.history");
        assert_eq!(Collection::Stash(StashFormat::Repo).name("house"), "house.stash.3drepo");
        assert_eq!(Collection::Stash(StashFormat::X3d).name("house"), "house.stash.x3d");
    }

    #[test]
    fn test_stash_format_parse() {
        assert_eq!("3drepo".parse::<StashFormat>().unwrap(), StashFormat::Repo);
        assert_eq!("json".parse::<StashFormat>().unwrap(), StashFormat::Json);
        assert!("gltf".parse::<StashFormat>().is_err());
    }
}
