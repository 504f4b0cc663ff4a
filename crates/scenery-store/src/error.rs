//! Store error kinds

use std::time::Duration;

use scenery_core::{GraphError, IdError, NodeError, RevisionId, UniqueId};
use thiserror::Error;

/// Failure inside the backing store. Never retried by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key {key} in {collection}")]
    DuplicateKey { collection: String, key: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("backing store I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no history for project {account}/{project}")]
    ProjectHistoryNotFound { account: String, project: String },

    #[error("branch {branch} not found in {account}/{project}")]
    BranchNotFound {
        account: String,
        project: String,
        branch: String,
    },

    #[error("revision {revision} not found in {account}/{project}")]
    HistoryNotFound {
        account: String,
        project: String,
        revision: RevisionId,
    },

    #[error("object {what} not found in {account}/{project}")]
    ObjectNotFound {
        account: String,
        project: String,
        what: String,
    },

    /// `parent` is the proposed parent revision, or `none` for a root commit.
    #[error("parent {parent} is not the head of branch {branch}")]
    StaleParent { branch: String, parent: String },

    #[error("unique id {0} is already live in the parent revision")]
    AlreadyLive(UniqueId),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Identifier(#[from] IdError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidQuery(reason) => StoreError::InvalidQuery(reason),
            other => StoreError::Backend(other),
        }
    }
}

impl StoreError {
    /// Whether this is a "not found" result rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ProjectHistoryNotFound { .. }
                | StoreError::BranchNotFound { .. }
                | StoreError::HistoryNotFound { .. }
                | StoreError::ObjectNotFound { .. }
        )
    }

    /// Whether the caller supplied input that cannot be interpreted.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidQuery(_) | StoreError::Identifier(_) | StoreError::Node(_)
        )
    }

    pub(crate) fn object_not_found(account: &str, project: &str, what: impl Into<String>) -> Self {
        StoreError::ObjectNotFound {
            account: account.to_string(),
            project: project.to_string(),
            what: what.into(),
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
