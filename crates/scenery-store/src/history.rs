//! Append-only revision history per project
//!
//! "Head" is never stored: it is the latest revision by timestamp carrying
//! the branch's identifier. Appends to one branch are serialized through a
//! per-branch lock; readers take no locks.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use dashmap::DashMap;
use scenery_core::{
    BranchId, BranchRef, Commit, NodeKind, Revision, RevisionId, RevisionInfo, RevisionSummary,
    UniqueId, codec, labels,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{Collection, Query, SharedBackend, SortOrder, document};
use crate::error::{Result, StoreError};

type BranchKey = (String, String, BranchId);

pub struct HistoryStore {
    backend: SharedBackend,
    append_locks: DashMap<BranchKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("branches_locked", &self.locked_branches())
            .finish_non_exhaustive()
    }
}

fn revisions_filter() -> scenery_core::Document {
    document(json!({ labels::TYPE: NodeKind::Revision.label() }))
}

fn branch_filter(branch: BranchId) -> scenery_core::Document {
    let mut filter = revisions_filter();
    filter.insert(labels::SHARED_ID.into(), codec::encode_id(&branch.0));
    filter
}

impl HistoryStore {
    pub fn new(backend: SharedBackend) -> Self {
        HistoryStore {
            backend,
            append_locks: DashMap::new(),
        }
    }

    /// Branches with an append in flight.
    pub fn locked_branches(&self) -> usize {
        self.append_locks.len()
    }

    fn collection(project: &str) -> String {
        Collection::History.name(project)
    }

    /// Resolve a branch head or an explicit revision to a concrete snapshot.
    pub async fn resolve_snapshot(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Revision> {
        match reference {
            BranchRef::Revision(id) => self.revision(account, project, *id).await,
            BranchRef::Branch(name) => self.head_of(account, project, name).await,
        }
    }

    /// Latest revision of `branch`.
    pub async fn head_of(&self, account: &str, project: &str, branch: &str) -> Result<Revision> {
        match self.head_by_id(account, project, BranchId::from_name(branch)).await? {
            Some(head) => Ok(head),
            None => Err(self.missing_branch(account, project, branch).await?),
        }
    }

    async fn head_by_id(
        &self,
        account: &str,
        project: &str,
        branch: BranchId,
    ) -> Result<Option<Revision>> {
        let query =
            Query::new(branch_filter(branch)).sort_by(labels::TIMESTAMP, SortOrder::Descending);
        let found = self
            .backend
            .find_one(account, &Self::collection(project), &query)
            .await?;
        Ok(found.map(Revision::from_document).transpose()?)
    }

    /// Distinguish "project has no history at all" from "this branch has none".
    async fn missing_branch(
        &self,
        account: &str,
        project: &str,
        branch: &str,
    ) -> Result<StoreError> {
        let revisions = self
            .backend
            .count(account, &Self::collection(project), &revisions_filter())
            .await?;
        debug!(account, project, branch, revisions, "branch has no head");
        Ok(if revisions == 0 {
            StoreError::ProjectHistoryNotFound {
                account: account.to_string(),
                project: project.to_string(),
            }
        } else {
            StoreError::BranchNotFound {
                account: account.to_string(),
                project: project.to_string(),
                branch: branch.to_string(),
            }
        })
    }

    /// Fetch one revision by id.
    pub async fn revision(&self, account: &str, project: &str, id: RevisionId) -> Result<Revision> {
        let mut filter = revisions_filter();
        filter.insert(labels::UNIQUE_ID.into(), codec::encode_id(&id.0));
        let found = self
            .backend
            .find_one(account, &Self::collection(project), &Query::new(filter))
            .await?;
        match found {
            Some(doc) => Ok(Revision::from_document(doc)?),
            None => Err(StoreError::HistoryNotFound {
                account: account.to_string(),
                project: project.to_string(),
                revision: id,
            }),
        }
    }

    /// Append a revision to `branch` on top of `parent`.
    ///
    /// `parent` must be the current head of the branch. A parent from another
    /// branch is accepted when `branch` has no history yet (a fork); `None` is
    /// only accepted for an empty branch.
    pub async fn append_revision(
        &self,
        account: &str,
        project: &str,
        branch: &str,
        parent: Option<RevisionId>,
        commit: Commit,
    ) -> Result<Revision> {
        let branch_id = BranchId::from_name(branch);
        let key = (account.to_string(), project.to_string(), branch_id);
        let lock = self.append_locks.entry(key.clone()).or_default().clone();
        let appended = {
            let _guard = lock.lock().await;
            self.append_locked(account, project, branch, branch_id, parent, commit)
                .await
        };
        drop(lock);
        // Drop the entry unless another append still holds a handle.
        self.append_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        appended
    }

    async fn append_locked(
        &self,
        account: &str,
        project: &str,
        branch: &str,
        branch_id: BranchId,
        parent: Option<RevisionId>,
        commit: Commit,
    ) -> Result<Revision> {
        let head = self.head_by_id(account, project, branch_id).await?;
        let parent_revision = match parent {
            Some(id) => Some(self.revision(account, project, id).await?),
            None => None,
        };

        match (&head, &parent_revision) {
            (None, _) => {}
            (Some(head), Some(parent)) if head.id == parent.id => {}
            (Some(_), _) => {
                return Err(StoreError::StaleParent {
                    branch: branch.to_string(),
                    parent: parent.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string()),
                });
            }
        }

        let base: &[UniqueId] = parent_revision
            .as_ref()
            .map(|p| p.current.as_slice())
            .unwrap_or(&[]);
        let live: HashSet<&UniqueId> = base.iter().collect();
        for incoming in commit
            .added
            .iter()
            .map(|n| &n.unique_id)
            .chain(commit.modified.iter().map(|m| &m.to))
        {
            if live.contains(incoming) {
                return Err(StoreError::AlreadyLive(*incoming));
            }
        }

        // Stored with millisecond precision.
        let now = Utc::now().trunc_subsecs(3);
        let floor = [head.as_ref(), parent_revision.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|r| r.timestamp)
            .max()
            .map(|t| t + Duration::milliseconds(1));
        let timestamp = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };

        let revision = Revision {
            id: RevisionId::generate(),
            branch: branch_id,
            parents: parent.into_iter().collect(),
            current: commit.apply_to(base),
            added: commit.added.iter().map(|n| n.shared_id).collect(),
            deleted: commit.deleted.iter().map(|n| n.shared_id).collect(),
            modified: commit.modified.iter().map(|m| m.shared_id).collect(),
            author: commit.author,
            message: commit.message,
            tag: commit.tag,
            timestamp: Some(timestamp),
            extra: Default::default(),
        };

        self.backend
            .insert_many(account, &Self::collection(project), vec![revision.to_document()])
            .await?;
        info!(
            account,
            project,
            branch,
            revision = %revision.id,
            live = revision.current.len(),
            "appended revision"
        );
        Ok(revision)
    }

    /// Revisions newest first, optionally narrowed to one branch and to the
    /// inclusive index window `from..=to`.
    pub async fn list_revisions(
        &self,
        account: &str,
        project: &str,
        branch: Option<&str>,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Vec<RevisionSummary>> {
        let filter = match branch {
            Some(name) => branch_filter(BranchId::from_name(name)),
            None => revisions_filter(),
        };
        let mut query = Query::new(filter).sort_by(labels::TIMESTAMP, SortOrder::Descending);
        if let Some(from) = from {
            query = query.skip(from);
        }
        if let Some(to) = to {
            query = query.limit(to.saturating_add(1).saturating_sub(from.unwrap_or(0)));
        }

        let docs = self.backend.find(account, &Self::collection(project), &query).await?;
        docs.into_iter()
            .map(|doc| -> Result<RevisionSummary> { Ok(Revision::from_document(doc)?.summary()) })
            .collect()
    }

    /// Distinct branch identifiers, in order of first revision.
    pub async fn list_branches(&self, account: &str, project: &str) -> Result<Vec<BranchId>> {
        let query = Query::new(revisions_filter())
            .fields(Some(document(json!({ labels::SHARED_ID: 1, labels::TIMESTAMP: 1 }))))
            .sort_by(labels::TIMESTAMP, SortOrder::Ascending);
        let docs = self.backend.find(account, &Self::collection(project), &query).await?;

        let mut seen = HashSet::new();
        let mut branches = Vec::new();
        for doc in docs {
            let branch = match doc.get(labels::SHARED_ID) {
                Some(value) => BranchId(codec::decode_id(value)?),
                None => BranchId::MASTER,
            };
            if seen.insert(branch) {
                branches.push(branch);
            }
        }
        Ok(branches)
    }

    pub async fn revision_info(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<RevisionInfo> {
        Ok(self.resolve_snapshot(account, project, reference).await?.info())
    }

    /// Latest revision whose live set contains `unique_id`.
    pub async fn revision_containing(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
    ) -> Result<Revision> {
        let mut filter = revisions_filter();
        filter.insert(labels::CURRENT.into(), codec::encode_id(&unique_id.0));
        let query = Query::new(filter).sort_by(labels::TIMESTAMP, SortOrder::Descending);
        match self.backend.find_one(account, &Self::collection(project), &query).await? {
            Some(doc) => Ok(Revision::from_document(doc)?),
            None => Err(StoreError::object_not_found(
                account,
                project,
                format!("revision containing {unique_id}"),
            )),
        }
    }
}
