//! Recursive expansion of reference nodes into the projects they point at
//!
//! Resolution is best effort: a reference whose target cannot be resolved is
//! reported with an `Unresolved` outcome while its siblings carry on. Each
//! path through the federation carries its chain of visited snapshots
//! (project and resolved revision), so a cycle is reported instead of
//! followed; diamonds are expanded once per path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use scenery_core::{
    BranchRef, Node, NodeKind, Reference, Revision, RevisionId, SceneNode, bulk_decode, labels,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use tracing::{debug, warn};

use crate::backend::{Collection, Query, SharedBackend, document};
use crate::error::{Result, StoreError};
use crate::history::HistoryStore;
use crate::stash::live_filter;

pub const DEFAULT_MAX_DEPTH: usize = 16;

type Visited = (ProjectKey, RevisionId);

/// An (account, project) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey {
    pub account: String,
    pub project: String,
}

impl ProjectKey {
    pub fn new(account: impl Into<String>, project: impl Into<String>) -> Self {
        ProjectKey {
            account: account.into(),
            project: project.into(),
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.project)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExpansionOutcome {
    Resolved { revision: RevisionId },
    Unresolved { reason: String },
    /// The target snapshot is already on the path from the root.
    Cycle,
    /// The reference sits deeper than the configured maximum.
    DepthExceeded,
}

impl ExpansionOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ExpansionOutcome::Resolved { .. })
    }
}

/// One reference node and what it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceExpansion {
    /// Zero for references in the root project.
    pub depth: usize,
    pub parent: ProjectKey,
    #[serde(serialize_with = "serialize_reference")]
    pub reference: Reference,
    pub target: ProjectKey,
    pub target_ref: BranchRef,
    pub outcome: ExpansionOutcome,
}

fn serialize_reference<S: Serializer>(
    reference: &Reference,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    json!({
        "unique_id": reference.unique_id(),
        "shared_id": reference.shared_id(),
        "name": reference.base.name,
        "owner": reference.owner,
        "project": reference.project,
    })
    .serialize(serializer)
}

pub struct FederationResolver {
    backend: SharedBackend,
    history: Arc<HistoryStore>,
    max_depth: usize,
}

impl fmt::Debug for FederationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationResolver")
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl FederationResolver {
    pub fn new(backend: SharedBackend, history: Arc<HistoryStore>) -> Self {
        FederationResolver {
            backend,
            history,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expand every reference reachable from a snapshot, flattened in pre-order:
    /// each reference is followed by the expansions of its target.
    ///
    /// Failing to resolve the root snapshot is an error; anything below it is
    /// reported per reference.
    pub async fn resolve_federation(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Vec<ReferenceExpansion>> {
        let revision = self.history.resolve_snapshot(account, project, reference).await?;
        let root = ProjectKey::new(account, project);
        let chain = vec![(root.clone(), revision.id)];
        let expansions = self.expand(root, revision, chain, 0).await?;
        debug!(account, project, expansions = expansions.len(), "resolved federation");
        Ok(expansions)
    }

    /// [`resolve_federation`](Self::resolve_federation) bounded by `limit`.
    /// On expiry all partial work is dropped.
    pub async fn resolve_federation_within(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        limit: Duration,
    ) -> Result<Vec<ReferenceExpansion>> {
        tokio::time::timeout(limit, self.resolve_federation(account, project, reference))
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    fn expand<'a>(
        &'a self,
        key: ProjectKey,
        revision: Revision,
        chain: Vec<Visited>,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<ReferenceExpansion>>> {
        async move {
            let references = self.references_in(&key, &revision).await?;
            let expanded = join_all(
                references
                    .into_iter()
                    .map(|reference| self.expand_reference(&key, reference, &chain, depth)),
            )
            .await;
            Ok(expanded.into_iter().flatten().collect())
        }
        .boxed()
    }

    async fn expand_reference(
        &self,
        parent: &ProjectKey,
        reference: Reference,
        chain: &[Visited],
        depth: usize,
    ) -> Vec<ReferenceExpansion> {
        let target = ProjectKey::new(
            reference.target_account(&parent.account),
            reference.project.clone(),
        );
        let target_ref = reference.target_ref();
        let mut entry = ReferenceExpansion {
            depth,
            parent: parent.clone(),
            reference,
            target: target.clone(),
            target_ref: target_ref.clone(),
            outcome: ExpansionOutcome::Cycle,
        };

        let revision = match self
            .history
            .resolve_snapshot(&target.account, &target.project, &target_ref)
            .await
        {
            Ok(revision) => revision,
            Err(err) => {
                warn!(
                    parent = %parent,
                    target = %target,
                    reference = %target_ref,
                    error = %err,
                    "unresolved reference"
                );
                entry.outcome = ExpansionOutcome::Unresolved {
                    reason: err.to_string(),
                };
                return vec![entry];
            }
        };

        let visited = (target.clone(), revision.id);
        if chain.contains(&visited) {
            warn!(parent = %parent, target = %target, revision = %revision.id, "federation cycle");
            return vec![entry];
        }
        if depth >= self.max_depth {
            warn!(parent = %parent, target = %target, depth, "federation too deep");
            entry.outcome = ExpansionOutcome::DepthExceeded;
            return vec![entry];
        }

        entry.outcome = ExpansionOutcome::Resolved { revision: revision.id };
        let mut path = chain.to_vec();
        path.push(visited);
        let children = match self.expand(target, revision, path, depth + 1).await {
            Ok(children) => children,
            Err(err) => {
                warn!(parent = %parent, error = %err, "could not list references of target");
                entry.outcome = ExpansionOutcome::Unresolved {
                    reason: err.to_string(),
                };
                Vec::new()
            }
        };

        let mut out = Vec::with_capacity(children.len() + 1);
        out.push(entry);
        out.extend(children);
        out
    }

    /// Reference nodes live in `revision`.
    async fn references_in(&self, key: &ProjectKey, revision: &Revision) -> Result<Vec<Reference>> {
        let filter = document(json!({
            "$and": [
                { labels::TYPE: NodeKind::Reference.label() },
                live_filter(revision),
            ]
        }));
        let docs = self
            .backend
            .find(&key.account, &Collection::Scene.name(&key.project), &Query::new(filter))
            .await?;
        Ok(bulk_decode(docs)
            .nodes
            .into_iter()
            .filter_map(|node| match node {
                Node::Reference(reference) => Some(reference),
                _ => None,
            })
            .collect())
    }
}
