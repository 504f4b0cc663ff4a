//! Query facade over history, stash, federation and diff
//!
//! Every read resolves a snapshot first, then reads through the stash
//! resolver so callers never see whether rows came from a stash or the raw
//! scene.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use scenery_core::{
    BranchId, BranchRef, Commit, DiffEngine, Document, Identifier, Node, NodeError, NodeKind,
    NodeRef, Revision, RevisionId, RevisionInfo, RevisionSummary, SceneGraph, SceneNode, SharedId,
    SnapshotDiff, UniqueId, bulk_decode, codec, labels,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::backend::{Collection, Query, SharedBackend, StashFormat, document};
use crate::error::{Result, StoreError};
use crate::federation::{FederationResolver, ReferenceExpansion};
use crate::history::HistoryStore;
use crate::stash::{NoopNotifier, Projection, Source, StashNotifier, StashResolver};

/// An assembled snapshot and where its rows came from.
#[derive(Debug)]
pub struct Scene {
    pub revision: RevisionId,
    pub source: Source,
    pub graph: SceneGraph,
}

/// A single node and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub source: Source,
    pub node: Node,
}

pub struct SceneStore {
    backend: SharedBackend,
    history: Arc<HistoryStore>,
    stash: StashResolver,
    notifier: Arc<dyn StashNotifier>,
    federation: FederationResolver,
    federation_timeout: Option<Duration>,
    diff: DiffEngine,
}

impl std::fmt::Debug for SceneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneStore")
            .field("stash", &self.stash)
            .field("federation", &self.federation)
            .field("federation_timeout", &self.federation_timeout)
            .finish_non_exhaustive()
    }
}

fn id_filter(field: &str, id: &Identifier) -> Document {
    let mut filter = Document::new();
    filter.insert(field.to_string(), codec::encode_id(id));
    filter
}

/// Projection dropping the bulky mesh buffers.
fn without_buffers() -> Document {
    labels::MESH_BUFFER_FIELDS
        .iter()
        .map(|field| (field.to_string(), json!(0)))
        .collect()
}

impl SceneStore {
    pub fn new(backend: SharedBackend) -> Self {
        let history = Arc::new(HistoryStore::new(backend.clone()));
        SceneStore {
            stash: StashResolver::new(backend.clone(), StashFormat::default()),
            notifier: Arc::new(NoopNotifier),
            federation: FederationResolver::new(backend.clone(), history.clone()),
            federation_timeout: None,
            diff: DiffEngine::new(),
            history,
            backend,
        }
    }

    pub fn with_stash_format(mut self, format: StashFormat) -> Self {
        self.stash =
            StashResolver::new(self.backend.clone(), format).with_notifier(self.notifier.clone());
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StashNotifier>) -> Self {
        self.notifier = notifier;
        self.stash = StashResolver::new(self.backend.clone(), self.stash.format())
            .with_notifier(self.notifier.clone());
        self
    }

    pub fn with_federation_depth(mut self, max_depth: usize) -> Self {
        self.federation = FederationResolver::new(self.backend.clone(), self.history.clone())
            .with_max_depth(max_depth);
        self
    }

    pub fn with_federation_timeout(mut self, timeout: Duration) -> Self {
        self.federation_timeout = Some(timeout);
        self
    }

    pub fn with_diff_engine(mut self, diff: DiffEngine) -> Self {
        self.diff = diff;
        self
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn stash_format(&self) -> StashFormat {
        self.stash.format()
    }

    // ---- snapshot reads ----

    /// Rows of the resolved snapshot matching `filter`, through the stash when possible.
    pub async fn query_scene(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        filter: &Document,
        fields: Option<&Document>,
    ) -> Result<(Revision, Projection)> {
        let revision = self.history.resolve_snapshot(account, project, reference).await?;
        let projection = self
            .stash
            .get_projection(account, project, &revision, filter, fields)
            .await?;
        Ok((revision, projection))
    }

    /// The whole snapshot as a graph. Mesh buffers are only loaded when `full`.
    pub async fn scene(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        full: bool,
    ) -> Result<Scene> {
        let fields = (!full).then(without_buffers);
        let (revision, mut projection) = self
            .query_scene(account, project, reference, &Document::new(), fields.as_ref())
            .await?;
        if full {
            for doc in &mut projection.documents {
                self.join_mesh_blobs(account, project, projection.source, doc).await?;
            }
        }

        let graph = SceneGraph::from_documents(projection.documents)?;
        debug!(
            account,
            project,
            revision = %revision.id,
            nodes = graph.node_count(),
            source = ?projection.source,
            "assembled scene"
        );
        Ok(Scene {
            revision: revision.id,
            source: projection.source,
            graph,
        })
    }

    /// The parentless transformation of the snapshot.
    pub async fn root_node(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Node> {
        let filter = document(json!({
            labels::PARENTS: { "$exists": false },
            labels::TYPE: NodeKind::Transformation.label(),
        }));
        let (_, projection) = self.query_scene(account, project, reference, &filter, None).await?;
        first_node(account, project, projection.documents, "root node")
    }

    /// A node by unique id, looked up in the stash first and then the scene.
    /// Mesh buffers stored as blobs are joined back onto the node.
    pub async fn object_by_unique(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
    ) -> Result<SceneObject> {
        let query = Query::new(id_filter(labels::UNIQUE_ID, &unique_id.0)).limit(1);
        let stash = Collection::Stash(self.stash.format()).name(project);

        let stashed = match self.backend.find(account, &stash, &query).await {
            Ok(rows) => rows.into_iter().next(),
            Err(err) => {
                debug!(error = %err, "stash lookup failed, trying scene");
                None
            }
        };
        let (source, mut doc) = match stashed {
            Some(doc) => (Source::Stash, doc),
            None => {
                let scene = Collection::Scene.name(project);
                match self.backend.find_one(account, &scene, &query).await? {
                    Some(doc) => (Source::Raw, doc),
                    None => {
                        let missing = unique_id.to_string();
                        return Err(StoreError::object_not_found(account, project, missing));
                    }
                }
            }
        };

        self.join_mesh_blobs(account, project, source, &mut doc).await?;
        Ok(SceneObject {
            source,
            node: Node::from_document(doc)?,
        })
    }

    /// A node by shared id within the resolved snapshot.
    pub async fn object_by_shared(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        shared_id: SharedId,
    ) -> Result<SceneObject> {
        let filter = id_filter(labels::SHARED_ID, &shared_id.0);
        let (_, projection) = self.query_scene(account, project, reference, &filter, None).await?;
        let source = projection.source;
        let mut doc = projection
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::object_not_found(account, project, shared_id.to_string()))?;
        self.join_mesh_blobs(account, project, source, &mut doc).await?;
        Ok(SceneObject {
            source,
            node: Node::from_document(doc)?,
        })
    }

    /// Transformation and reference children of `shared_id`.
    pub async fn children(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        shared_id: SharedId,
    ) -> Result<Vec<Node>> {
        let mut filter = id_filter(labels::PARENTS, &shared_id.0);
        filter.insert(
            labels::TYPE.into(),
            json!({ "$in": [NodeKind::Transformation.label(), NodeKind::Reference.label()] }),
        );
        let (_, projection) = self.query_scene(account, project, reference, &filter, None).await?;
        Ok(bulk_decode(projection.documents).nodes)
    }

    /// Children of the node with `unique_id`, in the revision it belongs to.
    pub async fn children_of_unique(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
    ) -> Result<Vec<Node>> {
        let (revision, node) = self.locate_unique(account, project, unique_id).await?;
        self.children(account, project, &BranchRef::Revision(revision), node.shared_id())
            .await
    }

    /// Unique id → shared id for every live node.
    pub async fn uid_map(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<BTreeMap<UniqueId, SharedId>> {
        let pairs = self.identity_pairs(account, project, reference).await?;
        Ok(pairs.into_iter().collect())
    }

    /// Shared id → unique id for every live node.
    pub async fn sid_map(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<BTreeMap<SharedId, UniqueId>> {
        let pairs = self.identity_pairs(account, project, reference).await?;
        Ok(pairs.into_iter().map(|(uid, sid)| (sid, uid)).collect())
    }

    async fn identity_pairs(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Vec<(UniqueId, SharedId)>> {
        let fields = document(json!({ labels::UNIQUE_ID: 1, labels::SHARED_ID: 1 }));
        let (_, projection) = self
            .query_scene(account, project, reference, &Document::new(), Some(&fields))
            .await?;
        Ok(projection.documents.iter().filter_map(identity_of).collect())
    }

    /// Metadata documents attached to `shared_id`, without structural fields.
    pub async fn metadata(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
        shared_id: SharedId,
    ) -> Result<Vec<Document>> {
        let mut filter = id_filter(labels::PARENTS, &shared_id.0);
        filter.insert(labels::TYPE.into(), json!(NodeKind::Metadata.label()));
        let structural = [
            labels::SHARED_ID,
            labels::PATHS,
            labels::TYPE,
            labels::API,
            labels::PARENTS,
        ];
        let fields: Document = structural
            .iter()
            .map(|field| (field.to_string(), json!(0)))
            .collect();
        let (_, projection) = self
            .query_scene(account, project, reference, &filter, Some(&fields))
            .await?;
        Ok(projection.documents)
    }

    /// Metadata of the node with `unique_id`, in the revision it belongs to.
    pub async fn metadata_of_unique(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
    ) -> Result<Vec<Document>> {
        let (revision, node) = self.locate_unique(account, project, unique_id).await?;
        self.metadata(account, project, &BranchRef::Revision(revision), node.shared_id())
            .await
    }

    /// Body of the snapshot's readme metadata node, `None` when there is none.
    pub async fn readme(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Option<Value>> {
        let filter = document(json!({
            labels::TYPE: NodeKind::Metadata.label(),
            labels::SUBTYPE: labels::README_SUBTYPE,
        }));
        let (_, projection) = self.query_scene(account, project, reference, &filter, None).await?;
        Ok(projection
            .documents
            .into_iter()
            .next()
            .and_then(|mut doc| doc.remove(labels::METADATA)))
    }

    /// Shared-id diff between two snapshots. A side that cannot be resolved
    /// is reported as a missing branch.
    pub async fn diff(
        &self,
        account: &str,
        project: &str,
        from: &BranchRef,
        to: &BranchRef,
    ) -> Result<SnapshotDiff> {
        let a = self.diff_side(account, project, from).await?;
        let b = self.diff_side(account, project, to).await?;

        let mut everything: Vec<UniqueId> = a.current.clone();
        everything.extend(b.current.iter().copied());
        everything.sort();
        everything.dedup();

        let filter = document(json!({
            labels::UNIQUE_ID: { "$in": codec::encode_ids(everything.iter().map(|u| &u.0)) }
        }));
        let fields = document(json!({ labels::UNIQUE_ID: 1, labels::SHARED_ID: 1 }));
        let query = Query::new(filter).fields(Some(fields));
        let docs = self
            .backend
            .find(account, &Collection::Scene.name(project), &query)
            .await?;
        // Records without readable ids stay out and end up in `unmapped`.
        let lookup: BTreeMap<UniqueId, SharedId> = docs.iter().filter_map(identity_of).collect();

        let diff = self.diff.compute(&a, &b, &lookup);
        debug!(
            account,
            project,
            added = diff.added.len(),
            deleted = diff.deleted.len(),
            modified = diff.modified.len(),
            "computed diff"
        );
        Ok(diff)
    }

    async fn diff_side(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Revision> {
        match self.history.resolve_snapshot(account, project, reference).await {
            Err(err) if err.is_not_found() => Err(StoreError::BranchNotFound {
                account: account.to_string(),
                project: project.to_string(),
                branch: reference.to_string(),
            }),
            other => other,
        }
    }

    /// Expand the snapshot's references, bounded by the configured timeout.
    pub async fn federation(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Vec<ReferenceExpansion>> {
        match self.federation_timeout {
            Some(limit) => {
                self.federation
                    .resolve_federation_within(account, project, reference, limit)
                    .await
            }
            None => self.federation.resolve_federation(account, project, reference).await,
        }
    }

    // ---- writes ----

    /// Store node documents in the scene collection. They become live once a
    /// revision lists them.
    pub async fn insert_nodes(
        &self,
        account: &str,
        project: &str,
        nodes: &[Node],
    ) -> Result<Vec<NodeRef>> {
        let docs = nodes.iter().map(Node::to_document).collect();
        self.backend
            .insert_many(account, &Collection::Scene.name(project), docs)
            .await?;
        Ok(nodes.iter().map(NodeRef::of).collect())
    }

    /// Store a buffer of a scene node as the blob `<unique_id>_<field>`.
    pub async fn put_blob(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
        field: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let name = format!("{unique_id}_{field}");
        self.backend
            .put_blob(account, &Collection::Scene.name(project), &name, bytes)
            .await?;
        Ok(())
    }

    /// Insert `nodes` and append a revision on `branch` adding them.
    ///
    /// Nodes already stored with an identical document are not inserted
    /// again, so a commit rejected by the history can be retried on the new
    /// head.
    pub async fn commit_nodes(
        &self,
        account: &str,
        project: &str,
        branch: &str,
        parent: Option<RevisionId>,
        nodes: &[Node],
        commit: Commit,
    ) -> Result<Revision> {
        let stored = self.stored_documents(account, project, nodes).await?;
        let fresh: Vec<Node> = nodes
            .iter()
            .filter(|node| stored.get(&node.unique_id()) != Some(&node.to_document()))
            .cloned()
            .collect();
        if fresh.len() < nodes.len() {
            debug!(account, project, reused = nodes.len() - fresh.len(), "nodes already stored");
        }
        self.insert_nodes(account, project, &fresh).await?;
        let commit = nodes.iter().map(NodeRef::of).fold(commit, Commit::add);
        let revision = self
            .history
            .append_revision(account, project, branch, parent, commit)
            .await?;
        info!(
            account,
            project,
            branch,
            revision = %revision.id,
            nodes = nodes.len(),
            "committed nodes"
        );
        Ok(revision)
    }

    // ---- history pass-throughs ----

    pub async fn resolve_snapshot(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<Revision> {
        self.history.resolve_snapshot(account, project, reference).await
    }

    pub async fn head_of(&self, account: &str, project: &str, branch: &str) -> Result<Revision> {
        self.history.head_of(account, project, branch).await
    }

    pub async fn append_revision(
        &self,
        account: &str,
        project: &str,
        branch: &str,
        parent: Option<RevisionId>,
        commit: Commit,
    ) -> Result<Revision> {
        self.history
            .append_revision(account, project, branch, parent, commit)
            .await
    }

    pub async fn list_revisions(
        &self,
        account: &str,
        project: &str,
        branch: Option<&str>,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Vec<RevisionSummary>> {
        self.history.list_revisions(account, project, branch, from, to).await
    }

    pub async fn list_branches(&self, account: &str, project: &str) -> Result<Vec<BranchId>> {
        self.history.list_branches(account, project).await
    }

    pub async fn revision_info(
        &self,
        account: &str,
        project: &str,
        reference: &BranchRef,
    ) -> Result<RevisionInfo> {
        self.history.revision_info(account, project, reference).await
    }

    // ---- helpers ----

    /// Scene documents already stored under the unique ids of `nodes`.
    async fn stored_documents(
        &self,
        account: &str,
        project: &str,
        nodes: &[Node],
    ) -> Result<BTreeMap<UniqueId, Document>> {
        if nodes.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids: Vec<UniqueId> = nodes.iter().map(Node::unique_id).collect();
        let filter = document(json!({
            labels::UNIQUE_ID: { "$in": codec::encode_ids(ids.iter().map(|u| &u.0)) }
        }));
        let docs = self
            .backend
            .find(account, &Collection::Scene.name(project), &Query::new(filter))
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| identity_of(&doc).map(|(uid, _)| (uid, doc)))
            .collect())
    }

    /// The revision a node belongs to, and the node itself. A stashed copy
    /// names its revision; otherwise the latest revision containing it is used.
    async fn locate_unique(
        &self,
        account: &str,
        project: &str,
        unique_id: UniqueId,
    ) -> Result<(RevisionId, Node)> {
        let found = self.object_by_unique(account, project, unique_id).await?;
        let revision = match (found.source, found.node.base().rev_id) {
            (Source::Stash, Some(rev)) => rev,
            _ => {
                self.history
                    .revision_containing(account, project, unique_id)
                    .await?
                    .id
            }
        };
        Ok((revision, found.node))
    }

    /// Fill in mesh buffers held as `<unique_id>_<field>` blobs next to `source`.
    async fn join_mesh_blobs(
        &self,
        account: &str,
        project: &str,
        source: Source,
        doc: &mut Document,
    ) -> Result<()> {
        if doc.get(labels::TYPE).and_then(Value::as_str) != Some(NodeKind::Mesh.label()) {
            return Ok(());
        }
        let Some(unique_id) = doc.get(labels::UNIQUE_ID).and_then(codec::id_text) else {
            return Ok(());
        };
        let collection = match source {
            Source::Stash => Collection::Stash(self.stash.format()),
            Source::Raw => Collection::Scene,
        }
        .name(project);

        for field in labels::MESH_BUFFER_FIELDS {
            if doc.contains_key(field) {
                continue;
            }
            let name = format!("{unique_id}_{field}");
            if let Some(bytes) = self.backend.get_blob(account, &collection, &name).await? {
                doc.insert(field.to_string(), codec::encode_bytes(&bytes));
            }
        }
        Ok(())
    }
}

fn first_node(account: &str, project: &str, docs: Vec<Document>, what: &str) -> Result<Node> {
    match docs.into_iter().next() {
        Some(doc) => Ok(Node::from_document(doc)?),
        None => Err(StoreError::object_not_found(account, project, what)),
    }
}

/// Identity pair of a scene record; unreadable records are logged and skipped.
fn identity_of(doc: &Document) -> Option<(UniqueId, SharedId)> {
    let field = |name: &'static str| -> Result<Identifier> {
        let value = doc.get(name).ok_or(NodeError::MissingField(name))?;
        Ok(codec::decode_id(value)?)
    };
    match (field(labels::UNIQUE_ID), field(labels::SHARED_ID)) {
        (Ok(uid), Ok(sid)) => Some((UniqueId(uid), SharedId(sid))),
        (Err(err), _) | (_, Err(err)) => {
            warn!(error = %err, "skipping scene record without readable ids");
            None
        }
    }
}
