//! Test utilities for scenery-store: node builders and fixture projects

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scenery_core::{
    Commit, Document, FaceBuffer, Identifier, Mesh, Metadata, Node, NodeBase, Reference, Revision,
    SceneNode, SharedId, Transformation, VertexBuffer, labels,
};
use serde_json::json;

use crate::backend::{Backend, Query};
use crate::error::BackendError;
use crate::memory::MemoryBackend;
use crate::scene::SceneStore;

pub const ACCOUNT: &str = "acme";

/// A fresh in-memory backend and a store over it.
pub fn memory_store() -> (Arc<MemoryBackend>, SceneStore) {
    let backend = Arc::new(MemoryBackend::new());
    let store = SceneStore::new(backend.clone());
    (backend, store)
}

pub fn transformation(name: &str, parent: Option<SharedId>) -> Node {
    let mut base = NodeBase::named(name);
    base.parents.extend(parent);
    Node::Transformation(Transformation::new(base))
}

pub fn mesh(name: &str, parent: SharedId) -> Node {
    let mut mesh = Mesh::new(NodeBase::named(name).with_parent(parent));
    mesh.vertices = Some(VertexBuffer::from_vectors(&[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
    ]));
    mesh.faces = Some(FaceBuffer::from_faces(&[vec![0, 1, 2]]));
    mesh.vertices_count = Some(3);
    mesh.faces_count = Some(1);
    Node::Mesh(mesh)
}

/// Reference to another project's master head, or to `target` when given
/// (`(id, true)` a revision, `(id, false)` a branch id).
pub fn reference(
    name: &str,
    parent: SharedId,
    owner: Option<&str>,
    project: &str,
    target: Option<(Identifier, bool)>,
) -> Node {
    let mut reference = Reference::new(NodeBase::named(name).with_parent(parent), project);
    reference.owner = owner.map(str::to_string);
    if let Some((id, unique)) = target {
        reference.revision = Some(id);
        reference.unique = Some(unique);
    }
    Node::Reference(reference)
}

pub fn readme(parent: SharedId, text: &str) -> Node {
    let mut meta = Metadata::new(NodeBase::named("readme").with_parent(parent));
    meta.subtype = Some(labels::README_SUBTYPE.into());
    meta.metadata = Some(json!(text));
    Node::Metadata(meta)
}

pub fn properties(parent: SharedId, floor: i64) -> Node {
    let mut meta = Metadata::new(NodeBase::named("properties").with_parent(parent));
    meta.metadata = Some(json!({ "floor": floor }));
    Node::Metadata(meta)
}

/// Root `r0` committed as R1, then mesh `m1` under it as R2.
pub struct TwoRevisions {
    pub r0: Node,
    pub m1: Node,
    pub r1: Revision,
    pub r2: Revision,
}

pub async fn two_revision_project(store: &SceneStore, project: &str) -> TwoRevisions {
    let r0 = transformation("r0", None);
    let r1 = store
        .commit_nodes(
            ACCOUNT,
            project,
            "master",
            None,
            &[r0.clone()],
            Commit::new().message("root"),
        )
        .await
        .unwrap();

    let m1 = mesh("m1", r0.shared_id());
    let r2 = store
        .commit_nodes(
            ACCOUNT,
            project,
            "master",
            Some(r1.id),
            std::slice::from_ref(&m1),
            Commit::new().author("ada").message("add mesh"),
        )
        .await
        .unwrap();

    TwoRevisions { r0, m1, r1, r2 }
}

/// Commit a project whose root holds `children` (parented to the root by the caller).
pub async fn project_with(
    store: &SceneStore,
    account: &str,
    project: &str,
    root: Node,
    children: Vec<Node>,
) -> Revision {
    let mut nodes = vec![root];
    nodes.extend(children);
    store
        .commit_nodes(account, project, "master", None, &nodes, Commit::new())
        .await
        .unwrap()
}

/// Backend that delays every read, for timeout tests.
pub struct SlowBackend {
    pub inner: Arc<MemoryBackend>,
    pub delay: Duration,
}

#[async_trait]
impl Backend for SlowBackend {
    async fn find(
        &self,
        account: &str,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(account, collection, query).await
    }

    async fn insert_many(
        &self,
        account: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<(), BackendError> {
        self.inner.insert_many(account, collection, docs).await
    }

    async fn get_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.inner.get_blob(account, collection, name).await
    }

    async fn put_blob(
        &self,
        account: &str,
        collection: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.inner.put_blob(account, collection, name, bytes).await
    }
}
