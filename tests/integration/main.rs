//! Integration tests for Scenery
//!
//! These tests drive the store crates together through their public API:
//! commits, snapshot reads, diff, stash generation and dump persistence.

use std::sync::Arc;

use scenery_core::{
    BranchRef, Commit, FaceBuffer, Mesh, Node, NodeBase, SceneNode, Transformation, VertexBuffer,
    labels,
};
use scenery_store::{MemoryBackend, SceneStore, Source, StashBuilder, StashFormat, StoreError, dump};
use tokio_test::{assert_err, assert_ok};

fn root_node() -> Node {
    Node::Transformation(Transformation::new(NodeBase::named("r0")))
}

fn triangle(parent: &Node) -> Node {
    let mut mesh = Mesh::new(NodeBase::named("m1").with_parent(parent.shared_id()));
    let corners = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    mesh.vertices = Some(VertexBuffer::from_vectors(&corners));
    mesh.faces = Some(FaceBuffer::from_faces(&[vec![0, 1, 2]]));
    Node::Mesh(mesh)
}

/// Root committed as R1, mesh under it as R2.
async fn scenario(store: &SceneStore) -> (Node, Node, BranchRef, BranchRef) {
    let r0 = root_node();
    let m1 = triangle(&r0);
    let r1 = assert_ok!(
        store
            .commit_nodes("acme", "house", "master", None, std::slice::from_ref(&r0), Commit::new())
            .await
    );
    let r2 = assert_ok!(
        store
            .commit_nodes("acme", "house", "master", Some(r1.id), &[m1.clone()], Commit::new())
            .await
    );
    (r0, m1, BranchRef::Revision(r1.id), BranchRef::Revision(r2.id))
}

#[tokio::test]
async fn test_two_revision_scenario() {
    let store = SceneStore::new(Arc::new(MemoryBackend::new()));
    let (r0, m1, r1, r2) = scenario(&store).await;

    let head = assert_ok!(store.resolve_snapshot("acme", "house", &BranchRef::master()).await);
    assert_eq!(BranchRef::Revision(head.id), r2);

    let scene = assert_ok!(store.scene("acme", "house", &r2, false).await);
    assert_eq!(scene.graph.node_count(), 2);
    assert_eq!(scene.graph.root_id(), r0.shared_id());
    let children = scene.graph.children(&r0.shared_id());
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].unique_id(), m1.unique_id());

    let diff = assert_ok!(store.diff("acme", "house", &r1, &r2).await);
    assert_eq!(diff.added, vec![m1.shared_id()]);
    assert!(diff.deleted.is_empty());
    assert!(diff.modified.is_empty());

    assert_err!(store.head_of("acme", "house", "feature").await);
    let err = store.head_of("acme", "elsewhere", "master").await.unwrap_err();
    assert!(matches!(err, StoreError::ProjectHistoryNotFound { .. }));
}

#[tokio::test]
async fn test_stash_and_dump_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let store = SceneStore::new(backend.clone());
    let (_, m1, _, r2) = scenario(&store).await;

    let head = assert_ok!(store.resolve_snapshot("acme", "house", &r2).await);
    let written = assert_ok!(
        StashBuilder::new(backend.clone(), StashFormat::Repo)
            .generate("acme", "house", &head)
            .await
    );
    assert_eq!(written, 2);
    assert_ok!(dump::save(&backend, dir.path()).await);

    let reloaded = SceneStore::new(Arc::new(assert_ok!(dump::load(dir.path()).await)));
    let scene = assert_ok!(reloaded.scene("acme", "house", &BranchRef::master(), true).await);
    assert_eq!(scene.source, Source::Stash);
    let mesh = scene.graph.node_by_unique(&m1.unique_id()).and_then(Node::as_mesh).unwrap();
    assert_eq!(mesh.vertices.as_ref().map(|v| v.len()), Some(3));

    let revisions = assert_ok!(reloaded.list_revisions("acme", "house", None, None, None).await);
    assert_eq!(revisions.len(), 2);
    assert_eq!(BranchRef::Revision(revisions[0].id), r2);
}

#[tokio::test]
async fn test_mesh_blobs_are_joined_on_read() {
    let store = SceneStore::new(Arc::new(MemoryBackend::new()));
    let r0 = root_node();
    let mut bare = Mesh::new(NodeBase::named("bare").with_parent(r0.shared_id()));
    bare.vertices_count = Some(3);
    let uid = bare.base.unique_id;
    let vertices = VertexBuffer::from_vectors(&[[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]);

    assert_ok!(
        store
            .commit_nodes("acme", "yard", "master", None, &[r0, Node::Mesh(bare)], Commit::new())
            .await
    );
    assert_ok!(
        store
            .put_blob("acme", "yard", uid, labels::VERTICES, vertices.as_bytes().to_vec())
            .await
    );

    let object = assert_ok!(store.object_by_unique("acme", "yard", uid).await);
    assert_eq!(object.node.as_mesh().and_then(|m| m.vertices.clone()), Some(vertices));
}
