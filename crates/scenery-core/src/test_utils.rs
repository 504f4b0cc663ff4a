//! Test utilities for scenery-core

use serde_json::{Value, json};

use crate::codec;
use crate::ids::{Identifier, SharedId, generate_id};
use crate::model::{Document, Node, NodeBase};
use crate::nodes::{FaceBuffer, Mesh, Metadata, Reference, Transformation, VertexBuffer};

pub fn id_value(id: &Identifier) -> Value {
    codec::encode_id(id)
}

/// Raw document with fresh binary identities and the given type label.
pub fn raw_document(label: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("_id".into(), id_value(&generate_id()));
    doc.insert("shared_id".into(), id_value(&generate_id()));
    doc.insert("type".into(), json!(label));
    doc
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

pub fn reference(name: &str, parent: SharedId, project: &str) -> Node {
    Node::Reference(Reference::new(NodeBase::named(name).with_parent(parent), project))
}

pub fn readme(parent: SharedId, text: &str) -> Node {
    let mut meta = Metadata::new(NodeBase::named("readme").with_parent(parent));
    meta.subtype = Some("readme".into());
    meta.metadata = Some(json!({ "text": text }));
    Node::Metadata(meta)
}

/// root → [building → [wall mesh], site reference, readme]
pub fn sample_scene() -> Vec<Node> {
    use crate::model::SceneNode;

    let root = transformation("root", None);
    let building = transformation("building", Some(root.shared_id()));
    let wall = mesh("wall", building.shared_id());
    let site = reference("site", root.shared_id(), "site-model");
    let notes = readme(root.shared_id(), "hello");
    vec![root, building, wall, site, notes]
}
