//! Unit tests for scenery-core

use serde_json::json;

use crate::codec;
use crate::test_utils::*;
use crate::*;

fn round_trips(doc: Document) {
    let node = Node::from_document(doc.clone()).unwrap();
    assert_eq!(node.to_document(), doc);
}

#[test]
fn test_round_trip_every_subtype() {
    let mut t = raw_document("transformation");
    t.insert("name".into(), json!("root"));
    t.insert("api".into(), json!(1));
    t.insert(
        "matrix".into(),
        json!([[1, 0, 0, 2.5], [0.0, 1.0, 0.0, 0.0], [0, 0, 1, 0], [0.0, 0.0, 0.0, 1.0]]),
    );
    round_trips(t);

    let mut m = raw_document("mesh");
    m.insert("parents".into(), json!([id_value(&generate_id())]));
    m.insert(
        "vertices".into(),
        codec::encode_bytes(
            VertexBuffer::from_vectors(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]).as_bytes(),
        ),
    );
    m.insert("vertices_count".into(), json!(2));
    m.insert(
        "faces".into(),
        codec::encode_bytes(FaceBuffer::from_faces(&[vec![0, 1, 1]]).as_bytes()),
    );
    m.insert("faces_count".into(), json!(1));
    m.insert(
        "uv_channels".into(),
        codec::encode_bytes(UvBuffer::from_channels(&[vec![[0.0, 1.0], [1.0, 0.0]]]).as_bytes()),
    );
    m.insert("uv_channels_count".into(), json!(1));
    m.insert("bounding_box".into(), json!([[0, 0, 0], [1.0, 1.0, 1.0]]));
    m.insert("m_map".into(), json!([{"v_from": 0, "v_to": 2}]));
    round_trips(m);

    let mut mat = raw_document("material");
    mat.insert("diffuse".into(), json!([0.5, 0.25, 1.0]));
    mat.insert("opacity".into(), json!(0.75));
    round_trips(mat.clone());

    mat.insert("diffuse".into(), json!([1, 0, 0]));
    mat.insert("opacity".into(), json!(1));
    mat.insert("shininess".into(), json!(-2));
    mat.insert("two_sided".into(), json!(true));
    round_trips(mat);

    let mut tex = raw_document("texture");
    tex.insert("extension".into(), json!("png"));
    tex.insert("width".into(), json!(2));
    tex.insert("height".into(), json!(2));
    tex.insert("data".into(), codec::encode_bytes(&[1, 2, 3, 4]));
    round_trips(tex);

    let mut cam = raw_document("camera");
    cam.insert("position".into(), json!([0.0, 1.5, 10.0]));
    cam.insert("look_at".into(), json!([0.0, 0.0, -1.0]));
    cam.insert("fov".into(), json!(0.8));
    cam.insert("far".into(), json!(1000));
    round_trips(cam);

    let mut r = raw_document("ref");
    r.insert("owner".into(), json!("partner"));
    r.insert("project".into(), json!("site"));
    r.insert("_rid".into(), id_value(&generate_id()));
    r.insert("unique".into(), json!(true));
    round_trips(r);

    let mut meta = raw_document("meta");
    meta.insert("subtype".into(), json!("readme"));
    meta.insert("metadata".into(), json!({"text": "hello", "tags": ["a", "b"]}));
    round_trips(meta);
}

#[test]
fn test_integer_valued_numbers_stay_integers() {
    let mut doc = raw_document("material");
    doc.insert("diffuse".into(), json!([1, 0, 0]));
    doc.insert("opacity".into(), json!(1));

    let node = Node::from_document(doc.clone()).unwrap();
    let Node::Material(material) = &node else {
        panic!("expected a material");
    };
    assert_eq!(material.opacity.as_ref().map(|o| o.get()), Some(1.0));
    assert_eq!(material.diffuse.as_ref().map(|d| d.x.get()), Some(1.0));

    let stored = node.to_document();
    assert_eq!(stored["opacity"], json!(1));
    assert_eq!(stored["diffuse"], json!([1, 0, 0]));
    assert_eq!(stored, doc);
}

#[test]
fn test_textual_identifiers_are_normalized() {
    let sid = "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";
    let parent = "1a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";
    let mut doc = Document::new();
    doc.insert("type".into(), json!("transformation"));
    doc.insert("shared_id".into(), json!(sid));
    doc.insert("parents".into(), json!([parent]));

    let node = Node::from_document(doc).unwrap();
    assert_eq!(node.shared_id().to_string(), sid);
    assert_eq!(node.parents()[0].to_string(), parent);

    let stored = node.to_document();
    assert!(codec::is_binary(&stored["shared_id"]));
    assert!(codec::is_binary(&stored["_id"]));
    assert!(codec::is_binary(&stored["parents"][0]));
}

#[test]
fn test_missing_identities_are_generated() {
    let mut doc = Document::new();
    doc.insert("type".into(), json!("camera"));
    let a = Node::from_document(doc.clone()).unwrap();
    let b = Node::from_document(doc).unwrap();
    assert_ne!(a.unique_id(), b.unique_id());
    assert_ne!(a.shared_id(), b.shared_id());
    assert_eq!(a.kind(), NodeKind::Camera);
    assert_eq!(a.name(), "");
}

#[test]
fn test_decode_failures() {
    assert_eq!(Node::from_document(Document::new()), Err(NodeError::MissingType));

    let unknown = raw_document("light");
    assert_eq!(
        Node::from_document(unknown),
        Err(NodeError::UnsupportedType("light".into()))
    );

    let revision = raw_document("revision");
    assert!(matches!(
        Node::from_document(revision),
        Err(NodeError::UnsupportedType(_))
    ));

    let mut bad_mesh = raw_document("mesh");
    bad_mesh.insert("vertices".into(), codec::encode_bytes(&[0u8; 10]));
    assert!(matches!(
        Node::from_document(bad_mesh),
        Err(NodeError::Field { ref field, .. }) if field == "vertices"
    ));

    let mut wrong_count = raw_document("mesh");
    wrong_count.insert(
        "vertices".into(),
        codec::encode_bytes(VertexBuffer::from_vectors(&[[0.0, 0.0, 0.0]]).as_bytes()),
    );
    wrong_count.insert("vertices_count".into(), json!(4));
    assert!(Node::from_document(wrong_count).is_err());

    let mut no_project = raw_document("ref");
    no_project.insert("owner".into(), json!("acme"));
    assert_eq!(
        Node::from_document(no_project),
        Err(NodeError::MissingField("project"))
    );

    let mut bad_parent = raw_document("transformation");
    bad_parent.insert("parents".into(), json!(["not-an-id"]));
    assert!(matches!(
        Node::from_document(bad_parent),
        Err(NodeError::Identifier { .. })
    ));
}

#[test]
fn test_mesh_bounding_box_defaults_to_unit_cube() {
    let node = Node::from_document(raw_document("mesh")).unwrap();
    let mesh = node.as_mesh().unwrap();
    assert_eq!(mesh.bounding_box(), BoundingBox::unit());
    assert!(mesh.buffers_detached());
    assert!(!node.to_document().contains_key("bounding_box"));
}

#[test]
fn test_bulk_decode_skips_malformed_records() {
    let good = sample_scene().iter().map(Node::to_document).collect::<Vec<_>>();
    let mut docs = good.clone();
    docs.insert(1, raw_document("light"));
    docs.push(Document::new());

    let decoded = bulk_decode(docs);
    assert_eq!(decoded.nodes.len(), good.len());
    assert_eq!(decoded.skipped.len(), 2);
    assert_eq!(decoded.skipped[0].index, 1);
    assert!(decoded.skipped[0].unique_id.is_some());
    assert_eq!(decoded.skipped[1].error, NodeError::MissingType);
}

#[test]
fn test_assembly_links_children_by_shared_id() {
    let nodes = sample_scene();
    let root = nodes[0].shared_id();
    let building = nodes[1].shared_id();
    let wall = nodes[2].shared_id();

    let graph = SceneGraph::assemble(nodes).unwrap();
    assert_eq!(graph.root_id(), root);
    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edge_count(), 4);

    let children: Vec<&str> = graph.children(&root).iter().map(|n| n.name()).collect();
    assert_eq!(children, vec!["building", "site", "readme"]);
    assert_eq!(graph.children(&building)[0].shared_id(), wall);
    assert_eq!(graph.parents_of(&wall)[0].shared_id(), building);
    assert_eq!(graph.descendants(&root).len(), 4);
    assert!(graph.warnings().is_empty());
    assert!(graph.detached_roots().is_empty());
}

#[test]
fn test_node_with_several_parents() {
    let root = transformation("root", None);
    let left = transformation("left", Some(root.shared_id()));
    let right = transformation("right", Some(root.shared_id()));
    let mut shared = Mesh::new(NodeBase::named("shared").with_parent(left.shared_id()));
    shared.base.parents.push(right.shared_id());
    let shared_sid = shared.base.shared_id;
    let (left_sid, right_sid, root_sid) = (left.shared_id(), right.shared_id(), root.shared_id());

    let graph = SceneGraph::assemble(vec![root, left, right, Node::Mesh(shared)]).unwrap();
    let parents: Vec<SharedId> = graph
        .parents_of(&shared_sid)
        .iter()
        .map(|n| n.shared_id())
        .collect();
    assert_eq!(parents.len(), 2);
    assert!(parents.contains(&left_sid) && parents.contains(&right_sid));
    assert_eq!(graph.descendants(&root_sid).len(), 3);
}

#[test]
fn test_counts_and_buckets() {
    let graph = SceneGraph::assemble(sample_scene()).unwrap();
    insta::assert_json_snapshot!(graph.counts(), @r#"
    {
      "transformations": 2,
      "meshes": 1,
      "materials": 0,
      "textures": 0,
      "cameras": 0,
      "references": 1,
      "metadata": 1
    }
    "#);
    assert_eq!(graph.counts().total(), 5);
    assert_eq!(graph.nodes_of_kind(NodeKind::Transformation).count(), 2);
    assert_eq!(graph.nodes_of_kind(NodeKind::Camera).count(), 0);
    let mesh = graph.nodes_of_kind(NodeKind::Mesh).next().unwrap();
    assert_eq!(graph.node_by_unique(&mesh.unique_id()).unwrap().name(), "wall");
}

#[test]
fn test_root_must_be_unique() {
    let err = SceneGraph::assemble(vec![transformation("a", None), transformation("b", None)])
        .unwrap_err();
    assert!(matches!(err, GraphError::MultipleRoots(ref ids) if ids.len() == 2));

    let orphan_mesh = mesh("floating", SharedId::generate());
    assert_eq!(SceneGraph::assemble(vec![orphan_mesh]).unwrap_err(), GraphError::NoRoot);
    assert_eq!(SceneGraph::assemble(Vec::new()).unwrap_err(), GraphError::NoRoot);
}

#[test]
fn test_duplicate_shared_id_is_malformed() {
    let root = transformation("root", None);
    let mut twin = transformation("twin", Some(root.shared_id()));
    twin.base_mut().shared_id = root.shared_id();
    let sid = root.shared_id();
    assert_eq!(
        SceneGraph::assemble(vec![root, twin]).unwrap_err(),
        GraphError::DuplicateSharedId(sid)
    );
}

#[test]
fn test_dangling_parent_becomes_detached_root() {
    let root = transformation("root", None);
    let missing = SharedId::generate();
    let lost = transformation("lost", Some(missing));
    let lost_sid = lost.shared_id();

    let graph = SceneGraph::assemble(vec![root, lost]).unwrap();
    assert_eq!(graph.detached_roots(), &[lost_sid]);
    assert_eq!(
        graph.warnings(),
        &[AssemblyWarning::DanglingParent {
            node: lost_sid,
            parent: missing
        }]
    );
    assert!(graph.node_by_shared(&lost_sid).is_some());
}

#[test]
fn test_from_documents_reports_skipped_records() {
    let mut docs: Vec<Document> = sample_scene().iter().map(Node::to_document).collect();
    docs.push(raw_document("light"));
    let graph = SceneGraph::from_documents(docs).unwrap();
    assert_eq!(graph.node_count(), 5);
    assert!(matches!(
        graph.warnings(),
        [AssemblyWarning::Skipped { index: 5, .. }]
    ));
}

#[test]
fn test_diff_added_and_deleted() {
    let nodes = sample_scene();
    let lookup: std::collections::HashMap<UniqueId, SharedId> =
        nodes.iter().map(|n| (n.unique_id(), n.shared_id())).collect();

    let a = Revision::initial(
        BranchId::MASTER,
        nodes[..4].iter().map(|n| n.unique_id()).collect(),
        Vec::new(),
    );
    let mut b = a.clone();
    b.current.retain(|u| *u != nodes[3].unique_id());
    b.current.push(nodes[4].unique_id());

    let engine = DiffEngine::new();
    let diff = engine.compute(&a, &b, &lookup);
    assert_eq!(diff.added, vec![nodes[4].shared_id()]);
    assert_eq!(diff.deleted, vec![nodes[3].shared_id()]);
    assert!(diff.modified.is_empty());

    let same = engine.compute(&a, &a, &lookup);
    assert!(same.is_empty());
    assert_eq!(same, SnapshotDiff::default());
}
