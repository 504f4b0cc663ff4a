//! Scene node model: the shared base record, node kinds and the `Node` sum type

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::codec;
use crate::error::NodeError;
use crate::geometry::{BoundingBox, Matrix4, Real, Vector3};
use crate::ids::{Identifier, RevisionId, SharedId, UniqueId};
use crate::labels;
use crate::nodes::{Camera, Material, Mesh, Metadata, Reference, Texture, Transformation};

/// Raw field bag of a stored document.
pub type Document = serde_json::Map<String, Value>;

/// Discriminates the stored `type` label of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "transformation")]
    Transformation,
    #[serde(rename = "mesh")]
    Mesh,
    #[serde(rename = "material")]
    Material,
    #[serde(rename = "texture")]
    Texture,
    #[serde(rename = "camera")]
    Camera,
    #[serde(rename = "ref")]
    Reference,
    #[serde(rename = "meta")]
    Metadata,
    #[serde(rename = "revision")]
    Revision,
}

impl NodeKind {
    /// Kinds that can appear in a scene snapshot.
    pub const SCENE_KINDS: [NodeKind; 7] = [
        NodeKind::Transformation,
        NodeKind::Mesh,
        NodeKind::Material,
        NodeKind::Texture,
        NodeKind::Camera,
        NodeKind::Reference,
        NodeKind::Metadata,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Transformation => "transformation",
            NodeKind::Mesh => "mesh",
            NodeKind::Material => "material",
            NodeKind::Texture => "texture",
            NodeKind::Camera => "camera",
            NodeKind::Reference => "ref",
            NodeKind::Metadata => "meta",
            NodeKind::Revision => "revision",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "transformation" => Some(NodeKind::Transformation),
            "mesh" => Some(NodeKind::Mesh),
            "material" => Some(NodeKind::Material),
            "texture" => Some(NodeKind::Texture),
            "camera" => Some(NodeKind::Camera),
            "ref" => Some(NodeKind::Reference),
            "meta" => Some(NodeKind::Metadata),
            "revision" => Some(NodeKind::Revision),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fields common to every node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBase {
    pub unique_id: UniqueId,
    pub shared_id: SharedId,
    pub name: Option<String>,
    pub api: Option<i64>,
    pub parents: Vec<SharedId>,
    pub paths: Vec<Identifier>,
    /// Revision tag carried by stash rows.
    pub rev_id: Option<RevisionId>,
    /// Unrecognized fields, preserved verbatim.
    pub extra: Document,
}

impl NodeBase {
    /// A base with fresh identities and no parents.
    pub fn new() -> Self {
        NodeBase {
            unique_id: UniqueId::generate(),
            shared_id: SharedId::generate(),
            name: None,
            api: None,
            parents: Vec::new(),
            paths: Vec::new(),
            rev_id: None,
            extra: Document::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        NodeBase {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    pub fn with_parent(mut self, parent: SharedId) -> Self {
        self.parents.push(parent);
        self
    }

    /// Take the base fields out of `fields`, generating identities when absent.
    pub(crate) fn take(fields: &mut Fields) -> Result<Self, NodeError> {
        let unique_id = fields
            .id(labels::UNIQUE_ID)?
            .map(UniqueId)
            .unwrap_or_else(UniqueId::generate);
        let shared_id = fields
            .id(labels::SHARED_ID)?
            .map(SharedId)
            .unwrap_or_else(SharedId::generate);

        Ok(NodeBase {
            unique_id,
            shared_id,
            name: fields.string(labels::NAME)?,
            api: fields.i64(labels::API)?,
            parents: fields
                .ids(labels::PARENTS)?
                .unwrap_or_default()
                .into_iter()
                .map(SharedId)
                .collect(),
            paths: fields.ids(labels::PATHS)?.unwrap_or_default(),
            rev_id: fields.id(labels::REV_ID)?.map(RevisionId),
            extra: Document::new(),
        })
    }

    pub(crate) fn write(&self, kind: NodeKind, doc: &mut Document) {
        doc.insert(labels::UNIQUE_ID.into(), codec::encode_id(&self.unique_id.0));
        doc.insert(labels::SHARED_ID.into(), codec::encode_id(&self.shared_id.0));
        doc.insert(labels::TYPE.into(), Value::String(kind.label().into()));
        if let Some(name) = &self.name {
            doc.insert(labels::NAME.into(), Value::String(name.clone()));
        }
        if let Some(api) = self.api {
            doc.insert(labels::API.into(), api.into());
        }
        if !self.parents.is_empty() {
            doc.insert(
                labels::PARENTS.into(),
                codec::encode_ids(self.parents.iter().map(|p| &p.0)),
            );
        }
        if !self.paths.is_empty() {
            doc.insert(labels::PATHS.into(), codec::encode_ids(&self.paths));
        }
        if let Some(rev) = &self.rev_id {
            doc.insert(labels::REV_ID.into(), codec::encode_id(&rev.0));
        }
    }
}

impl Default for NodeBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity and parent access shared by every node subtype.
pub trait SceneNode {
    fn base(&self) -> &NodeBase;
    fn base_mut(&mut self) -> &mut NodeBase;
    fn kind(&self) -> NodeKind;

    fn unique_id(&self) -> UniqueId {
        self.base().unique_id
    }

    fn shared_id(&self) -> SharedId {
        self.base().shared_id
    }

    fn parents(&self) -> &[SharedId] {
        &self.base().parents
    }

    /// Display name; nodes without one report an empty string.
    fn name(&self) -> &str {
        self.base().name.as_deref().unwrap_or("")
    }

    fn is_root_candidate(&self) -> bool {
        self.base().parents.is_empty()
    }
}

/// A decoded scene node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Transformation(Transformation),
    Mesh(Mesh),
    Material(Material),
    Texture(Texture),
    Camera(Camera),
    Reference(Reference),
    Metadata(Metadata),
}

macro_rules! each_node {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            Node::Transformation($inner) => $body,
            Node::Mesh($inner) => $body,
            Node::Material($inner) => $body,
            Node::Texture($inner) => $body,
            Node::Camera($inner) => $body,
            Node::Reference($inner) => $body,
            Node::Metadata($inner) => $body,
        }
    };
}

impl SceneNode for Node {
    fn base(&self) -> &NodeBase {
        each_node!(self, n => n.base())
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        each_node!(self, n => n.base_mut())
    }

    fn kind(&self) -> NodeKind {
        each_node!(self, n => n.kind())
    }
}

impl Node {
    /// Decode a raw document into the node subtype named by its `type` label.
    pub fn from_document(doc: Document) -> Result<Node, NodeError> {
        let mut fields = Fields::new(doc);
        let label = fields
            .take(labels::TYPE)
            .ok_or(NodeError::MissingType)?;
        let label = label
            .as_str()
            .ok_or_else(|| NodeError::field(labels::TYPE, "expected a string"))?;
        let kind = NodeKind::from_label(label)
            .filter(|k| *k != NodeKind::Revision)
            .ok_or_else(|| NodeError::UnsupportedType(label.to_string()))?;

        let base = NodeBase::take(&mut fields)?;
        let mut node = match kind {
            NodeKind::Transformation => {
                Node::Transformation(Transformation::take(base, &mut fields)?)
            }
            NodeKind::Mesh => Node::Mesh(Mesh::take(base, &mut fields)?),
            NodeKind::Material => Node::Material(Material::take(base, &mut fields)?),
            NodeKind::Texture => Node::Texture(Texture::take(base, &mut fields)?),
            NodeKind::Camera => Node::Camera(Camera::take(base, &mut fields)?),
            NodeKind::Reference => Node::Reference(Reference::take(base, &mut fields)?),
            NodeKind::Metadata => Node::Metadata(Metadata::take(base, &mut fields)?),
            NodeKind::Revision => return Err(NodeError::UnsupportedType(label.to_string())),
        };
        node.base_mut().extra = fields.into_rest();
        Ok(node)
    }

    /// Decode from a JSON value that must be an object.
    pub fn from_value(value: Value) -> Result<Node, NodeError> {
        match value {
            Value::Object(doc) => Node::from_document(doc),
            _ => Err(NodeError::field("<record>", "expected an object")),
        }
    }

    /// Storage form of the node: binary identifiers and typed payloads written
    /// back as primitive arrays, followed by the preserved extra fields.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        self.base().write(self.kind(), &mut doc);
        each_node!(self, n => n.write_payload(&mut doc));
        for (key, value) in &self.base().extra {
            doc.entry(key.clone()).or_insert_with(|| value.clone());
        }
        doc
    }

    pub fn as_transformation(&self) -> Option<&Transformation> {
        match self {
            Node::Transformation(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_mesh(&self) -> Option<&Mesh> {
        match self {
            Node::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Node::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&Metadata> {
        match self {
            Node::Metadata(m) => Some(m),
            _ => None,
        }
    }
}

/// A record that `bulk_decode` could not turn into a node.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    /// Position of the record in the input sequence.
    pub index: usize,
    /// Textual unique id of the record, when it had a readable one.
    pub unique_id: Option<String>,
    pub error: NodeError,
}

/// Result of decoding a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct BulkDecoded {
    pub nodes: Vec<Node>,
    pub skipped: Vec<SkippedRecord>,
}

/// Decode every document, skipping and logging the malformed ones.
pub fn bulk_decode<I>(docs: I) -> BulkDecoded
where
    I: IntoIterator<Item = Document>,
{
    let mut out = BulkDecoded::default();
    for (index, doc) in docs.into_iter().enumerate() {
        let unique_id = doc.get(labels::UNIQUE_ID).and_then(codec::id_text);
        match Node::from_document(doc) {
            Ok(node) => out.nodes.push(node),
            Err(error) => {
                warn!(index, unique_id = ?unique_id, %error, "skipping malformed record");
                out.skipped.push(SkippedRecord {
                    index,
                    unique_id,
                    error,
                });
            }
        }
    }
    out
}

/// Cursor over a document that removes known fields as they are read.
///
/// Whatever remains after decoding is the node's `extra` map. `null` values
/// are treated as absent.
pub(crate) struct Fields {
    doc: Document,
}

impl Fields {
    pub(crate) fn new(doc: Document) -> Self {
        Fields { doc }
    }

    pub(crate) fn take(&mut self, key: &str) -> Option<Value> {
        match self.doc.remove(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    pub(crate) fn into_rest(self) -> Document {
        self.doc
    }

    pub(crate) fn id(&mut self, key: &str) -> Result<Option<Identifier>, NodeError> {
        self.take(key)
            .map(|v| codec::decode_id(&v).map_err(|e| NodeError::identifier(key, e)))
            .transpose()
    }

    pub(crate) fn ids(&mut self, key: &str) -> Result<Option<Vec<Identifier>>, NodeError> {
        self.take(key)
            .map(|v| codec::decode_ids(&v).map_err(|e| NodeError::identifier(key, e)))
            .transpose()
    }

    pub(crate) fn string(&mut self, key: &str) -> Result<Option<String>, NodeError> {
        self.take(key)
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(NodeError::field(key, format!("expected a string, found {other}"))),
            })
            .transpose()
    }

    pub(crate) fn real(&mut self, key: &str) -> Result<Option<Real>, NodeError> {
        self.take(key)
            .map(|v| Real::from_value(&v).map_err(|e| NodeError::field(key, e)))
            .transpose()
    }

    pub(crate) fn i64(&mut self, key: &str) -> Result<Option<i64>, NodeError> {
        self.take(key)
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| NodeError::field(key, format!("expected an integer, found {v}")))
            })
            .transpose()
    }

    pub(crate) fn u64(&mut self, key: &str) -> Result<Option<u64>, NodeError> {
        self.take(key)
            .map(|v| {
                v.as_u64().ok_or_else(|| {
                    NodeError::field(key, format!("expected a non-negative integer, found {v}"))
                })
            })
            .transpose()
    }

    pub(crate) fn u32(&mut self, key: &str) -> Result<Option<u32>, NodeError> {
        match self.u64(key)? {
            Some(n) => u32::try_from(n)
                .map(Some)
                .map_err(|_| NodeError::field(key, format!("{n} is out of range"))),
            None => Ok(None),
        }
    }

    pub(crate) fn bool(&mut self, key: &str) -> Result<Option<bool>, NodeError> {
        self.take(key)
            .map(|v| {
                v.as_bool()
                    .ok_or_else(|| NodeError::field(key, format!("expected a boolean, found {v}")))
            })
            .transpose()
    }

    pub(crate) fn vector(&mut self, key: &str) -> Result<Option<Vector3>, NodeError> {
        self.take(key)
            .map(|v| Vector3::from_value(&v).map_err(|e| NodeError::field(key, e)))
            .transpose()
    }

    pub(crate) fn matrix(&mut self, key: &str) -> Result<Option<Matrix4>, NodeError> {
        self.take(key)
            .map(|v| Matrix4::from_value(&v).map_err(|e| NodeError::field(key, e)))
            .transpose()
    }

    pub(crate) fn bounding_box(&mut self, key: &str) -> Result<Option<BoundingBox>, NodeError> {
        self.take(key)
            .map(|v| BoundingBox::from_value(&v).map_err(|e| NodeError::field(key, e)))
            .transpose()
    }

    pub(crate) fn bytes(&mut self, key: &str) -> Result<Option<Vec<u8>>, NodeError> {
        self.take(key)
            .map(|v| codec::decode_bytes(&v).map_err(|e| NodeError::field(key, e.to_string())))
            .transpose()
    }
}

/// Insert `value` under `key` when present.
pub(crate) fn put<T: Into<Value>>(doc: &mut Document, key: &str, value: Option<T>) {
    if let Some(value) = value {
        doc.insert(key.to_string(), value.into());
    }
}
