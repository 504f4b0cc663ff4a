//! Typed payloads of the seven scene node subtypes

use serde_json::Value;

use crate::codec;
use crate::error::NodeError;
use crate::geometry::{BoundingBox, Matrix4, Real, Vector3};
use crate::ids::{Identifier, RevisionId};
use crate::labels;
use crate::model::{Document, Fields, NodeBase, NodeKind, SceneNode, put};
use crate::revision::BranchRef;

macro_rules! scene_node {
    ($ty:ident, $kind:expr) => {
        impl SceneNode for $ty {
            fn base(&self) -> &NodeBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut NodeBase {
                &mut self.base
            }

            fn kind(&self) -> NodeKind {
                $kind
            }
        }
    };
}

/// Positions a subtree in its parent's space.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub base: NodeBase,
    pub matrix: Option<Matrix4>,
}

scene_node!(Transformation, NodeKind::Transformation);

impl Transformation {
    pub fn new(base: NodeBase) -> Self {
        Transformation { base, matrix: None }
    }

    /// The stored matrix, or identity.
    pub fn matrix(&self) -> Matrix4 {
        self.matrix.clone().unwrap_or_default()
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Transformation {
            base,
            matrix: fields.matrix(labels::MATRIX)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::MATRIX, self.matrix.as_ref().map(Matrix4::to_value));
    }
}

/// Little-endian `f32` triples (vertex positions or normals).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBuffer(Vec<u8>);

impl VertexBuffer {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.len() % 12 != 0 {
            return Err(format!(
                "vertex buffer of {} bytes is not a multiple of 12",
                bytes.len()
            ));
        }
        Ok(VertexBuffer(bytes))
    }

    pub fn from_vectors(vectors: &[[f32; 3]]) -> Self {
        VertexBuffer(vectors.iter().flatten().flat_map(|v| v.to_le_bytes()).collect())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.0.len() / 12
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn vectors(&self) -> Vec<[f32; 3]> {
        self.0
            .chunks_exact(12)
            .map(|c| [f32_at(c, 0), f32_at(c, 4), f32_at(c, 8)])
            .collect()
    }
}

/// Faces as count-prefixed little-endian `i32` index runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceBuffer(Vec<u8>);

impl FaceBuffer {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.len() % 4 != 0 {
            return Err(format!(
                "face buffer of {} bytes is not a multiple of 4",
                bytes.len()
            ));
        }
        let words = bytes.len() / 4;
        let mut at = 0;
        while at < words {
            let count = i32_at(&bytes, at * 4);
            if count < 0 {
                return Err(format!("negative face size {count} at word {at}"));
            }
            let end = at + 1 + count as usize;
            if end > words {
                return Err(format!(
                    "face at word {at} needs {count} indices but the buffer ends"
                ));
            }
            if let Some(i) = (at + 1..end).find(|&i| i32_at(&bytes, i * 4) < 0) {
                return Err(format!("negative index at word {i}"));
            }
            at = end;
        }
        Ok(FaceBuffer(bytes))
    }

    pub fn from_faces(faces: &[Vec<u32>]) -> Self {
        let mut bytes = Vec::new();
        for face in faces {
            bytes.extend_from_slice(&(face.len() as i32).to_le_bytes());
            for &index in face {
                bytes.extend_from_slice(&(index as i32).to_le_bytes());
            }
        }
        FaceBuffer(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn faces(&self) -> Vec<Vec<u32>> {
        let words = self.0.len() / 4;
        let mut out = Vec::new();
        let mut at = 0;
        while at < words {
            let count = i32_at(&self.0, at * 4).max(0) as usize;
            let end = (at + 1 + count).min(words);
            out.push(
                (at + 1..end)
                    .map(|i| i32_at(&self.0, i * 4).max(0) as u32)
                    .collect(),
            );
            at = end;
        }
        out
    }

    /// Number of faces.
    pub fn len(&self) -> usize {
        self.faces().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Texture coordinates: `channels` consecutive runs of little-endian `f32` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UvBuffer(Vec<u8>);

impl UvBuffer {
    pub fn from_bytes(bytes: Vec<u8>, channels: u32) -> Result<Self, String> {
        if bytes.is_empty() {
            return Ok(UvBuffer(bytes));
        }
        if channels == 0 {
            return Err("uv buffer present but uv_channels_count is 0".to_string());
        }
        let pairs = bytes.len() / 8;
        if bytes.len() % 8 != 0 || pairs % channels as usize != 0 {
            return Err(format!(
                "uv buffer of {} bytes does not split into {channels} channels of f32 pairs",
                bytes.len()
            ));
        }
        Ok(UvBuffer(bytes))
    }

    pub fn from_channels(channels: &[Vec<[f32; 2]>]) -> Self {
        UvBuffer(
            channels
                .iter()
                .flatten()
                .flatten()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn channels(&self, count: u32) -> Vec<Vec<[f32; 2]>> {
        if count == 0 || self.0.is_empty() {
            return Vec::new();
        }
        let per_channel = self.0.len() / 8 / count as usize;
        self.0
            .chunks_exact(8)
            .map(|c| [f32_at(c, 0), f32_at(c, 4)])
            .collect::<Vec<_>>()
            .chunks(per_channel.max(1))
            .map(<[_]>::to_vec)
            .collect()
    }
}

/// Renderable geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub base: NodeBase,
    pub vertices: Option<VertexBuffer>,
    pub normals: Option<VertexBuffer>,
    pub faces: Option<FaceBuffer>,
    pub uv_channels: Option<UvBuffer>,
    pub uv_channels_count: Option<u32>,
    pub vertices_count: Option<u64>,
    pub faces_count: Option<u64>,
    pub bounding_box: Option<BoundingBox>,
}

scene_node!(Mesh, NodeKind::Mesh);

impl Mesh {
    pub fn new(base: NodeBase) -> Self {
        Mesh {
            base,
            vertices: None,
            normals: None,
            faces: None,
            uv_channels: None,
            uv_channels_count: None,
            vertices_count: None,
            faces_count: None,
            bounding_box: None,
        }
    }

    /// The stored bounding box, or the unit cube.
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box.clone().unwrap_or_default()
    }

    /// Whether every buffer field is absent, as when buffers live in the blob store.
    pub fn buffers_detached(&self) -> bool {
        self.vertices.is_none()
            && self.normals.is_none()
            && self.faces.is_none()
            && self.uv_channels.is_none()
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        let vertices = fields
            .bytes(labels::VERTICES)?
            .map(|b| VertexBuffer::from_bytes(b).map_err(|e| NodeError::field(labels::VERTICES, e)))
            .transpose()?;
        let normals = fields
            .bytes(labels::NORMALS)?
            .map(|b| VertexBuffer::from_bytes(b).map_err(|e| NodeError::field(labels::NORMALS, e)))
            .transpose()?;
        let faces = fields
            .bytes(labels::FACES)?
            .map(|b| FaceBuffer::from_bytes(b).map_err(|e| NodeError::field(labels::FACES, e)))
            .transpose()?;
        let uv_channels_count = fields.u32(labels::UV_CHANNELS_COUNT)?;
        let uv_channels = fields
            .bytes(labels::UV_CHANNELS)?
            .map(|b| {
                UvBuffer::from_bytes(b, uv_channels_count.unwrap_or(1))
                    .map_err(|e| NodeError::field(labels::UV_CHANNELS, e))
            })
            .transpose()?;
        let vertices_count = fields.u64(labels::VERTICES_COUNT)?;
        let faces_count = fields.u64(labels::FACES_COUNT)?;

        if let (Some(buffer), Some(count)) = (&vertices, vertices_count) {
            if buffer.len() as u64 != count {
                return Err(NodeError::field(
                    labels::VERTICES_COUNT,
                    format!("declares {count} vertices, buffer holds {}", buffer.len()),
                ));
            }
        }
        if let (Some(buffer), Some(count)) = (&faces, faces_count) {
            if buffer.len() as u64 != count {
                return Err(NodeError::field(
                    labels::FACES_COUNT,
                    format!("declares {count} faces, buffer holds {}", buffer.len()),
                ));
            }
        }

        Ok(Mesh {
            base,
            vertices,
            normals,
            faces,
            uv_channels,
            uv_channels_count,
            vertices_count,
            faces_count,
            bounding_box: fields.bounding_box(labels::BOUNDING_BOX)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        let encoded = |bytes: &[u8]| codec::encode_bytes(bytes);
        put(doc, labels::VERTICES, self.vertices.as_ref().map(|b| encoded(b.as_bytes())));
        put(doc, labels::NORMALS, self.normals.as_ref().map(|b| encoded(b.as_bytes())));
        put(doc, labels::FACES, self.faces.as_ref().map(|b| encoded(b.as_bytes())));
        put(doc, labels::UV_CHANNELS, self.uv_channels.as_ref().map(|b| encoded(b.as_bytes())));
        put(doc, labels::UV_CHANNELS_COUNT, self.uv_channels_count);
        put(doc, labels::VERTICES_COUNT, self.vertices_count);
        put(doc, labels::FACES_COUNT, self.faces_count);
        put(doc, labels::BOUNDING_BOX, self.bounding_box.as_ref().map(BoundingBox::to_value));
    }
}

/// Surface appearance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Material {
    pub base: NodeBase,
    pub ambient: Option<Vector3>,
    pub diffuse: Option<Vector3>,
    pub specular: Option<Vector3>,
    pub emissive: Option<Vector3>,
    pub opacity: Option<Real>,
    pub shininess: Option<Real>,
    pub shininess_strength: Option<Real>,
    pub wireframe: Option<bool>,
    pub two_sided: Option<bool>,
}

scene_node!(Material, NodeKind::Material);

impl Material {
    pub fn new(base: NodeBase) -> Self {
        Material {
            base,
            ..Default::default()
        }
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Material {
            base,
            ambient: fields.vector(labels::AMBIENT)?,
            diffuse: fields.vector(labels::DIFFUSE)?,
            specular: fields.vector(labels::SPECULAR)?,
            emissive: fields.vector(labels::EMISSIVE)?,
            opacity: fields.real(labels::OPACITY)?,
            shininess: fields.real(labels::SHININESS)?,
            shininess_strength: fields.real(labels::SHININESS_STRENGTH)?,
            wireframe: fields.bool(labels::WIREFRAME)?,
            two_sided: fields.bool(labels::TWO_SIDED)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::AMBIENT, self.ambient.as_ref().map(Vector3::to_value));
        put(doc, labels::DIFFUSE, self.diffuse.as_ref().map(Vector3::to_value));
        put(doc, labels::SPECULAR, self.specular.as_ref().map(Vector3::to_value));
        put(doc, labels::EMISSIVE, self.emissive.as_ref().map(Vector3::to_value));
        put(doc, labels::OPACITY, self.opacity.clone());
        put(doc, labels::SHININESS, self.shininess.clone());
        put(doc, labels::SHININESS_STRENGTH, self.shininess_strength.clone());
        put(doc, labels::WIREFRAME, self.wireframe);
        put(doc, labels::TWO_SIDED, self.two_sided);
    }
}

/// Image data applied by materials.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Texture {
    pub base: NodeBase,
    pub extension: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub data: Option<Vec<u8>>,
}

scene_node!(Texture, NodeKind::Texture);

impl Texture {
    pub fn new(base: NodeBase) -> Self {
        Texture {
            base,
            ..Default::default()
        }
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Texture {
            base,
            extension: fields.string(labels::EXTENSION)?,
            width: fields.u32(labels::WIDTH)?,
            height: fields.u32(labels::HEIGHT)?,
            data: fields.bytes(labels::DATA)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::EXTENSION, self.extension.clone());
        put(doc, labels::WIDTH, self.width);
        put(doc, labels::HEIGHT, self.height);
        put(doc, labels::DATA, self.data.as_deref().map(codec::encode_bytes));
    }
}

/// A viewpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Camera {
    pub base: NodeBase,
    pub look_at: Option<Vector3>,
    pub position: Option<Vector3>,
    pub up: Option<Vector3>,
    pub fov: Option<Real>,
    pub near: Option<Real>,
    pub far: Option<Real>,
    pub aspect_ratio: Option<Real>,
}

scene_node!(Camera, NodeKind::Camera);

impl Camera {
    pub fn new(base: NodeBase) -> Self {
        Camera {
            base,
            ..Default::default()
        }
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Camera {
            base,
            look_at: fields.vector(labels::LOOK_AT)?,
            position: fields.vector(labels::POSITION)?,
            up: fields.vector(labels::UP)?,
            fov: fields.real(labels::FOV)?,
            near: fields.real(labels::NEAR)?,
            far: fields.real(labels::FAR)?,
            aspect_ratio: fields.real(labels::ASPECT_RATIO)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::LOOK_AT, self.look_at.as_ref().map(Vector3::to_value));
        put(doc, labels::POSITION, self.position.as_ref().map(Vector3::to_value));
        put(doc, labels::UP, self.up.as_ref().map(Vector3::to_value));
        put(doc, labels::FOV, self.fov.clone());
        put(doc, labels::NEAR, self.near.clone());
        put(doc, labels::FAR, self.far.clone());
        put(doc, labels::ASPECT_RATIO, self.aspect_ratio.clone());
    }
}

/// Points at another project's graph, to be expanded at query time.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub base: NodeBase,
    /// Target account; the referencing account when absent.
    pub owner: Option<String>,
    pub project: String,
    /// Target revision (`unique`) or branch id.
    pub revision: Option<Identifier>,
    pub unique: Option<bool>,
}

scene_node!(Reference, NodeKind::Reference);

impl Reference {
    pub fn new(base: NodeBase, project: impl Into<String>) -> Self {
        Reference {
            base,
            owner: None,
            project: project.into(),
            revision: None,
            unique: None,
        }
    }

    pub fn target_account<'a>(&'a self, referencing_account: &'a str) -> &'a str {
        self.owner.as_deref().unwrap_or(referencing_account)
    }

    /// The branch or revision this reference resolves to.
    pub fn target_ref(&self) -> BranchRef {
        match (self.revision, self.unique.unwrap_or(false)) {
            (Some(id), true) => BranchRef::Revision(RevisionId(id)),
            (Some(id), false) => BranchRef::Branch(id.to_string()),
            (None, _) => BranchRef::master(),
        }
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Reference {
            base,
            owner: fields.string(labels::OWNER)?,
            project: fields
                .string(labels::PROJECT)?
                .ok_or(NodeError::MissingField(labels::PROJECT))?,
            revision: fields.id(labels::REFERENCE_REVISION)?,
            unique: fields.bool(labels::UNIQUE)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::OWNER, self.owner.clone());
        doc.insert(labels::PROJECT.into(), Value::String(self.project.clone()));
        put(doc, labels::REFERENCE_REVISION, self.revision.as_ref().map(codec::encode_id));
        put(doc, labels::UNIQUE, self.unique);
    }
}

/// Free-form metadata attached to the graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    pub base: NodeBase,
    pub metadata: Option<Value>,
    pub subtype: Option<String>,
}

scene_node!(Metadata, NodeKind::Metadata);

impl Metadata {
    pub fn new(base: NodeBase) -> Self {
        Metadata {
            base,
            ..Default::default()
        }
    }

    pub fn is_readme(&self) -> bool {
        self.subtype.as_deref() == Some(labels::README_SUBTYPE)
    }

    pub(crate) fn take(base: NodeBase, fields: &mut Fields) -> Result<Self, NodeError> {
        Ok(Metadata {
            base,
            metadata: fields.take(labels::METADATA),
            subtype: fields.string(labels::SUBTYPE)?,
        })
    }

    pub(crate) fn write_payload(&self, doc: &mut Document) {
        put(doc, labels::METADATA, self.metadata.clone());
        put(doc, labels::SUBTYPE, self.subtype.clone());
    }
}

fn f32_at(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn i32_at(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
