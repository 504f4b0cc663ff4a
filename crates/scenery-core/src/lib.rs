//! Scenery Core — identifiers, scene node model, graph assembly and snapshot diffs

pub mod codec;
pub mod diff;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod ids;
pub mod labels;
pub mod model;
pub mod nodes;
pub mod revision;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use diff::{
    DiffEngine, IdentityLookup, ModificationDetector, NoModifications, SnapshotDiff, UniqueIdChange,
};
pub use error::{CodecError, GraphError, IdError, NodeError};
pub use geometry::{BoundingBox, Matrix4, Real, Vector3};
pub use graph::{AssemblyWarning, SceneCounts, SceneGraph};
pub use ids::{
    BranchId, Identifier, RevisionId, SharedId, UniqueId, bytes_to_id, bytes_to_ids, generate_id,
    id_to_bytes, ids_to_bytes,
};
pub use model::{
    BulkDecoded, Document, Node, NodeBase, NodeKind, SceneNode, SkippedRecord, bulk_decode,
};
pub use nodes::{
    Camera, FaceBuffer, Material, Mesh, Metadata, Reference, Texture, Transformation, UvBuffer,
    VertexBuffer,
};
pub use revision::{
    BranchRef, Commit, Modification, NodeRef, Revision, RevisionInfo, RevisionSummary,
};
