//! Field names and well-known values of the stored documents

pub const UNIQUE_ID: &str = "_id";
pub const SHARED_ID: &str = "shared_id";
pub const REV_ID: &str = "rev_id";
pub const API: &str = "api";
pub const PATHS: &str = "paths";
pub const TYPE: &str = "type";
pub const PARENTS: &str = "parents";
pub const NAME: &str = "name";

// transformation
pub const MATRIX: &str = "matrix";

// mesh
pub const VERTICES: &str = "vertices";
pub const VERTICES_COUNT: &str = "vertices_count";
pub const NORMALS: &str = "normals";
pub const FACES: &str = "faces";
pub const FACES_COUNT: &str = "faces_count";
pub const UV_CHANNELS: &str = "uv_channels";
pub const UV_CHANNELS_COUNT: &str = "uv_channels_count";
pub const BOUNDING_BOX: &str = "bounding_box";

/// Mesh fields that hold binary buffers, and may live in the blob store.
pub const MESH_BUFFER_FIELDS: [&str; 4] = [VERTICES, NORMALS, FACES, UV_CHANNELS];

// material
pub const AMBIENT: &str = "ambient";
pub const DIFFUSE: &str = "diffuse";
pub const SPECULAR: &str = "specular";
pub const EMISSIVE: &str = "emissive";
pub const OPACITY: &str = "opacity";
pub const SHININESS: &str = "shininess";
pub const SHININESS_STRENGTH: &str = "shininess_strength";
pub const WIREFRAME: &str = "wireframe";
pub const TWO_SIDED: &str = "two_sided";

// texture
pub const EXTENSION: &str = "extension";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const DATA: &str = "data";

// camera
pub const LOOK_AT: &str = "look_at";
pub const POSITION: &str = "position";
pub const UP: &str = "up";
pub const FOV: &str = "fov";
pub const NEAR: &str = "near";
pub const FAR: &str = "far";
pub const ASPECT_RATIO: &str = "aspect_ratio";

// reference
pub const OWNER: &str = "owner";
pub const PROJECT: &str = "project";
pub const REFERENCE_REVISION: &str = "_rid";
pub const UNIQUE: &str = "unique";

// metadata
pub const METADATA: &str = "metadata";
pub const SUBTYPE: &str = "subtype";

// revision
pub const AUTHOR: &str = "author";
pub const BRANCH: &str = "branch";
pub const CURRENT: &str = "current";
pub const MESSAGE: &str = "message";
pub const TAG: &str = "tag";
pub const TIMESTAMP: &str = "timestamp";
pub const ADDED: &str = "added";
pub const DELETED: &str = "deleted";
pub const MODIFIED: &str = "modified";

pub const MASTER_BRANCH_NAME: &str = "master";
pub const HEAD_REVISION_NAME: &str = "head";
pub const README_SUBTYPE: &str = "readme";
