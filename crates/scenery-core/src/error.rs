//! Error kinds raised while decoding identifiers, nodes and graphs

use thiserror::Error;

use crate::ids::{SharedId, UniqueId};

/// A textual or binary identifier could not be interpreted as a 128-bit id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("malformed identifier {text:?}: expected a lower-case hyphenated UUID")]
    MalformedText { text: String },

    #[error("malformed identifier: expected 16 bytes, got {0}")]
    BadLength(usize),

    #[error("malformed identifier: {0}")]
    Encoding(#[from] CodecError),
}

/// Extended-JSON binary values that fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected a $binary document, found {0}")]
    NotBinary(String),

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("unexpected binary subtype {found:#04x}, expected one of {expected:?}")]
    Subtype { found: u8, expected: &'static [u8] },
}

/// A raw record cannot be turned into a typed node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("record has no `type` field")]
    MissingType,

    #[error("unsupported node type {0:?}")]
    UnsupportedType(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("malformed field `{field}`: {reason}")]
    Field { field: String, reason: String },

    #[error("malformed identifier in `{field}`: {source}")]
    Identifier {
        field: String,
        #[source]
        source: IdError,
    },
}

impl NodeError {
    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn identifier(field: impl Into<String>, source: IdError) -> Self {
        NodeError::Identifier {
            field: field.into(),
            source,
        }
    }
}

/// The node set of a snapshot does not form a well-shaped scene graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("scene has no root transformation")]
    NoRoot,

    #[error("scene has {} root transformations", .0.len())]
    MultipleRoots(Vec<SharedId>),

    #[error("shared id {0} appears more than once in the snapshot")]
    DuplicateSharedId(SharedId),

    #[error("unique id {0} appears more than once in the snapshot")]
    DuplicateUniqueId(UniqueId),
}
