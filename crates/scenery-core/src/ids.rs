//! 128-bit identifiers and their textual form
//!
//! Every node carries two identities: a [`UniqueId`] that changes whenever the
//! node's content changes, and a [`SharedId`] that stays stable across
//! revisions for the same logical entity. Revisions and branches use the same
//! 128-bit space through [`RevisionId`] and [`BranchId`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

/// Namespace for hash-derived branch identifiers.
const BRANCH_NAMESPACE: Uuid = Uuid::from_u128(0x5c3e_9a41_27d8_4f6b_b1a0_3d9e_0f7c_2b18);

/// Raw 128-bit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    pub const NIL: Identifier = Identifier(Uuid::nil());

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Identifier(uuid)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Identifier(Uuid::from_bytes(bytes))
    }

    /// Build an identifier from a byte slice that must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        Uuid::from_slice(bytes)
            .map(Identifier)
            .map_err(|_| IdError::BadLength(bytes.len()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Identifier {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        id_to_bytes(s)
    }
}

/// Parse the canonical textual form (lower-case, hyphenated) of an identifier.
///
/// Only the canonical form is accepted so that [`bytes_to_id`] is its exact
/// inverse.
pub fn id_to_bytes(text: &str) -> Result<Identifier, IdError> {
    let malformed = || IdError::MalformedText {
        text: text.to_string(),
    };

    let canonical = text.len() == 36
        && text.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_digit() || ('a'..='f').contains(&c),
        });
    if !canonical {
        return Err(malformed());
    }

    Uuid::try_parse(text).map(Identifier).map_err(|_| malformed())
}

/// Render an identifier in its canonical textual form.
pub fn bytes_to_id(id: &Identifier) -> String {
    id.to_string()
}

/// Parse a sequence of textual identifiers, preserving order.
pub fn ids_to_bytes<S: AsRef<str>>(texts: &[S]) -> Result<Vec<Identifier>, IdError> {
    texts.iter().map(|t| id_to_bytes(t.as_ref())).collect()
}

/// Render a sequence of identifiers, preserving order.
pub fn bytes_to_ids(ids: &[Identifier]) -> Vec<String> {
    ids.iter().map(bytes_to_id).collect()
}

/// A fresh random (v4) identifier.
pub fn generate_id() -> Identifier {
    Identifier(Uuid::new_v4())
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[derive(Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Identifier);

        impl $name {
            /// A fresh random identifier.
            pub fn generate() -> Self {
                $name(generate_id())
            }

            pub fn id(&self) -> Identifier {
                self.0
            }
        }

        impl From<Identifier> for $name {
            fn from(id: Identifier) -> Self {
                $name(id)
            }
        }

        impl From<$name> for Identifier {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                id_to_bytes(s).map($name)
            }
        }
    };
}

id_newtype!(
    /// Per-revision physical identity of a node instance.
    UniqueId
);
id_newtype!(
    /// Logical identity of a node, stable across revisions.
    SharedId
);
id_newtype!(
    /// Identity of a single revision in a project's history.
    RevisionId
);
id_newtype!(
    /// Identity of a line of history. Revisions carry it as their shared id.
    BranchId
);

impl BranchId {
    /// The distinguished master branch (the nil UUID).
    pub const MASTER: BranchId = BranchId(Identifier::NIL);

    /// Resolve a branch name to its identifier.
    ///
    /// `master` maps to [`BranchId::MASTER`], a textual UUID maps to itself and
    /// any other name is hashed into a stable v5 UUID.
    pub fn from_name(name: &str) -> Self {
        if name == crate::labels::MASTER_BRANCH_NAME {
            return BranchId::MASTER;
        }
        match id_to_bytes(name) {
            Ok(id) => BranchId(id),
            Err(_) => BranchId(Identifier(Uuid::new_v5(&BRANCH_NAMESPACE, name.as_bytes()))),
        }
    }

    pub fn is_master(&self) -> bool {
        self.0.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_textual_identifier() {
        let text = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";
        let id = id_to_bytes(text).unwrap();
        assert_eq!(bytes_to_id(&id), text);
    }

    #[test]
    fn test_rejects_non_canonical_text() {
        for bad in [
            "",
            "not-a-uuid",
            "3F2504E0-4F89-11D3-9A0C-0305E82C3301",
            "3f2504e04f8911d39a0c0305e82c3301",
            "{3f2504e0-4f89-11d3-9a0c-0305e82c3301}",
            "3f2504e0-4f89-11d3-9a0c-0305e82c330g",
        ] {
            assert!(
                matches!(id_to_bytes(bad), Err(IdError::MalformedText { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_from_slice_requires_sixteen_bytes() {
        assert_eq!(Identifier::from_slice(&[0u8; 15]), Err(IdError::BadLength(15)));
        let id = Identifier::from_slice(&[7u8; 16]).unwrap();
        assert_eq!(id.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn test_bulk_conversions_preserve_order() {
        let ids: Vec<Identifier> = (0..5).map(|_| generate_id()).collect();
        let texts = bytes_to_ids(&ids);
        assert_eq!(ids_to_bytes(&texts).unwrap(), ids);
    }

    #[test]
    fn test_branch_ids() {
        assert_eq!(BranchId::from_name("master"), BranchId::MASTER);
        assert!(BranchId::from_name("master").is_master());

        let explicit = "0b1c2d3e-4f50-4617-8283-949596979899";
        assert_eq!(BranchId::from_name(explicit).to_string(), explicit);

        let hashed = BranchId::from_name("design-review");
        assert_eq!(hashed, BranchId::from_name("design-review"));
        assert_ne!(hashed, BranchId::from_name("design-review-2"));
        assert!(!hashed.is_master());
    }
}
