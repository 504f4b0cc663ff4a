//! Snapshot diff computation over shared identity

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::{SharedId, UniqueId};
use crate::revision::Revision;

/// Shared-id sets that changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Shared ids live in the second snapshot only.
    pub added: Vec<SharedId>,
    /// Shared ids live in the first snapshot only.
    pub deleted: Vec<SharedId>,
    /// Shared ids live in both whose content changed, as judged by the detector.
    pub modified: Vec<SharedId>,
    /// Unique ids with no known shared identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped: Vec<UniqueId>,
}

impl SnapshotDiff {
    /// Check if this diff is empty (no changes).
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Translates unique ids to shared ids.
pub trait IdentityLookup {
    fn shared_of(&self, unique_id: &UniqueId) -> Option<SharedId>;
}

impl IdentityLookup for HashMap<UniqueId, SharedId> {
    fn shared_of(&self, unique_id: &UniqueId) -> Option<SharedId> {
        self.get(unique_id).copied()
    }
}

impl IdentityLookup for BTreeMap<UniqueId, SharedId> {
    fn shared_of(&self, unique_id: &UniqueId) -> Option<SharedId> {
        self.get(unique_id).copied()
    }
}

/// Decides which logical nodes present on both sides count as modified.
///
/// Both maps go from shared id to the unique id live on that side.
pub trait ModificationDetector: Send + Sync {
    fn modified(
        &self,
        before: &BTreeMap<SharedId, UniqueId>,
        after: &BTreeMap<SharedId, UniqueId>,
    ) -> Vec<SharedId>;
}

/// A node is modified when its shared id survives but its unique id changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueIdChange;

impl ModificationDetector for UniqueIdChange {
    fn modified(
        &self,
        before: &BTreeMap<SharedId, UniqueId>,
        after: &BTreeMap<SharedId, UniqueId>,
    ) -> Vec<SharedId> {
        before
            .iter()
            .filter_map(|(sid, uid)| match after.get(sid) {
                Some(other) if other != uid => Some(*sid),
                _ => None,
            })
            .collect()
    }
}

/// Reports nothing as modified.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModifications;

impl ModificationDetector for NoModifications {
    fn modified(
        &self,
        _before: &BTreeMap<SharedId, UniqueId>,
        _after: &BTreeMap<SharedId, UniqueId>,
    ) -> Vec<SharedId> {
        Vec::new()
    }
}

/// Set-based diff of two snapshots' live sets.
pub struct DiffEngine {
    detector: Box<dyn ModificationDetector>,
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine").finish_non_exhaustive()
    }
}

impl DiffEngine {
    pub fn new() -> Self {
        DiffEngine {
            detector: Box::new(UniqueIdChange),
        }
    }

    pub fn with_detector<D: ModificationDetector + 'static>(detector: D) -> Self {
        DiffEngine {
            detector: Box::new(detector),
        }
    }

    /// Diff two revisions, translating their current sets through `lookup`.
    pub fn compute<L: IdentityLookup + ?Sized>(
        &self,
        a: &Revision,
        b: &Revision,
        lookup: &L,
    ) -> SnapshotDiff {
        self.compute_sets(&a.current, &b.current, lookup)
    }

    pub fn compute_sets<L: IdentityLookup + ?Sized>(
        &self,
        a: &[UniqueId],
        b: &[UniqueId],
        lookup: &L,
    ) -> SnapshotDiff {
        let mut unmapped = BTreeSet::new();
        let mut by_shared = |current: &[UniqueId]| {
            let mut map = BTreeMap::new();
            for uid in current {
                match lookup.shared_of(uid) {
                    Some(sid) => {
                        map.insert(sid, *uid);
                    }
                    None => {
                        unmapped.insert(*uid);
                    }
                }
            }
            map
        };
        let before = by_shared(a);
        let after = by_shared(b);

        SnapshotDiff {
            added: after.keys().filter(|s| !before.contains_key(s)).copied().collect(),
            deleted: before.keys().filter(|s| !after.contains_key(s)).copied().collect(),
            modified: self.detector.modified(&before, &after),
            unmapped: unmapped.into_iter().collect(),
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(n: usize) -> Vec<(UniqueId, SharedId)> {
        (0..n).map(|_| (UniqueId::generate(), SharedId::generate())).collect()
    }

    #[test]
    fn test_modified_detection_is_pluggable() {
        let nodes = pairs(2);
        let replacement = UniqueId::generate();
        let mut lookup: HashMap<UniqueId, SharedId> = nodes.iter().copied().collect();
        lookup.insert(replacement, nodes[1].1);

        let a = vec![nodes[0].0, nodes[1].0];
        let b = vec![nodes[0].0, replacement];

        let diff = DiffEngine::new().compute_sets(&a, &b, &lookup);
        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
        assert_eq!(diff.modified, vec![nodes[1].1]);

        let quiet = DiffEngine::with_detector(NoModifications).compute_sets(&a, &b, &lookup);
        assert!(quiet.is_empty());
    }

    #[test]
    fn test_unmapped_unique_ids_are_reported() {
        let nodes = pairs(1);
        let lookup: HashMap<UniqueId, SharedId> = nodes.iter().copied().collect();
        let stray = UniqueId::generate();

        let diff = DiffEngine::new().compute_sets(&[nodes[0].0], &[nodes[0].0, stray], &lookup);
        assert!(diff.is_empty());
        assert_eq!(diff.unmapped, vec![stray]);
    }
}
