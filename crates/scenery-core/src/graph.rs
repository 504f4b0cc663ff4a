//! Scene graph assembled from one snapshot's nodes, over petgraph::StableDiGraph

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GraphError, NodeError};
use crate::ids::{SharedId, UniqueId};
use crate::model::{Document, Node, NodeKind, SceneNode, bulk_decode};

/// Per-kind node counts of an assembled graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneCounts {
    pub transformations: usize,
    pub meshes: usize,
    pub materials: usize,
    pub textures: usize,
    pub cameras: usize,
    pub references: usize,
    pub metadata: usize,
}

impl SceneCounts {
    fn bump(&mut self, kind: NodeKind) {
        match kind {
            NodeKind::Transformation => self.transformations += 1,
            NodeKind::Mesh => self.meshes += 1,
            NodeKind::Material => self.materials += 1,
            NodeKind::Texture => self.textures += 1,
            NodeKind::Camera => self.cameras += 1,
            NodeKind::Reference => self.references += 1,
            NodeKind::Metadata => self.metadata += 1,
            NodeKind::Revision => {}
        }
    }

    pub fn total(&self) -> usize {
        self.transformations
            + self.meshes
            + self.materials
            + self.textures
            + self.cameras
            + self.references
            + self.metadata
    }
}

/// Recoverable conditions met while assembling.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyWarning {
    /// `node` names a parent that is not in the snapshot; it is kept as a detached root.
    DanglingParent { node: SharedId, parent: SharedId },
    /// A record failed to decode and was left out.
    Skipped {
        index: usize,
        unique_id: Option<String>,
        error: NodeError,
    },
}

/// Navigable, immutable view of a snapshot. Edges point from parent to child.
pub struct SceneGraph {
    inner: StableDiGraph<Node, ()>,
    by_shared: HashMap<SharedId, NodeIndex>,
    by_unique: HashMap<UniqueId, NodeIndex>,
    by_kind: BTreeMap<NodeKind, BTreeMap<UniqueId, NodeIndex>>,
    counts: SceneCounts,
    root: NodeIndex,
    detached: Vec<SharedId>,
    warnings: Vec<AssemblyWarning>,
}

impl std::fmt::Debug for SceneGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .field("root", &self.root_id())
            .field("detached", &self.detached.len())
            .finish()
    }
}

impl SceneGraph {
    /// Build the graph for one snapshot.
    ///
    /// The root is the single transformation without parents. Nodes whose
    /// parents cannot be found are kept as detached roots and reported as
    /// warnings; they never count as the root.
    pub fn assemble<I>(nodes: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Node>,
    {
        let mut inner = StableDiGraph::new();
        let mut by_shared = HashMap::new();
        let mut by_unique = HashMap::new();
        let mut by_kind: BTreeMap<NodeKind, BTreeMap<UniqueId, NodeIndex>> = BTreeMap::new();
        let mut counts = SceneCounts::default();

        for node in nodes {
            let (sid, uid, kind) = (node.shared_id(), node.unique_id(), node.kind());
            if by_shared.contains_key(&sid) {
                return Err(GraphError::DuplicateSharedId(sid));
            }
            if by_unique.contains_key(&uid) {
                return Err(GraphError::DuplicateUniqueId(uid));
            }
            let idx = inner.add_node(node);
            by_shared.insert(sid, idx);
            by_unique.insert(uid, idx);
            by_kind.entry(kind).or_default().insert(uid, idx);
            counts.bump(kind);
        }

        let roots: Vec<NodeIndex> = inner
            .node_indices()
            .filter(|&idx| {
                inner
                    .node_weight(idx)
                    .is_some_and(|n| n.kind() == NodeKind::Transformation && n.is_root_candidate())
            })
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(GraphError::NoRoot),
            [root] => *root,
            many => {
                let mut sids: Vec<SharedId> = many
                    .iter()
                    .filter_map(|&idx| inner.node_weight(idx).map(|n| n.shared_id()))
                    .collect();
                sids.sort();
                return Err(GraphError::MultipleRoots(sids));
            }
        };

        let mut edges = Vec::new();
        let mut detached = Vec::new();
        let mut warnings = Vec::new();
        for idx in inner.node_indices() {
            let Some(node) = inner.node_weight(idx) else { continue };
            let mut seen = HashSet::new();
            let mut dangling = false;
            for parent in node.parents() {
                if !seen.insert(*parent) {
                    continue;
                }
                match by_shared.get(parent) {
                    Some(&parent_idx) => edges.push((parent_idx, idx)),
                    None => {
                        warn!(
                            node = %node.shared_id(),
                            parent = %parent,
                            "dangling parent reference"
                        );
                        warnings.push(AssemblyWarning::DanglingParent {
                            node: node.shared_id(),
                            parent: *parent,
                        });
                        dangling = true;
                    }
                }
            }
            if dangling {
                detached.push(node.shared_id());
            }
        }
        for (parent, child) in edges {
            inner.add_edge(parent, child, ());
        }

        debug!(
            nodes = inner.node_count(),
            edges = inner.edge_count(),
            detached = detached.len(),
            "assembled scene graph"
        );

        Ok(SceneGraph {
            inner,
            by_shared,
            by_unique,
            by_kind,
            counts,
            root,
            detached,
            warnings,
        })
    }

    /// Decode raw documents, skipping malformed ones, and assemble them.
    pub fn from_documents<I>(docs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Document>,
    {
        let decoded = bulk_decode(docs);
        let mut graph = Self::assemble(decoded.nodes)?;
        graph.warnings.extend(decoded.skipped.into_iter().map(|s| AssemblyWarning::Skipped {
            index: s.index,
            unique_id: s.unique_id,
            error: s.error,
        }));
        Ok(graph)
    }

    pub fn root(&self) -> &Node {
        &self.inner[self.root]
    }

    pub fn root_id(&self) -> SharedId {
        self.root().shared_id()
    }

    pub fn node_by_shared(&self, id: &SharedId) -> Option<&Node> {
        self.by_shared.get(id).and_then(|&idx| self.inner.node_weight(idx))
    }

    pub fn node_by_unique(&self, id: &UniqueId) -> Option<&Node> {
        self.by_unique.get(id).and_then(|&idx| self.inner.node_weight(idx))
    }

    /// Direct children, in input order.
    pub fn children(&self, id: &SharedId) -> Vec<&Node> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Parents present in the graph, in input order.
    pub fn parents_of(&self, id: &SharedId) -> Vec<&Node> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &SharedId, direction: Direction) -> Vec<&Node> {
        let Some(&idx) = self.by_shared.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.inner.neighbors_directed(idx, direction).collect();
        found.sort();
        found.dedup();
        found
            .into_iter()
            .filter_map(|n| self.inner.node_weight(n))
            .collect()
    }

    /// Every node reachable below `id`, breadth first, each once.
    pub fn descendants(&self, id: &SharedId) -> Vec<&Node> {
        let Some(&start) = self.by_shared.get(id) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .inner
                .neighbors_directed(current, Direction::Outgoing)
                .collect();
            next.sort();
            for child in next {
                if visited.insert(child) {
                    if let Some(node) = self.inner.node_weight(child) {
                        out.push(node);
                    }
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Nodes of one kind, ordered by unique id.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flat_map(|bucket| bucket.values())
            .filter_map(move |&idx| self.inner.node_weight(idx))
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    pub fn counts(&self) -> SceneCounts {
        self.counts
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Nodes kept despite a missing parent.
    pub fn detached_roots(&self) -> &[SharedId] {
        &self.detached
    }

    pub fn warnings(&self) -> &[AssemblyWarning] {
        &self.warnings
    }
}
