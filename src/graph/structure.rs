//! Lineage graph structure and vertex bookkeeping.
//!
//! The [`LineageGraph`] is the central data structure: a directed graph whose
//! vertices are segmented cells (one per frame and mask id) and whose edges
//! are overlap links pointing forward in time. It keeps:
//! - a `(frame, mask_id)` index for lookups by natural key
//! - the forward-in-time invariant on every edge
//! - a deterministic `(frame, mask_id)` iteration order for the analyzers

use crate::core::error::{GraphError, GraphResult};
use crate::core::types::{EdgeAttributes, Frame, MaskId, Overlap, TrackId, Vertex};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The lineage graph.
///
/// `index` is only a key lookup; analyzers iterate through
/// [`LineageGraph::ordered_vertices`].
#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    /// Vertices and overlap edges.
    graph: DiGraph<Vertex, Overlap>,
    /// Natural key lookup.
    index: IndexMap<(Frame, MaskId), NodeIndex>,
}

impl LineageGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Vertex Management
    // ========================================================================

    /// Add a vertex to the graph.
    pub fn add_vertex(&mut self, vertex: Vertex) -> GraphResult<NodeIndex> {
        if vertex.mask_id == 0 {
            return Err(GraphError::BackgroundMaskId {
                frame: vertex.frame,
            });
        }
        let key = vertex.key();
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateVertex {
                frame: key.0,
                mask_id: key.1,
            });
        }
        let idx = self.graph.add_node(vertex);
        self.index.insert(key, idx);
        Ok(idx)
    }

    /// Get a vertex by index.
    pub fn vertex(&self, v: NodeIndex) -> &Vertex {
        &self.graph[v]
    }

    /// Find a vertex by its natural key.
    pub fn find(&self, frame: Frame, mask_id: MaskId) -> Option<NodeIndex> {
        self.index.get(&(frame, mask_id)).copied()
    }

    /// Find a vertex by its natural key or fail.
    pub fn require(&self, frame: Frame, mask_id: MaskId) -> GraphResult<NodeIndex> {
        self.find(frame, mask_id)
            .ok_or(GraphError::VertexNotFound { frame, mask_id })
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Vertex indices in insertion order.
    pub fn vertex_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Vertex indices in ascending `(frame, mask_id)` order.
    ///
    /// This is the iteration order every order-sensitive analysis uses.
    pub fn ordered_vertices(&self) -> Vec<NodeIndex> {
        let mut order: Vec<_> = self.graph.node_indices().collect();
        order.sort_by_key(|&v| self.graph[v].key());
        order
    }

    /// Mask ids present per frame.
    pub fn mask_ids_by_frame(&self) -> BTreeMap<Frame, BTreeSet<MaskId>> {
        let mut out: BTreeMap<Frame, BTreeSet<MaskId>> = BTreeMap::new();
        for &(frame, mask_id) in self.index.keys() {
            out.entry(frame).or_default().insert(mask_id);
        }
        out
    }

    // ========================================================================
    // Edge Management
    // ========================================================================

    /// Link two vertices. The target must lie in a later frame.
    pub fn add_edge(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        overlap: Overlap,
    ) -> GraphResult<EdgeIndex> {
        let (frame_source, mask_id_source) = self.graph[source].key();
        let (frame_target, mask_id_target) = self.graph[target].key();
        if frame_target <= frame_source {
            return Err(GraphError::BackwardEdge {
                frame_source,
                frame_target,
            });
        }
        if self.graph.find_edge(source, target).is_some() {
            return Err(GraphError::DuplicateEdge {
                frame_source,
                mask_id_source,
                frame_target,
                mask_id_target,
            });
        }
        Ok(self.graph.add_edge(source, target, overlap))
    }

    /// Link two vertices given by their natural keys.
    pub fn connect(
        &mut self,
        source: (Frame, MaskId),
        target: (Frame, MaskId),
        overlap: Overlap,
    ) -> GraphResult<EdgeIndex> {
        let s = self.require(source.0, source.1)?;
        let t = self.require(target.0, target.1)?;
        self.add_edge(s, t, overlap)
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edge indices in insertion order.
    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    /// Endpoints of an edge.
    pub fn endpoints(&self, e: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph
            .edge_endpoints(e)
            .unwrap_or((NodeIndex::end(), NodeIndex::end()))
    }

    /// Full attribute record of an edge.
    pub fn edge(&self, e: EdgeIndex) -> EdgeAttributes {
        let (s, t) = self.endpoints(e);
        let source = &self.graph[s];
        let target = &self.graph[t];
        EdgeAttributes {
            frame_source: source.frame,
            frame_target: target.frame,
            mask_id_source: source.mask_id,
            mask_id_target: target.mask_id,
            overlap: self.graph[e],
        }
    }

    /// Incoming edges of a vertex.
    pub fn in_edges(&self, v: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edges_directed(v, Direction::Incoming)
            .map(|e| e.id())
            .collect()
    }

    /// Outgoing edges of a vertex.
    pub fn out_edges(&self, v: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edges_directed(v, Direction::Outgoing)
            .map(|e| e.id())
            .collect()
    }

    /// In-degree of a vertex.
    pub fn in_degree(&self, v: NodeIndex) -> usize {
        self.graph.edges_directed(v, Direction::Incoming).count()
    }

    /// Out-degree of a vertex.
    pub fn out_degree(&self, v: NodeIndex) -> usize {
        self.graph.edges_directed(v, Direction::Outgoing).count()
    }

    /// Predecessors in ascending `(frame, mask_id)` order.
    pub fn predecessors(&self, v: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(v, Direction::Incoming)
    }

    /// Successors in ascending `(frame, mask_id)` order.
    pub fn successors(&self, v: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(v, Direction::Outgoing)
    }

    fn sorted_neighbors(&self, v: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<_> = self.graph.neighbors_directed(v, dir).collect();
        out.sort_by_key(|&n| self.graph[n].key());
        out.dedup();
        out
    }

    /// Whether a vertex has in- and out-degree of at most one.
    pub fn is_unbranched(&self, v: NodeIndex) -> bool {
        self.in_degree(v) <= 1 && self.out_degree(v) <= 1
    }

    /// Division shape: in-degree ≤ 1, out-degree 2 and every neighbour
    /// unbranched.
    pub fn is_division(&self, v: NodeIndex) -> bool {
        self.in_degree(v) <= 1
            && self.out_degree(v) == 2
            && self
                .graph
                .neighbors_undirected(v)
                .all(|n| self.is_unbranched(n))
    }

    /// Fusion shape: in-degree 2, out-degree ≤ 1 and every neighbour
    /// unbranched.
    pub fn is_fusion(&self, v: NodeIndex) -> bool {
        self.in_degree(v) == 2
            && self.out_degree(v) <= 1
            && self
                .graph
                .neighbors_undirected(v)
                .all(|n| self.is_unbranched(n))
    }

    /// Sum of skipped frames over a set of edges.
    pub fn missing_frames<I: IntoIterator<Item = EdgeIndex>>(&self, edges: I) -> u32 {
        edges
            .into_iter()
            .map(|e| self.edge(e).missing_frames())
            .sum()
    }

    // ========================================================================
    // Components and Cell Tracks
    // ========================================================================

    /// Weakly-connected components.
    ///
    /// Components are ordered by their first vertex in `(frame, mask_id)`
    /// order; members are listed in that order too.
    pub fn weak_components(&self) -> Vec<Vec<NodeIndex>> {
        self.components_where(|_| true)
    }

    /// Weakly-connected components of the subgraph formed by the edges
    /// accepted by `keep_edge`. All vertices are retained.
    pub fn components_where<F>(&self, keep_edge: F) -> Vec<Vec<NodeIndex>>
    where
        F: Fn(EdgeIndex) -> bool,
    {
        let mut sets = UnionFind::<usize>::new(self.graph.node_count());
        for e in self.graph.edge_indices() {
            if keep_edge(e) {
                let (s, t) = self.endpoints(e);
                sets.union(s.index(), t.index());
            }
        }

        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<Vec<NodeIndex>> = Vec::new();
        for v in self.ordered_vertices() {
            let root = sets.find(v.index());
            let slot = *slots.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(v);
        }
        components
    }

    /// Assign cell tracks (weakly-connected components) to every vertex.
    ///
    /// Tracks are assigned once: a graph whose vertices already carry a
    /// track id is returned unchanged.
    pub fn with_cell_tracks(mut self) -> Self {
        if self.has_cell_tracks() {
            return self;
        }
        for (track, members) in self.weak_components().into_iter().enumerate() {
            for v in members {
                self.graph[v].cell_track = Some(track as TrackId);
            }
        }
        self
    }

    /// Whether every vertex carries a cell track id.
    pub fn has_cell_tracks(&self) -> bool {
        !self.is_empty() && self.graph.node_weights().all(|v| v.cell_track.is_some())
    }

    /// Members of each cell track, keyed by track id.
    ///
    /// Uses the stored track ids when every vertex has one, and computes
    /// components on the fly otherwise.
    pub fn tracks(&self) -> BTreeMap<TrackId, Vec<NodeIndex>> {
        if self.has_cell_tracks() {
            let mut out: BTreeMap<TrackId, Vec<NodeIndex>> = BTreeMap::new();
            for v in self.ordered_vertices() {
                if let Some(track) = self.graph[v].cell_track {
                    out.entry(track).or_default().push(v);
                }
            }
            out
        } else {
            self.weak_components()
                .into_iter()
                .enumerate()
                .map(|(i, members)| (i as TrackId, members))
                .collect()
        }
    }

    // ========================================================================
    // Derived Graphs
    // ========================================================================

    /// Build a new graph containing the vertices for which `map` returns a
    /// mask id, relabeled to that id, plus every edge between them.
    ///
    /// Vertex attributes other than the mask id (including the cell track)
    /// are carried over. Returns the new graph and the old -> new index map.
    pub fn remapped<F>(&self, map: F) -> GraphResult<(LineageGraph, HashMap<NodeIndex, NodeIndex>)>
    where
        F: Fn(NodeIndex, &Vertex) -> Option<MaskId>,
    {
        let mut out = LineageGraph::new();
        let mut mapping = HashMap::new();
        for v in self.ordered_vertices() {
            let vertex = &self.graph[v];
            if let Some(mask_id) = map(v, vertex) {
                let mut copy = vertex.clone();
                copy.mask_id = mask_id;
                mapping.insert(v, out.add_vertex(copy)?);
            }
        }
        for e in self.graph.edge_references() {
            if let (Some(&s), Some(&t)) = (mapping.get(&e.source()), mapping.get(&e.target())) {
                out.add_edge(s, t, *e.weight())?;
            }
        }
        Ok((out, mapping))
    }

    /// Sub-graph induced by the vertices accepted by `keep`, ids unchanged.
    pub fn filtered<F>(&self, keep: F) -> LineageGraph
    where
        F: Fn(NodeIndex, &Vertex) -> bool,
    {
        // Keys are unique in `self`, so the identity remap cannot collide.
        self.remapped(|v, vertex| keep(v, vertex).then_some(vertex.mask_id))
            .map(|(graph, _)| graph)
            .unwrap_or_default()
    }
}
