//! Cell-track topology simplification and classification.
//!
//! A track is reduced to its branching skeleton by contracting every
//! unbranched (in-degree 1, out-degree 1) vertex. Self-loops are dropped and
//! each parallel edge beyond the first is split by a synthetic vertex, so the
//! skeleton is always a simple directed graph without attributes. Tracks
//! whose skeletons are isomorphic share a topology.

use crate::core::types::TrackId;
use crate::graph::structure::LineageGraph;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Structure-only skeleton of a track.
pub type TopologyGraph = DiGraph<(), ()>;

/// Reduce the vertices `members` of `graph` to their skeleton.
pub fn simplify(graph: &LineageGraph, members: &[NodeIndex]) -> TopologyGraph {
    let mut skeleton: StableDiGraph<(), ()> = StableDiGraph::new();
    let mut index = HashMap::with_capacity(members.len());
    for &v in members {
        index.insert(v, skeleton.add_node(()));
    }
    for &v in members {
        for w in graph.successors(v) {
            if let (Some(&a), Some(&b)) = (index.get(&v), index.get(&w)) {
                skeleton.add_edge(a, b, ());
            }
        }
    }

    contract_chains(&mut skeleton);
    drop_self_loops(&mut skeleton);
    split_parallel_edges(&mut skeleton);
    TopologyGraph::from(skeleton)
}

fn contract_chains(skeleton: &mut StableDiGraph<(), ()>) {
    loop {
        let next = skeleton.node_indices().find(|&v| {
            let pred = single_neighbour(skeleton, v, Direction::Incoming);
            let succ = single_neighbour(skeleton, v, Direction::Outgoing);
            matches!((pred, succ), (Some(p), Some(s)) if p != v && s != v)
        });
        let Some(v) = next else { break };

        let pred = skeleton.neighbors_directed(v, Direction::Incoming).next();
        let succ = skeleton.neighbors_directed(v, Direction::Outgoing).next();
        skeleton.remove_node(v);
        if let (Some(p), Some(s)) = (pred, succ) {
            skeleton.add_edge(p, s, ());
        }
    }
}

/// The only neighbour in `dir` when there is exactly one edge that way.
fn single_neighbour(
    skeleton: &StableDiGraph<(), ()>,
    v: NodeIndex,
    dir: Direction,
) -> Option<NodeIndex> {
    let mut neighbours = skeleton.neighbors_directed(v, dir);
    let first = neighbours.next()?;
    if neighbours.next().is_some() {
        return None;
    }
    Some(first)
}

fn drop_self_loops(skeleton: &mut StableDiGraph<(), ()>) {
    let loops: Vec<_> = skeleton
        .edge_references()
        .filter(|e| e.source() == e.target())
        .map(|e| e.id())
        .collect();
    for e in loops {
        skeleton.remove_edge(e);
    }
}

fn split_parallel_edges(skeleton: &mut StableDiGraph<(), ()>) {
    let mut by_pair: BTreeMap<(NodeIndex, NodeIndex), Vec<_>> = BTreeMap::new();
    for e in skeleton.edge_references() {
        by_pair.entry((e.source(), e.target())).or_default().push(e.id());
    }
    for ((s, t), edges) in by_pair {
        for &e in edges.iter().skip(1) {
            skeleton.remove_edge(e);
            let mid = skeleton.add_node(());
            skeleton.add_edge(s, mid, ());
            skeleton.add_edge(mid, t, ());
        }
    }
}

/// Shape statistics of a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Complexity {
    /// Vertices with in-degree ≥ 2.
    pub n_fusions: usize,
    /// Vertices with out-degree ≥ 2.
    pub n_divisions: usize,
    /// Vertices with in- or out-degree > 2.
    pub n_anomalies: usize,
    /// Vertices of the skeleton.
    pub n_vertices: usize,
}

impl Complexity {
    pub fn of(skeleton: &TopologyGraph) -> Self {
        let mut out = Complexity {
            n_fusions: 0,
            n_divisions: 0,
            n_anomalies: 0,
            n_vertices: skeleton.node_count(),
        };
        for v in skeleton.node_indices() {
            let d_in = skeleton.edges_directed(v, Direction::Incoming).count();
            let d_out = skeleton.edges_directed(v, Direction::Outgoing).count();
            out.n_fusions += usize::from(d_in >= 2);
            out.n_divisions += usize::from(d_out >= 2);
            out.n_anomalies += usize::from(d_in > 2 || d_out > 2);
        }
        out
    }

    /// Fusions plus divisions.
    pub fn n_events(&self) -> usize {
        self.n_fusions + self.n_divisions
    }

    /// Display order key, ascending = simpler.
    pub fn sort_key(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.n_events(),
            self.n_fusions,
            self.n_divisions,
            self.n_anomalies,
            self.n_vertices,
        )
    }
}

/// Equivalence test between skeletons.
pub trait IsomorphismCheck {
    fn is_isomorphic(&self, a: &TopologyGraph, b: &TopologyGraph) -> bool;
}

/// Exact directed isomorphism (VF2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Vf2Isomorphism;

impl IsomorphismCheck for Vf2Isomorphism {
    fn is_isomorphic(&self, a: &TopologyGraph, b: &TopologyGraph) -> bool {
        a.node_count() == b.node_count()
            && a.edge_count() == b.edge_count()
            && petgraph::algo::is_isomorphic(a, b)
    }
}

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Representative skeleton.
    pub graph: TopologyGraph,
    /// Shape statistics of the skeleton.
    pub complexity: Complexity,
    /// Tracks assigned to this entry.
    pub tracks: Vec<TrackId>,
}

/// How a track was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyMatch {
    /// Indices into the catalog.
    Catalog(Vec<usize>),
    /// Too many events or anomalies to be catalogued.
    Complex(Complexity),
}

/// Catalog of the topologies of a graph's tracks.
#[derive(Debug, Clone, Default)]
pub struct TopologyClassification {
    /// Distinct topologies, simplest first.
    pub topologies: Vec<Topology>,
    /// Classification of each track.
    pub assignments: BTreeMap<TrackId, TopologyMatch>,
}

impl TopologyClassification {
    /// Tracks matching at least one of the `wanted` catalog indices.
    pub fn tracks_matching(&self, wanted: &BTreeSet<usize>) -> Vec<TrackId> {
        self.assignments
            .iter()
            .filter(|(_, m)| match m {
                TopologyMatch::Catalog(indices) => indices.iter().any(|i| wanted.contains(i)),
                TopologyMatch::Complex(_) => false,
            })
            .map(|(&track, _)| track)
            .collect()
    }

    /// Tracks left out of the catalog.
    pub fn complex_tracks(&self) -> Vec<TrackId> {
        self.assignments
            .iter()
            .filter(|(_, m)| matches!(m, TopologyMatch::Complex(_)))
            .map(|(&track, _)| track)
            .collect()
    }
}

/// Groups cell tracks by skeleton.
pub struct TopologyClassifier<C: IsomorphismCheck = Vf2Isomorphism> {
    max_events: usize,
    max_anomalies: usize,
    checker: C,
}

impl TopologyClassifier<Vf2Isomorphism> {
    /// Classifier with exact isomorphism.
    pub fn new(max_events: usize, max_anomalies: usize) -> Self {
        Self::with_checker(max_events, max_anomalies, Vf2Isomorphism)
    }
}

impl<C: IsomorphismCheck> TopologyClassifier<C> {
    /// Classifier with a custom equivalence.
    pub fn with_checker(max_events: usize, max_anomalies: usize, checker: C) -> Self {
        Self {
            max_events,
            max_anomalies,
            checker,
        }
    }

    /// Whether a skeleton is simple enough for the catalog.
    pub fn admits(&self, complexity: &Complexity) -> bool {
        complexity.n_events() <= self.max_events && complexity.n_anomalies <= self.max_anomalies
    }

    /// Classify every cell track of `graph`.
    pub fn classify(&self, graph: &LineageGraph) -> TopologyClassification {
        let mut catalog: Vec<Topology> = Vec::new();
        let mut assignments = BTreeMap::new();

        for (track, members) in graph.tracks() {
            let skeleton = simplify(graph, &members);
            let complexity = Complexity::of(&skeleton);
            if !self.admits(&complexity) {
                assignments.insert(track, TopologyMatch::Complex(complexity));
                continue;
            }

            let mut matches: Vec<usize> = catalog
                .iter()
                .enumerate()
                .filter(|(_, t)| self.checker.is_isomorphic(&t.graph, &skeleton))
                .map(|(i, _)| i)
                .collect();
            if matches.is_empty() {
                matches.push(catalog.len());
                catalog.push(Topology {
                    graph: skeleton,
                    complexity,
                    tracks: Vec::new(),
                });
            }
            for &i in &matches {
                catalog[i].tracks.push(track);
            }
            assignments.insert(track, TopologyMatch::Catalog(matches));
        }

        // Simplest first; ties keep discovery order.
        let mut order: Vec<usize> = (0..catalog.len()).collect();
        order.sort_by_key(|&i| catalog[i].complexity.sort_key());
        let mut rank = vec![0; catalog.len()];
        for (new, &old) in order.iter().enumerate() {
            rank[old] = new;
        }
        for m in assignments.values_mut() {
            if let TopologyMatch::Catalog(indices) = m {
                for i in indices.iter_mut() {
                    *i = rank[*i];
                }
                indices.sort_unstable();
            }
        }
        let mut slots: Vec<Option<Topology>> = catalog.into_iter().map(Some).collect();
        let topologies = order.iter().filter_map(|&i| slots[i].take()).collect();

        let classification = TopologyClassification {
            topologies,
            assignments,
        };
        log::debug!(
            "classified {} tracks into {} topologies ({} complex)",
            classification.assignments.len(),
            classification.topologies.len(),
            classification.complex_tracks().len()
        );
        classification
    }
}
