//! Stable-edge subgraph and stable regions.
//!
//! An edge is stable when it is an unambiguous one-to-one link between
//! consecutive frames with an unchanged mask id and sufficient overlap on
//! both sides. The weakly-connected components of the stable-edge subgraph
//! are the stable regions; each vertex belongs to exactly one region
//! (isolated vertices form a region of size one).
//!
//! The analysis never touches the graph: results are returned as a
//! [`StabilityReport`] indexed by vertex and edge.

use crate::core::error::ParameterError;
use crate::core::types::Frame;
use crate::graph::structure::LineageGraph;
use petgraph::graph::{EdgeIndex, NodeIndex};

/// A weakly-connected component of the stable-edge subgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableRegion {
    /// Members in ascending `(frame, mask_id)` order.
    pub members: Vec<NodeIndex>,
    /// First frame of the region.
    pub frame_start: Frame,
    /// Last frame of the region.
    pub frame_end: Frame,
}

impl StableRegion {
    /// Number of vertices in the region.
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Derived stability attributes of a graph.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityReport {
    stable_overlap_fraction: f64,
    edge_stable: Vec<bool>,
    vertex_region: Vec<usize>,
    regions: Vec<StableRegion>,
}

impl StabilityReport {
    /// Threshold the report was computed with.
    pub fn stable_overlap_fraction(&self) -> f64 {
        self.stable_overlap_fraction
    }

    /// Whether an edge is stable.
    pub fn is_stable(&self, e: EdgeIndex) -> bool {
        self.edge_stable.get(e.index()).copied().unwrap_or(false)
    }

    /// Number of stable edges.
    pub fn stable_edge_count(&self) -> usize {
        self.edge_stable.iter().filter(|&&s| s).count()
    }

    /// The stable region containing a vertex.
    pub fn region(&self, v: NodeIndex) -> &StableRegion {
        &self.regions[self.vertex_region[v.index()]]
    }

    /// `stable_component_size` of a vertex.
    pub fn component_size(&self, v: NodeIndex) -> usize {
        self.region(v).size()
    }

    /// `stable_component_frame_start` of a vertex.
    pub fn frame_start(&self, v: NodeIndex) -> Frame {
        self.region(v).frame_start
    }

    /// `stable_component_frame_end` of a vertex.
    pub fn frame_end(&self, v: NodeIndex) -> Frame {
        self.region(v).frame_end
    }

    /// All regions, ordered by their first vertex.
    pub fn regions(&self) -> &[StableRegion] {
        &self.regions
    }

    /// Members of a vertex's region whose frame lies in `[start, end]`.
    pub fn region_window(&self, v: NodeIndex, graph: &LineageGraph, start: Frame, end: Frame) -> Vec<NodeIndex> {
        self.region(v)
            .members
            .iter()
            .copied()
            .filter(|&m| {
                let f = graph.vertex(m).frame;
                f >= start && f <= end
            })
            .collect()
    }
}

/// Computes the stable-edge subgraph of a lineage graph.
pub struct StabilityAnalyzer<'a> {
    graph: &'a LineageGraph,
}

impl<'a> StabilityAnalyzer<'a> {
    /// Create a new analyzer for the given graph.
    pub fn new(graph: &'a LineageGraph) -> Self {
        Self { graph }
    }

    /// Whether an edge is a one-to-one continuity link, ignoring overlap.
    pub fn is_provisionally_stable(&self, e: EdgeIndex) -> bool {
        let (s, t) = self.graph.endpoints(e);
        let attrs = self.graph.edge(e);
        attrs.frame_target - attrs.frame_source == 1
            && attrs.mask_id_source == attrs.mask_id_target
            && self.graph.out_degree(s) == 1
            && self.graph.in_degree(t) == 1
    }

    /// Run the analysis.
    ///
    /// Edges whose overlap fraction on either side is below
    /// `stable_overlap_fraction` are never stable.
    pub fn analyze(&self, stable_overlap_fraction: f64) -> Result<StabilityReport, ParameterError> {
        if !(0.0..=1.0).contains(&stable_overlap_fraction) {
            return Err(ParameterError::out_of_range(
                "stable_overlap_fraction",
                stable_overlap_fraction,
                "must be within [0, 1]",
            ));
        }

        let edge_stable: Vec<bool> = self
            .graph
            .edge_indices()
            .map(|e| {
                let overlap = self.graph.edge(e).overlap;
                self.is_provisionally_stable(e)
                    && overlap.fraction_source >= stable_overlap_fraction
                    && overlap.fraction_target >= stable_overlap_fraction
            })
            .collect();

        let components = self.graph.components_where(|e| edge_stable[e.index()]);
        let mut vertex_region = vec![0; self.graph.vertex_count()];
        let regions: Vec<StableRegion> = components
            .into_iter()
            .enumerate()
            .map(|(i, members)| {
                let frames = members.iter().map(|&v| self.graph.vertex(v).frame);
                let frame_start = frames.clone().min().unwrap_or(0);
                let frame_end = frames.max().unwrap_or(0);
                for &v in &members {
                    vertex_region[v.index()] = i;
                }
                StableRegion {
                    members,
                    frame_start,
                    frame_end,
                }
            })
            .collect();

        let report = StabilityReport {
            stable_overlap_fraction,
            edge_stable,
            vertex_region,
            regions,
        };
        log::debug!(
            "stability: {} of {} edges stable, {} regions",
            report.stable_edge_count(),
            self.graph.edge_count(),
            report.regions.len()
        );
        Ok(report)
    }
}
