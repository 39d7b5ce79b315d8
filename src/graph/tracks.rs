//! Cell-track summaries and track-level filters.
//!
//! A cell track is a weakly-connected component of the lineage graph. The
//! summaries here are what a browser lists per track; the filter selects
//! tracks before topology browsing or export.

use crate::core::error::MaskResult;
use crate::core::mask::LabelMask;
use crate::core::types::{Frame, MaskId, TrackId};
use crate::graph::structure::LineageGraph;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Aggregate record of one cell track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTrack {
    /// Track id.
    pub id: TrackId,
    /// Distinct mask ids used by the track.
    pub mask_ids: BTreeSet<MaskId>,
    /// First frame.
    pub frame_min: Frame,
    /// Last frame.
    pub frame_max: Frame,
    /// Number of vertices.
    pub n_vertices: usize,
    /// Sum of skipped frames over the track's edges.
    pub n_missing: u32,
    /// Number of fusion-shaped vertices.
    pub n_fusions: usize,
    /// Number of division-shaped vertices.
    pub n_divisions: usize,
    /// Smallest vertex area.
    pub min_area: u64,
    /// Largest vertex area.
    pub max_area: u64,
    /// Frames of the fusion vertices.
    pub fusion_frames: Vec<Frame>,
    /// Frames of the division vertices.
    pub division_frames: Vec<Frame>,
}

impl CellTrack {
    /// Summarize every track of the graph, in track id order.
    pub fn summarize(graph: &LineageGraph) -> Vec<CellTrack> {
        graph
            .tracks()
            .into_iter()
            .filter_map(|(id, members)| Self::from_members(graph, id, &members))
            .collect()
    }

    fn from_members(graph: &LineageGraph, id: TrackId, members: &[NodeIndex]) -> Option<CellTrack> {
        let first = graph.vertex(*members.first()?);
        let mut track = CellTrack {
            id,
            mask_ids: BTreeSet::new(),
            frame_min: first.frame,
            frame_max: first.frame,
            n_vertices: members.len(),
            n_missing: 0,
            n_fusions: 0,
            n_divisions: 0,
            min_area: first.area,
            max_area: first.area,
            fusion_frames: Vec::new(),
            division_frames: Vec::new(),
        };

        for &v in members {
            let vertex = graph.vertex(v);
            track.mask_ids.insert(vertex.mask_id);
            track.frame_min = track.frame_min.min(vertex.frame);
            track.frame_max = track.frame_max.max(vertex.frame);
            track.min_area = track.min_area.min(vertex.area);
            track.max_area = track.max_area.max(vertex.area);
            // Every edge is counted once, from its source.
            track.n_missing += graph.missing_frames(graph.out_edges(v));
            if graph.is_fusion(v) {
                track.n_fusions += 1;
                track.fusion_frames.push(vertex.frame);
            }
            if graph.is_division(v) {
                track.n_divisions += 1;
                track.division_frames.push(vertex.frame);
            }
        }
        Some(track)
    }

    /// Number of frames spanned, inclusive.
    pub fn n_frames(&self) -> u32 {
        self.frame_max - self.frame_min + 1
    }
}

/// Track-level filter. Unset criteria accept everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellTrackFilter {
    /// Maximum number of skipped frames.
    pub max_missing: Option<u32>,
    /// Minimum number of spanned frames.
    pub min_frames: Option<u32>,
    /// Maximum number of fusions.
    pub max_fusions: Option<usize>,
    /// Maximum number of divisions.
    pub max_divisions: Option<usize>,
    /// Reject tracks with any region within this many pixels of the border.
    pub border_width: Option<usize>,
}

impl CellTrackFilter {
    /// Create a filter that accepts every track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of skipped frames.
    pub fn with_max_missing(mut self, max_missing: u32) -> Self {
        self.max_missing = Some(max_missing);
        self
    }

    /// Set the minimum span in frames.
    pub fn with_min_frames(mut self, min_frames: u32) -> Self {
        self.min_frames = Some(min_frames);
        self
    }

    /// Set the maximum fusion and division counts.
    pub fn with_max_events(mut self, max_fusions: usize, max_divisions: usize) -> Self {
        self.max_fusions = Some(max_fusions);
        self.max_divisions = Some(max_divisions);
        self
    }

    /// Reject tracks touching the border.
    pub fn with_border_width(mut self, width: usize) -> Self {
        self.border_width = Some(width);
        self
    }

    /// Whether a track passes the graph-only criteria.
    pub fn accepts(&self, track: &CellTrack) -> bool {
        self.max_missing.map_or(true, |m| track.n_missing <= m)
            && self.min_frames.map_or(true, |m| track.n_frames() >= m)
            && self.max_fusions.map_or(true, |m| track.n_fusions <= m)
            && self.max_divisions.map_or(true, |m| track.n_divisions <= m)
    }

    /// Ids of the tracks passing every criterion.
    pub fn select(&self, graph: &LineageGraph, mask: &LabelMask) -> MaskResult<BTreeSet<TrackId>> {
        let tracks = graph.tracks();
        let touching = match self.border_width {
            Some(width) => border_tracks(graph, mask, &tracks, width)?,
            None => HashSet::new(),
        };

        let selected: BTreeSet<TrackId> = CellTrack::summarize(graph)
            .into_iter()
            .filter(|t| self.accepts(t) && !touching.contains(&t.id))
            .map(|t| t.id)
            .collect();
        log::debug!(
            "track filter kept {} of {} tracks",
            selected.len(),
            tracks.len()
        );
        Ok(selected)
    }
}

/// Tracks with at least one vertex whose region lies within `width` pixels
/// of the border.
fn border_tracks(
    graph: &LineageGraph,
    mask: &LabelMask,
    tracks: &std::collections::BTreeMap<TrackId, Vec<NodeIndex>>,
    width: usize,
) -> MaskResult<HashSet<TrackId>> {
    let mut per_frame: HashMap<Frame, HashSet<MaskId>> = HashMap::new();
    let mut out = HashSet::new();
    for (&id, members) in tracks {
        for &v in members {
            let vertex = graph.vertex(v);
            if !per_frame.contains_key(&vertex.frame) {
                let labels = mask.labels_touching_border(vertex.frame, width)?;
                per_frame.insert(vertex.frame, labels);
            }
            if per_frame[&vertex.frame].contains(&vertex.mask_id) {
                out.insert(id);
                break;
            }
        }
    }
    Ok(out)
}
