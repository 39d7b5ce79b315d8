//! Core value types shared by the graph, the raster and the analyzers.
//!
//! Vertices and edges carry only the persisted schema. Everything derived
//! during analysis (stability flags, event ids, topology indices) lives in
//! the result structures returned by the analyzers.

use crate::core::error::ParameterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame (time point) index.
pub type Frame = u32;

/// Raster label of a segmented region. `0` is background.
pub type MaskId = u32;

/// Identifier of an accepted event. `0` means "no event".
pub type EventId = u32;

/// Identifier of a cell track (weakly-connected component).
pub type TrackId = u32;

/// Marker for "not part of any event".
pub const NO_EVENT: EventId = 0;

/// Background label of the raster.
pub const BACKGROUND: MaskId = 0;

/// One segmented cell instance in one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    /// Frame index.
    pub frame: Frame,
    /// Raster label, unique within `frame`.
    pub mask_id: MaskId,
    /// Pixel count of the region.
    pub area: u64,
    /// Cell track id, assigned once per graph.
    pub cell_track: Option<TrackId>,
}

impl Vertex {
    /// Create a vertex without a cell track.
    pub fn new(frame: Frame, mask_id: MaskId, area: u64) -> Self {
        Self {
            frame,
            mask_id,
            area,
            cell_track: None,
        }
    }

    /// Natural key of the vertex.
    pub fn key(&self) -> (Frame, MaskId) {
        (self.frame, self.mask_id)
    }
}

/// Overlap measurements stored on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Overlap {
    /// Number of overlapping pixels.
    pub area: u64,
    /// `area / area(source)`.
    pub fraction_source: f64,
    /// `area / area(target)`.
    pub fraction_target: f64,
}

impl Overlap {
    /// Build overlap fractions from raw pixel counts.
    pub fn from_areas(overlap_area: u64, area_source: u64, area_target: u64) -> Self {
        let fraction = |area: u64| {
            if area == 0 {
                0.0
            } else {
                overlap_area as f64 / area as f64
            }
        };
        Self {
            area: overlap_area,
            fraction_source: fraction(area_source),
            fraction_target: fraction(area_target),
        }
    }

    /// Full overlap on both sides.
    pub fn full(area: u64) -> Self {
        Self::from_areas(area, area, area)
    }
}

/// Edge attributes as seen from outside the graph: the overlap plus the
/// endpoint keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeAttributes {
    /// Frame of the source vertex.
    pub frame_source: Frame,
    /// Frame of the target vertex.
    pub frame_target: Frame,
    /// Mask id of the source vertex.
    pub mask_id_source: MaskId,
    /// Mask id of the target vertex.
    pub mask_id_target: MaskId,
    /// Overlap measurements.
    pub overlap: Overlap,
}

impl EdgeAttributes {
    /// Number of frames skipped by this edge.
    pub fn missing_frames(&self) -> u32 {
        self.frame_target
            .saturating_sub(self.frame_source)
            .saturating_sub(1)
    }
}

/// Kind of lineage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Two cells merging into one.
    Fusion,
    /// One cell splitting into two.
    Division,
}

impl EventKind {
    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Fusion => "fusion",
            EventKind::Division => "division",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fusion" => Ok(EventKind::Fusion),
            "division" => Ok(EventKind::Division),
            _ => Err(ParameterError::UnknownEventKind(s.to_string())),
        }
    }
}

/// How close another branching event may be to a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchProximity {
    /// Only the candidate's immediate neighbours must be unbranched.
    #[default]
    Immediate,
    /// Every vertex inside the before/after windows must be unbranched too.
    Window,
}
