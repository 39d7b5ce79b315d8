//! Core types for the lineage analysis system.
//!
//! This module contains the foundational types shared by every analyzer:
//! - Value types (frames, mask ids, vertices, overlaps, event kinds)
//! - The labeled raster that accompanies a lineage graph
//! - Error types

pub mod types;
pub mod mask;
pub mod error;

// Re-export commonly used types
pub use types::{BranchProximity, EdgeAttributes, EventId, EventKind, Frame, MaskId, Overlap, TrackId, Vertex};
pub use mask::{LabelLut, LabelMask};
pub use error::{BatchError, GraphError, IntegrityError, LineageError, MaskError, ParameterError};
