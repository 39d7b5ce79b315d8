//! Error types for the lineage core.
//!
//! Uses thiserror for structured errors with context. Errors are grouped by
//! the taxonomy the pipeline reports to its caller:
//! - input malformation of the graph ([`GraphError`]) or raster ([`MaskError`])
//! - inconsistencies between graph and raster ([`IntegrityError`])
//! - rejected parameters ([`ParameterError`])
//! - orchestration failures ([`BatchError`])

use crate::core::types::{Frame, MaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::report::ValidationReport;

/// Top-level error type.
///
/// Wraps every concern-specific error so callers can use `?` across the
/// whole pipeline.
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Mask error: {0}")]
    Mask(#[from] MaskError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Invalid parameter: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Validation failed: {}", .0.summary())]
    Validation(ValidationReport),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Malformed or inconsistent graph input.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphError {
    #[error("Vertex (frame {frame}, mask_id {mask_id}) already exists")]
    DuplicateVertex { frame: Frame, mask_id: MaskId },

    #[error("Vertex at frame {frame} has mask_id 0, which is reserved for background")]
    BackgroundMaskId { frame: Frame },

    #[error("Vertex (frame {frame}, mask_id {mask_id}) not found")]
    VertexNotFound { frame: Frame, mask_id: MaskId },

    #[error("Edge from frame {frame_source} to frame {frame_target} does not point forward in time")]
    BackwardEdge {
        frame_source: Frame,
        frame_target: Frame,
    },

    #[error("Duplicate edge (frame {frame_source}, mask_id {mask_id_source}) -> (frame {frame_target}, mask_id {mask_id_target})")]
    DuplicateEdge {
        frame_source: Frame,
        mask_id_source: MaskId,
        frame_target: Frame,
        mask_id_target: MaskId,
    },

    #[error("Attribute '{attribute}' is invalid: {reason}")]
    InvalidAttribute { attribute: String, reason: String },

    #[error("Unsupported graph format version '{0}'")]
    UnsupportedVersion(String),

    #[error("Malformed GraphML: {0}")]
    Markup(String),
}

/// Malformed raster input.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaskError {
    #[error("Mask must have 3 dimensions (time, y, x), got {ndim}")]
    UnsupportedShape { ndim: usize },

    #[error("Unsupported mask dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Mask value {value} cannot be represented as an unsigned 32-bit label")]
    LabelOutOfRange { value: i64 },

    #[error("Frame {frame} is outside the mask ({n_frames} frames)")]
    FrameOutOfRange { frame: Frame, n_frames: usize },

    #[error("NumPy array I/O failed: {0}")]
    Npy(String),

    #[error("Mask data has {len} elements but shape {shape:?} needs {expected}")]
    ShapeMismatch {
        shape: (usize, usize, usize),
        len: usize,
        expected: usize,
    },
}

/// Graph and raster disagree.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IntegrityError {
    #[error("mask_id {mask_id} at frame {frame} has no pixels in the raster")]
    MissingPixels { frame: Frame, mask_id: MaskId },

    #[error("Raster label {label} at frame {frame} has no vertex in the graph")]
    OrphanLabel { frame: Frame, label: MaskId },

    #[error("Graph references frame {frame} but the mask has {n_frames} frames")]
    FrameBeyondMask { frame: Frame, n_frames: usize },
}

/// Rejected parameter value.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterError {
    #[error("Unknown event kind '{0}' (expected 'fusion' or 'division')")]
    UnknownEventKind(String),

    #[error("Parameter '{parameter}' = {value} is out of range: {reason}")]
    OutOfRange {
        parameter: String,
        value: String,
        reason: String,
    },
}

impl ParameterError {
    /// Shorthand for an out-of-range value.
    pub fn out_of_range(
        parameter: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ParameterError::OutOfRange {
            parameter: parameter.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending parameter.
    pub fn parameter(&self) -> &str {
        match self {
            ParameterError::UnknownEventKind(_) => "kind",
            ParameterError::OutOfRange { parameter, .. } => parameter,
        }
    }
}

/// Errors of the batch orchestration layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("Invalid input pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("No input files found matching pattern: {pattern}")]
    NoInputsFound { pattern: String },

    #[error("Graph file missing for mask {mask}: expected {graph}")]
    MissingGraph { mask: String, graph: String },

    #[error("Batch cancelled after processing {completed}/{total} samples")]
    Cancelled { completed: usize, total: usize },
}

// ============================================================================
// Error Utilities
// ============================================================================

impl LineageError {
    /// Whether other independent inputs can still be processed after this
    /// error. Everything except cancellation is scoped to a single input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LineageError::Batch(BatchError::Cancelled { .. }))
    }

    /// Whether the error is caused by the input data rather than by the
    /// caller's parameters or the environment.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            LineageError::Graph(_)
                | LineageError::Mask(_)
                | LineageError::Integrity(_)
                | LineageError::Validation(_)
        )
    }
}

impl IntegrityError {
    /// Frame the inconsistency was found in.
    pub fn frame(&self) -> Frame {
        match self {
            IntegrityError::MissingPixels { frame, .. }
            | IntegrityError::OrphanLabel { frame, .. }
            | IntegrityError::FrameBeyondMask { frame, .. } => *frame,
        }
    }
}

/// Result type alias for top-level operations.
pub type LineageResult<T> = Result<T, LineageError>;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for raster operations.
pub type MaskResult<T> = Result<T, MaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_error_names_parameter() {
        let err = ParameterError::out_of_range("stable_overlap_fraction", 1.5, "must be in [0, 1]");
        assert_eq!(err.parameter(), "stable_overlap_fraction");
        assert!(err.to_string().contains("1.5"));

        let err = ParameterError::UnknownEventKind("merge".to_string());
        assert_eq!(err.parameter(), "kind");
    }

    #[test]
    fn test_recoverability() {
        let err: LineageError = IntegrityError::MissingPixels { frame: 2, mask_id: 7 }.into();
        assert!(err.is_recoverable());
        assert!(err.is_data_error());

        let err: LineageError = BatchError::Cancelled { completed: 1, total: 3 }.into();
        assert!(!err.is_recoverable());
        assert!(!err.is_data_error());
    }

    #[test]
    fn test_integrity_error_frame() {
        let err = IntegrityError::OrphanLabel { frame: 4, label: 9 };
        assert_eq!(err.frame(), 4);
        assert!(err.to_string().contains("label 9"));
    }
}
