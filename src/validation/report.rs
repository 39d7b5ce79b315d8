//! Validation findings and the report that collects them.

use crate::core::error::{IntegrityError, LineageError, LineageResult, MaskError};
use crate::core::types::{Frame, MaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A finding that blocks analysis.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Mask(#[from] MaskError),
}

impl ValidationError {
    /// Whether validation should stop at this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ValidationError::Mask(_) | ValidationError::Integrity(IntegrityError::FrameBeyondMask { .. })
        )
    }

    /// Get suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ValidationError::Integrity(IntegrityError::MissingPixels { frame, mask_id }) => Some(format!(
                "Check that the graph and the mask come from the same tracking run (frame {}, mask_id {})",
                frame, mask_id
            )),
            ValidationError::Integrity(IntegrityError::OrphanLabel { frame, label }) => Some(format!(
                "Remove label {} from frame {} or add its vertex to the graph",
                label, frame
            )),
            ValidationError::Integrity(IntegrityError::FrameBeyondMask { n_frames, .. }) => Some(format!(
                "The mask has {} frames; check that it was not cropped in time",
                n_frames
            )),
            ValidationError::Mask(_) => None,
        }
    }

    /// Frame the error refers to, if any.
    pub fn frame(&self) -> Option<Frame> {
        match self {
            ValidationError::Integrity(e) => Some(e.frame()),
            ValidationError::Mask(MaskError::FrameOutOfRange { frame, .. }) => Some(*frame),
            ValidationError::Mask(_) => None,
        }
    }
}

/// Non-fatal validation warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Warning message.
    pub message: String,
    /// Frame that triggered the warning, if applicable.
    pub frame: Option<Frame>,
    /// Mask id that triggered the warning, if applicable.
    pub mask_id: Option<MaskId>,
    /// Suggestion for addressing the warning.
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frame: None,
            mask_id: None,
            suggestion: None,
        }
    }

    pub fn at(mut self, frame: Frame, mask_id: Option<MaskId>) -> Self {
        self.frame = Some(frame);
        self.mask_id = mask_id;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Comprehensive validation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether validation passed without errors.
    pub success: bool,
    /// List of errors found.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<ValidationWarning>,
    /// Time taken for validation in milliseconds.
    pub duration_ms: u64,
}

impl ValidationReport {
    /// Create a new empty report (success).
    pub fn new() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, error: ValidationError) {
        self.success = false;
        self.errors.push(error);
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Whether analysis can run on the validated pair.
    pub fn can_proceed(&self) -> bool {
        self.success
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.success {
            if self.warnings.is_empty() {
                "✓ Graph and mask are consistent".to_string()
            } else {
                format!("✓ Graph and mask are consistent with {} warning(s)", self.warnings.len())
            }
        } else {
            format!("✗ Validation failed with {} error(s)", self.errors.len())
        }
    }

    /// Get detailed error messages with suggestions.
    pub fn detailed_errors(&self) -> Vec<String> {
        self.errors
            .iter()
            .enumerate()
            .map(|(i, error)| {
                let mut msg = format!("{}. {}", i + 1, error);
                if let Some(fix) = error.suggested_fix() {
                    msg.push_str(&format!("\n   → Suggestion: {}", fix));
                }
                msg
            })
            .collect()
    }

    /// The report itself when it passed, otherwise a [`LineageError::Validation`].
    pub fn into_result(self) -> LineageResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(LineageError::Validation(self))
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}
