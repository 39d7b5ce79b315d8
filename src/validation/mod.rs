//! Validation module for pre-analysis checking.
//!
//! The validation pipeline runs before analysis to catch malformed or
//! inconsistent graph/raster pairs early.

pub mod pipeline;
pub mod report;
pub mod stages;

pub use pipeline::ValidationPipeline;
pub use report::{ValidationError, ValidationReport, ValidationWarning};
pub use stages::{
    FrameRangeValidation, MaskConsistency, OverlapConsistency, RegionConnectivity, ValidationStage,
};
