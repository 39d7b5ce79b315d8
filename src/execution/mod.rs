//! Orchestration around the analyzers.
//!
//! This module runs the analysis pipeline on one sample or, in parallel,
//! on many, and owns all file access.

pub mod batch;
pub mod io;
pub mod pipeline;
pub mod progress;

pub use batch::{BatchRunner, BatchSummary, Sample, SampleReport, SampleSummary};
pub use pipeline::{EventPipeline, PipelineOutput};
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
