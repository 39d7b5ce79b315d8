//! # Cell Lineage - Event Analysis for Cell-Tracking Data
//!
//! Cell Lineage works on the output of a cell-tracking step: a directed
//! lineage graph whose vertices are segmented cells (one per frame and mask
//! id) plus the labeled raster those ids refer to.
//!
//! ## Features
//!
//! - **Stability Analysis**: Find maximal unbranched stretches of the lineage
//! - **Event Detection**: Locate fusions or divisions with stable neighbourhoods
//! - **Selection**: Drop border and gap events, relabel graph and raster together
//! - **Topology Classification**: Group cell tracks by their simplified shape
//! - **Batch Processing**: Run many samples in parallel with progress reporting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cell_lineage::prelude::*;
//!
//! let graph = load_graph("sample.graphmlz")?;
//! let mask = load_mask("sample.npy")?;
//!
//! let config = PipelineConfig::default()
//!     .with_events(DetectionParams::new(EventKind::Division).with_stability(3, 2));
//! let output = EventPipeline::new(config).run(&graph, &mask)?;
//!
//! save_records("sample_events.tsv", &output.records)?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Value types, the label raster and error handling
//! - [`graph`]: Lineage graph structure, storage, tracks and topologies
//! - [`analysis`]: Stability analysis, event detection and selection
//! - [`validation`]: Multi-stage checks of a graph/raster pair
//! - [`execution`]: Single-sample pipeline, batch runner and file I/O
//! - [`config`]: TOML pipeline configuration

#![warn(clippy::all)]

pub mod analysis;
pub mod config;
pub mod core;
pub mod execution;
pub mod graph;
pub mod validation;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use cell_lineage::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{
        BranchProximity, EdgeAttributes, EventId, EventKind, Frame, MaskId, Overlap, TrackId,
        Vertex, BACKGROUND, NO_EVENT,
    };
    pub use crate::core::mask::{LabelLut, LabelMask};

    // Errors
    pub use crate::core::error::{
        BatchError, GraphError, IntegrityError, LineageError, LineageResult, MaskError,
        ParameterError,
    };

    // Graph
    pub use crate::graph::structure::LineageGraph;
    pub use crate::graph::serialization::SerializedGraph;
    pub use crate::graph::tracks::{CellTrack, CellTrackFilter};
    pub use crate::graph::topology::{
        Complexity, Topology, TopologyClassification, TopologyClassifier, TopologyMatch,
    };

    // Analysis
    pub use crate::analysis::stability::{StabilityAnalyzer, StabilityReport};
    pub use crate::analysis::events::{
        DetectionParams, Event, EventAssignment, EventDetector, EventRecord,
    };
    pub use crate::analysis::selection::{EventSelector, Relabeler, Selection, SelectionOptions};

    // Validation
    pub use crate::validation::pipeline::ValidationPipeline;
    pub use crate::validation::report::{ValidationError, ValidationReport, ValidationWarning};
    pub use crate::validation::stages::ValidationStage;

    // Execution
    pub use crate::execution::batch::{BatchRunner, BatchSummary, Sample};
    pub use crate::execution::io::{load_graph, load_mask, save_graph, save_mask, save_records};
    pub use crate::execution::pipeline::{EventPipeline, PipelineOutput};
    pub use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};

    // Configuration
    pub use crate::config::PipelineConfig;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
