//! Analyzers over a lineage graph and its raster.
//!
//! Each analyzer borrows its input and returns a separate result structure;
//! nothing here mutates a graph in place.

pub mod stability;
pub mod events;
pub mod selection;

pub use stability::{StabilityAnalyzer, StabilityReport, StableRegion};
pub use events::{DetectionParams, Event, EventAssignment, EventDetector, EventRecord};
pub use selection::{EventSelector, Rejection, RejectionReason, Relabeled, Relabeler, Selection, SelectionOptions};
