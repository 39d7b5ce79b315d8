//! Lineage graph module.
//!
//! A lineage graph is a directed graph whose vertices are segmented cells
//! (one per frame and mask id) and whose edges are overlap links pointing
//! forward in time.

pub mod structure;
pub mod serialization;
pub mod graphml;
pub mod tracks;
pub mod topology;

// Re-export commonly used types
pub use structure::LineageGraph;
pub use serialization::{read_graph_gz, write_graph_gz, SerializedGraph};
pub use graphml::{read_graphml, read_graphml_gz, write_graphml, write_graphml_gz};
pub use tracks::{CellTrack, CellTrackFilter};
pub use topology::{
    simplify, Complexity, IsomorphismCheck, Topology, TopologyClassification, TopologyClassifier,
    TopologyGraph, TopologyMatch, Vf2Isomorphism,
};
