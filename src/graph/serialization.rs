//! Graph serialization for saving and loading.
//!
//! Graphs are persisted as a node-link JSON document with the fixed vertex
//! and edge schema, optionally gzip-compressed. Loading coerces numeric
//! attributes to their documented kinds: integer attributes accept integral
//! floats (`3.0`), fraction attributes accept integers. Anything else fails
//! fast with a descriptive error before any analysis runs.

use crate::core::error::{GraphError, GraphResult, LineageResult};
use crate::core::types::{Frame, MaskId, Overlap, TrackId, Vertex};
use crate::graph::structure::LineageGraph;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Serializable representation of a vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedVertex {
    /// Frame index.
    #[serde(deserialize_with = "coerce::integer")]
    pub frame: u64,
    /// Raster label.
    #[serde(deserialize_with = "coerce::integer")]
    pub mask_id: u64,
    /// Pixel count.
    #[serde(deserialize_with = "coerce::integer")]
    pub area: u64,
    /// Cell track, if assigned.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "coerce::optional_integer"
    )]
    pub cell_track: Option<u64>,
}

/// Serializable representation of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEdge {
    /// Frame of the source vertex.
    #[serde(deserialize_with = "coerce::integer")]
    pub frame_source: u64,
    /// Frame of the target vertex.
    #[serde(deserialize_with = "coerce::integer")]
    pub frame_target: u64,
    /// Mask id of the source vertex.
    #[serde(deserialize_with = "coerce::integer")]
    pub mask_id_source: u64,
    /// Mask id of the target vertex.
    #[serde(deserialize_with = "coerce::integer")]
    pub mask_id_target: u64,
    /// Overlapping pixel count.
    #[serde(deserialize_with = "coerce::integer")]
    pub overlap_area: u64,
    /// `overlap_area / area(source)`.
    #[serde(deserialize_with = "coerce::fraction")]
    pub overlap_fraction_source: f64,
    /// `overlap_area / area(target)`.
    #[serde(deserialize_with = "coerce::fraction")]
    pub overlap_fraction_target: f64,
}

/// Serializable representation of a complete graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedGraph {
    /// Graph format version
    pub version: String,
    /// All vertices
    pub vertices: Vec<SerializedVertex>,
    /// All edges
    pub edges: Vec<SerializedEdge>,
}

impl SerializedGraph {
    /// Current format version.
    pub const VERSION: &'static str = "1.0.0";

    /// Create a new serialized graph.
    pub fn new() -> Self {
        Self {
            version: Self::VERSION.to_string(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Capture a graph. Vertices and edges are written in `(frame, mask_id)`
    /// order so that equal graphs serialize identically.
    pub fn from_graph(graph: &LineageGraph) -> Self {
        let order = graph.ordered_vertices();
        let vertices = order
            .iter()
            .map(|&v| {
                let vertex = graph.vertex(v);
                SerializedVertex {
                    frame: vertex.frame as u64,
                    mask_id: vertex.mask_id as u64,
                    area: vertex.area,
                    cell_track: vertex.cell_track.map(u64::from),
                }
            })
            .collect();

        let mut edges: Vec<SerializedEdge> = graph
            .edge_indices()
            .map(|e| {
                let attrs = graph.edge(e);
                SerializedEdge {
                    frame_source: attrs.frame_source as u64,
                    frame_target: attrs.frame_target as u64,
                    mask_id_source: attrs.mask_id_source as u64,
                    mask_id_target: attrs.mask_id_target as u64,
                    overlap_area: attrs.overlap.area,
                    overlap_fraction_source: attrs.overlap.fraction_source,
                    overlap_fraction_target: attrs.overlap.fraction_target,
                }
            })
            .collect();
        edges.sort_by_key(|e| (e.frame_source, e.mask_id_source, e.frame_target, e.mask_id_target));

        Self {
            version: Self::VERSION.to_string(),
            vertices,
            edges,
        }
    }

    /// Rebuild the graph, checking ranges and the graph invariants.
    pub fn into_graph(self) -> GraphResult<LineageGraph> {
        if self.version.split('.').next() != Self::VERSION.split('.').next() {
            return Err(GraphError::UnsupportedVersion(self.version));
        }

        let mut graph = LineageGraph::new();
        for v in self.vertices {
            let mut vertex = Vertex::new(
                narrow::<Frame>("frame", v.frame)?,
                narrow::<MaskId>("mask_id", v.mask_id)?,
                v.area,
            );
            vertex.cell_track = v
                .cell_track
                .map(|t| narrow::<TrackId>("cell_track", t))
                .transpose()?;
            graph.add_vertex(vertex)?;
        }

        for e in self.edges {
            check_fraction("overlap_fraction_source", e.overlap_fraction_source)?;
            check_fraction("overlap_fraction_target", e.overlap_fraction_target)?;
            let source = (
                narrow::<Frame>("frame_source", e.frame_source)?,
                narrow::<MaskId>("mask_id_source", e.mask_id_source)?,
            );
            let target = (
                narrow::<Frame>("frame_target", e.frame_target)?,
                narrow::<MaskId>("mask_id_target", e.mask_id_target)?,
            );
            graph.connect(
                source,
                target,
                Overlap {
                    area: e.overlap_area,
                    fraction_source: e.overlap_fraction_source,
                    fraction_target: e.overlap_fraction_target,
                },
            )?;
        }
        Ok(graph)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for SerializedGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a graph as gzip-compressed JSON.
pub fn write_graph_gz<W: Write>(graph: &LineageGraph, writer: W) -> LineageResult<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    serde_json::to_writer(&mut encoder, &SerializedGraph::from_graph(graph))?;
    encoder.finish()?;
    Ok(())
}

/// Read a graph from gzip-compressed JSON.
pub fn read_graph_gz<R: Read>(reader: R) -> LineageResult<LineageGraph> {
    let serialized: SerializedGraph = serde_json::from_reader(GzDecoder::new(reader))?;
    Ok(serialized.into_graph()?)
}

fn narrow<T: TryFrom<u64>>(attribute: &str, value: u64) -> GraphResult<T> {
    T::try_from(value).map_err(|_| GraphError::InvalidAttribute {
        attribute: attribute.to_string(),
        reason: format!("{} does not fit in 32 bits", value),
    })
}

fn check_fraction(attribute: &str, value: f64) -> GraphResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GraphError::InvalidAttribute {
            attribute: attribute.to_string(),
            reason: format!("{} is not a non-negative finite number", value),
        })
    }
}

/// Lenient numeric deserializers for attributes written by other tools.
mod coerce {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct IntegerVisitor;

    impl<'de> Visitor<'de> for IntegerVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("expected a non-negative integer, found {}", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
                Ok(v as u64)
            } else {
                Err(E::custom(format!("expected a non-negative integer, found {}", v)))
            }
        }
    }

    struct FractionVisitor;

    impl<'de> Visitor<'de> for FractionVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }
    }

    pub fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(IntegerVisitor)
    }

    pub fn optional_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        struct OptionalVisitor;

        impl<'de> Visitor<'de> for OptionalVisitor {
            type Value = Option<u64>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or null")
            }

            fn visit_none<E: de::Error>(self) -> Result<Option<u64>, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Option<u64>, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Option<u64>, D::Error> {
                integer(d).map(Some)
            }
        }

        deserializer.deserialize_option(OptionalVisitor)
    }

    pub fn fraction<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FractionVisitor)
    }
}
