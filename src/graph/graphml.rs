//! GraphML storage.
//!
//! Tracking tools usually persist lineage graphs as (gzip-compressed)
//! GraphML. Vertices carry `frame`, `mask_id`, `area` and optionally
//! `cell_track`; edges carry `overlap_area`, `overlap_fraction_source` and
//! `overlap_fraction_target`. The endpoint attributes (`frame_source`,
//! `mask_id_target`, ...) are written for every edge but may be omitted on
//! input, in which case they are taken from the endpoint nodes.
//!
//! Values are read as text and coerced to the documented kinds before the
//! graph is rebuilt through [`SerializedGraph::into_graph`], so both storage
//! formats enforce the same checks.

use crate::core::error::{GraphError, GraphResult, LineageResult};
use crate::graph::serialization::{SerializedEdge, SerializedGraph, SerializedVertex};
use crate::graph::structure::LineageGraph;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::fmt::Display;
use std::io::{BufRead, BufReader, Read, Write};

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

/// Declared attributes: name, domain and GraphML type.
const KEYS: [(&str, &str, &str); 11] = [
    ("frame", "node", "long"),
    ("mask_id", "node", "long"),
    ("area", "node", "long"),
    ("cell_track", "node", "long"),
    ("frame_source", "edge", "long"),
    ("frame_target", "edge", "long"),
    ("mask_id_source", "edge", "long"),
    ("mask_id_target", "edge", "long"),
    ("overlap_area", "edge", "long"),
    ("overlap_fraction_source", "edge", "double"),
    ("overlap_fraction_target", "edge", "double"),
];

// ============================================================================
// Writing
// ============================================================================

/// Write a graph as a GraphML document.
pub fn write_graphml<W: Write>(graph: &LineageGraph, writer: W) -> LineageResult<()> {
    let mut xml = Writer::new_with_indent(writer, b' ', 2);
    write_document(&mut xml, &SerializedGraph::from_graph(graph)).map_err(markup)?;
    Ok(())
}

/// Write a graph as gzip-compressed GraphML.
pub fn write_graphml_gz<W: Write>(graph: &LineageGraph, writer: W) -> LineageResult<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    write_graphml(graph, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

fn node_id(frame: u64, mask_id: u64) -> String {
    format!("f{}m{}", frame, mask_id)
}

fn write_document<W: Write>(xml: &mut Writer<W>, graph: &SerializedGraph) -> quick_xml::Result<()> {
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    xml.write_event(Event::Start(
        BytesStart::new("graphml").with_attributes([("xmlns", GRAPHML_NS)]),
    ))?;
    for (name, domain, kind) in KEYS {
        xml.write_event(Event::Empty(BytesStart::new("key").with_attributes([
            ("id", name),
            ("for", domain),
            ("attr.name", name),
            ("attr.type", kind),
        ])))?;
    }
    xml.write_event(Event::Start(
        BytesStart::new("graph").with_attributes([("id", "G"), ("edgedefault", "directed")]),
    ))?;

    for v in &graph.vertices {
        let id = node_id(v.frame, v.mask_id);
        xml.write_event(Event::Start(BytesStart::new("node").with_attributes([("id", id.as_str())])))?;
        write_data(xml, "frame", v.frame)?;
        write_data(xml, "mask_id", v.mask_id)?;
        write_data(xml, "area", v.area)?;
        if let Some(track) = v.cell_track {
            write_data(xml, "cell_track", track)?;
        }
        xml.write_event(Event::End(BytesEnd::new("node")))?;
    }

    for e in &graph.edges {
        let source = node_id(e.frame_source, e.mask_id_source);
        let target = node_id(e.frame_target, e.mask_id_target);
        xml.write_event(Event::Start(
            BytesStart::new("edge").with_attributes([("source", source.as_str()), ("target", target.as_str())]),
        ))?;
        write_data(xml, "frame_source", e.frame_source)?;
        write_data(xml, "frame_target", e.frame_target)?;
        write_data(xml, "mask_id_source", e.mask_id_source)?;
        write_data(xml, "mask_id_target", e.mask_id_target)?;
        write_data(xml, "overlap_area", e.overlap_area)?;
        write_data(xml, "overlap_fraction_source", e.overlap_fraction_source)?;
        write_data(xml, "overlap_fraction_target", e.overlap_fraction_target)?;
        xml.write_event(Event::End(BytesEnd::new("edge")))?;
    }

    xml.write_event(Event::End(BytesEnd::new("graph")))?;
    xml.write_event(Event::End(BytesEnd::new("graphml")))?;
    Ok(())
}

fn write_data<W: Write, T: Display>(xml: &mut Writer<W>, key: &str, value: T) -> quick_xml::Result<()> {
    let text = value.to_string();
    xml.write_event(Event::Start(BytesStart::new("data").with_attributes([("key", key)])))?;
    xml.write_event(Event::Text(BytesText::new(&text)))?;
    xml.write_event(Event::End(BytesEnd::new("data")))?;
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

/// Read a graph from a GraphML document.
pub fn read_graphml<R: BufRead>(reader: R) -> LineageResult<LineageGraph> {
    let document = Document::parse(reader)?;
    Ok(document.into_serialized()?.into_graph()?)
}

/// Read a graph from gzip-compressed GraphML.
pub fn read_graphml_gz<R: Read>(reader: R) -> LineageResult<LineageGraph> {
    read_graphml(BufReader::new(GzDecoder::new(reader)))
}

fn markup<E: Display>(e: E) -> GraphError {
    GraphError::Markup(e.to_string())
}

/// A node or edge with its raw attribute text, keyed by attribute name.
#[derive(Debug, Default)]
struct Element {
    id: String,
    source: String,
    target: String,
    data: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
enum ElementKind {
    Node,
    Edge,
}

#[derive(Debug, Default)]
struct Document {
    nodes: Vec<Element>,
    edges: Vec<Element>,
}

impl Document {
    fn parse<R: BufRead>(reader: R) -> GraphResult<Self> {
        let mut xml = Reader::from_reader(reader);
        xml.trim_text(true);

        let mut document = Document::default();
        // Key id -> attribute name.
        let mut keys: HashMap<String, String> = HashMap::new();
        let mut open: Option<(ElementKind, Element)> = None;
        let mut data_key: Option<String> = None;
        let mut text = String::new();
        let mut buf = Vec::new();

        loop {
            match xml.read_event_into(&mut buf).map_err(markup)? {
                Event::Start(e) => {
                    let attrs = attributes(&e)?;
                    match e.local_name().as_ref() {
                        b"key" => declare_key(&mut keys, attrs),
                        b"graph" => check_directed(&attrs)?,
                        b"node" => open = Some((ElementKind::Node, node(attrs)?)),
                        b"edge" => open = Some((ElementKind::Edge, edge(attrs)?)),
                        b"data" => {
                            data_key = Some(required(&attrs, "data", "key")?);
                            text.clear();
                        }
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    let attrs = attributes(&e)?;
                    match e.local_name().as_ref() {
                        b"key" => declare_key(&mut keys, attrs),
                        b"node" => document.nodes.push(node(attrs)?),
                        b"edge" => document.edges.push(edge(attrs)?),
                        b"data" => {
                            let key = required(&attrs, "data", "key")?;
                            store(&mut open, &keys, key, String::new());
                        }
                        _ => {}
                    }
                }
                Event::Text(e) => {
                    if data_key.is_some() {
                        text.push_str(&e.unescape().map_err(markup)?);
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"data" => {
                        if let Some(key) = data_key.take() {
                            store(&mut open, &keys, key, std::mem::take(&mut text));
                        }
                    }
                    b"node" | b"edge" => {
                        if let Some((kind, element)) = open.take() {
                            match kind {
                                ElementKind::Node => document.nodes.push(element),
                                ElementKind::Edge => document.edges.push(element),
                            }
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(document)
    }

    /// Coerce the raw attributes into the serialized schema.
    fn into_serialized(self) -> GraphResult<SerializedGraph> {
        let mut serialized = SerializedGraph::new();
        let mut keys_by_id: HashMap<String, (u64, u64)> = HashMap::with_capacity(self.nodes.len());

        for node in self.nodes {
            let vertex = SerializedVertex {
                frame: integer(&node.data, "frame")?,
                mask_id: integer(&node.data, "mask_id")?,
                area: integer(&node.data, "area")?,
                cell_track: optional_integer(&node.data, "cell_track")?,
            };
            if keys_by_id
                .insert(node.id.clone(), (vertex.frame, vertex.mask_id))
                .is_some()
            {
                return Err(GraphError::Markup(format!("duplicate node id '{}'", node.id)));
            }
            serialized.vertices.push(vertex);
        }

        for edge in self.edges {
            let (frame_source, mask_id_source) = endpoint(&keys_by_id, &edge.source)?;
            let (frame_target, mask_id_target) = endpoint(&keys_by_id, &edge.target)?;
            serialized.edges.push(SerializedEdge {
                frame_source: agreeing(&edge.data, "frame_source", frame_source)?,
                frame_target: agreeing(&edge.data, "frame_target", frame_target)?,
                mask_id_source: agreeing(&edge.data, "mask_id_source", mask_id_source)?,
                mask_id_target: agreeing(&edge.data, "mask_id_target", mask_id_target)?,
                overlap_area: integer(&edge.data, "overlap_area")?,
                overlap_fraction_source: fraction(&edge.data, "overlap_fraction_source")?,
                overlap_fraction_target: fraction(&edge.data, "overlap_fraction_target")?,
            });
        }
        Ok(serialized)
    }
}

fn attributes(e: &BytesStart) -> GraphResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(markup)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(markup)?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn required(attrs: &HashMap<String, String>, element: &str, name: &str) -> GraphResult<String> {
    attrs
        .get(name)
        .cloned()
        .ok_or_else(|| GraphError::Markup(format!("<{}> without '{}'", element, name)))
}

fn declare_key(keys: &mut HashMap<String, String>, mut attrs: HashMap<String, String>) {
    if let Some(id) = attrs.remove("id") {
        let name = attrs.remove("attr.name").unwrap_or_else(|| id.clone());
        keys.insert(id, name);
    }
}

fn check_directed(attrs: &HashMap<String, String>) -> GraphResult<()> {
    match attrs.get("edgedefault").map(String::as_str) {
        Some("undirected") => Err(GraphError::Markup(
            "lineage graphs must be directed (edgedefault=\"undirected\")".to_string(),
        )),
        _ => Ok(()),
    }
}

fn node(attrs: HashMap<String, String>) -> GraphResult<Element> {
    Ok(Element {
        id: required(&attrs, "node", "id")?,
        ..Element::default()
    })
}

fn edge(attrs: HashMap<String, String>) -> GraphResult<Element> {
    Ok(Element {
        source: required(&attrs, "edge", "source")?,
        target: required(&attrs, "edge", "target")?,
        ..Element::default()
    })
}

fn store(open: &mut Option<(ElementKind, Element)>, keys: &HashMap<String, String>, key: String, value: String) {
    if let Some((_, element)) = open.as_mut() {
        let name = keys.get(&key).cloned().unwrap_or(key);
        element.data.insert(name, value);
    }
}

fn endpoint(keys_by_id: &HashMap<String, (u64, u64)>, id: &str) -> GraphResult<(u64, u64)> {
    keys_by_id
        .get(id)
        .copied()
        .ok_or_else(|| GraphError::Markup(format!("edge references unknown node '{}'", id)))
}

fn invalid(attribute: &str, reason: String) -> GraphError {
    GraphError::InvalidAttribute {
        attribute: attribute.to_string(),
        reason,
    }
}

fn parse_integer(attribute: &str, text: &str) -> GraphResult<u64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<u64>() {
        return Ok(value);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(v as u64),
        _ => Err(invalid(
            attribute,
            format!("expected a non-negative integer, found '{}'", text),
        )),
    }
}

fn integer(data: &HashMap<String, String>, attribute: &str) -> GraphResult<u64> {
    match data.get(attribute) {
        Some(text) => parse_integer(attribute, text),
        None => Err(invalid(attribute, "missing".to_string())),
    }
}

/// Empty and NaN values stand for an unset attribute.
fn optional_integer(data: &HashMap<String, String>, attribute: &str) -> GraphResult<Option<u64>> {
    match data.get(attribute).map(|t| t.trim()) {
        None | Some("") => Ok(None),
        Some(t) if t.eq_ignore_ascii_case("nan") => Ok(None),
        Some(t) => parse_integer(attribute, t).map(Some),
    }
}

fn fraction(data: &HashMap<String, String>, attribute: &str) -> GraphResult<f64> {
    let text = data
        .get(attribute)
        .ok_or_else(|| invalid(attribute, "missing".to_string()))?;
    text.trim()
        .parse::<f64>()
        .map_err(|_| invalid(attribute, format!("expected a number, found '{}'", text.trim())))
}

/// Endpoint attribute, which must agree with the endpoint node when present.
fn agreeing(data: &HashMap<String, String>, attribute: &str, expected: u64) -> GraphResult<u64> {
    match data.get(attribute) {
        None => Ok(expected),
        Some(text) => {
            let value = parse_integer(attribute, text)?;
            if value == expected {
                Ok(value)
            } else {
                Err(invalid(
                    attribute,
                    format!("{} disagrees with the endpoint node ({})", value, expected),
                ))
            }
        }
    }
}
