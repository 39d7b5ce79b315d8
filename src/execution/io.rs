//! File access for the orchestration layer.
//!
//! The analyzers never touch the filesystem; everything that reads or
//! writes files lives here. Rasters are `.npy` arrays of shape
//! (time, y, x); graphs are gzip-compressed GraphML or JSON documents,
//! chosen by file name.

use crate::analysis::events::EventRecord;
use crate::core::error::{LineageResult, MaskError, MaskResult};
use crate::core::mask::LabelMask;
use crate::graph::graphml::{read_graphml, read_graphml_gz, write_graphml, write_graphml_gz};
use crate::graph::serialization::{read_graph_gz, write_graph_gz};
use crate::graph::structure::LineageGraph;
use ndarray::{ArrayD, Ix3};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WriteNpyExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Read a label raster from `.npy` data.
///
/// Unsigned and signed integer dtypes are accepted as long as every value
/// fits an unsigned 32-bit label.
pub fn read_mask_npy<R: Read>(mut reader: R) -> LineageResult<LabelMask> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let bytes = bytes.as_slice();

    let array: ArrayD<u32> = if let Some(a) = try_read::<u32>(bytes)? {
        a
    } else if let Some(a) = try_read::<u16>(bytes)? {
        a.mapv(u32::from)
    } else if let Some(a) = try_read::<u8>(bytes)? {
        a.mapv(u32::from)
    } else if let Some(a) = try_read::<i32>(bytes)? {
        narrow(a)?
    } else if let Some(a) = try_read::<i64>(bytes)? {
        narrow(a)?
    } else if let Some(a) = try_read::<u64>(bytes)? {
        narrow(a)?
    } else {
        return Err(MaskError::UnsupportedDtype(descriptor(bytes)).into());
    };

    let ndim = array.ndim();
    let array = array
        .into_dimensionality::<Ix3>()
        .map_err(|_| MaskError::UnsupportedShape { ndim })?;
    Ok(LabelMask::new(array))
}

/// Write a label raster as `u32` `.npy` data.
pub fn write_mask_npy<W: Write>(mask: &LabelMask, writer: W) -> LineageResult<()> {
    mask.data()
        .write_npy(writer)
        .map_err(|e| MaskError::Npy(e.to_string()))?;
    Ok(())
}

fn try_read<T: ReadableElement>(bytes: &[u8]) -> MaskResult<Option<ArrayD<T>>> {
    match ArrayD::<T>::read_npy(bytes) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(MaskError::Npy(e.to_string())),
    }
}

fn descriptor(bytes: &[u8]) -> String {
    match ArrayD::<u32>::read_npy(bytes) {
        Err(ReadNpyError::WrongDescriptor(descr)) => format!("{:?}", descr),
        _ => "unknown".to_string(),
    }
}

fn narrow<T>(array: ArrayD<T>) -> MaskResult<ArrayD<u32>>
where
    T: Copy + TryInto<u32> + Into<i128>,
{
    let mut out = ArrayD::<u32>::zeros(array.raw_dim());
    for (label, &value) in out.iter_mut().zip(array.iter()) {
        *label = value.try_into().map_err(|_| {
            let wide: i128 = value.into();
            MaskError::LabelOutOfRange {
                value: i64::try_from(wide).unwrap_or(i64::MAX),
            }
        })?;
    }
    Ok(out)
}

/// Load a raster from a `.npy` file.
pub fn load_mask<P: AsRef<Path>>(path: P) -> LineageResult<LabelMask> {
    read_mask_npy(BufReader::new(File::open(path)?))
}

/// Save a raster to a `.npy` file.
pub fn save_mask<P: AsRef<Path>>(path: P, mask: &LabelMask) -> LineageResult<()> {
    write_mask_npy(mask, BufWriter::new(File::create(path)?))
}

/// On-disk graph formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// `.graphmlz` or `.graphml.gz`
    GraphMlGz,
    /// `.graphml`
    GraphMl,
    /// Anything else, usually `.json.gz`.
    JsonGz,
}

impl GraphFormat {
    /// Pick the format from the file name.
    pub fn of<P: AsRef<Path>>(path: P) -> Self {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".graphmlz") || name.ends_with(".graphml.gz") {
            GraphFormat::GraphMlGz
        } else if name.ends_with(".graphml") {
            GraphFormat::GraphMl
        } else {
            GraphFormat::JsonGz
        }
    }
}

/// Load a graph, choosing the reader by file name.
pub fn load_graph<P: AsRef<Path>>(path: P) -> LineageResult<LineageGraph> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    match GraphFormat::of(path) {
        GraphFormat::GraphMlGz => read_graphml_gz(reader),
        GraphFormat::GraphMl => read_graphml(reader),
        GraphFormat::JsonGz => read_graph_gz(reader),
    }
}

/// Save a graph, choosing the writer by file name.
pub fn save_graph<P: AsRef<Path>>(path: P, graph: &LineageGraph) -> LineageResult<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    match GraphFormat::of(path) {
        GraphFormat::GraphMlGz => write_graphml_gz(graph, &mut writer)?,
        GraphFormat::GraphMl => write_graphml(graph, &mut writer)?,
        GraphFormat::JsonGz => write_graph_gz(graph, &mut writer)?,
    }
    writer.flush()?;
    Ok(())
}

/// Write event records as delimited text with a header row.
pub fn write_records<W: Write>(mut writer: W, records: &[EventRecord], delimiter: char) -> LineageResult<()> {
    writeln!(writer, "{}", EventRecord::header(delimiter))?;
    for record in records {
        writeln!(writer, "{}", record.to_row(delimiter))?;
    }
    writer.flush()?;
    Ok(())
}

/// Save event records to a tab-separated file.
pub fn save_records<P: AsRef<Path>>(path: P, records: &[EventRecord]) -> LineageResult<()> {
    write_records(BufWriter::new(File::create(path)?), records, '\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LineageError;
    use crate::core::types::{Overlap, Vertex};
    use ndarray::{Array2, Array3};
    use std::collections::BTreeSet;

    fn npy_bytes<A: WriteNpyExt>(array: &A) -> Vec<u8> {
        let mut bytes = Vec::new();
        array.write_npy(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_mask_round_trip() {
        let mut data = Array3::<u32>::zeros((2, 3, 4));
        data[[1, 2, 3]] = 70_000;
        let mask = LabelMask::new(data);

        let mut bytes = Vec::new();
        write_mask_npy(&mask, &mut bytes).unwrap();
        assert_eq!(read_mask_npy(bytes.as_slice()).unwrap(), mask);
    }

    #[test]
    fn test_narrow_dtypes_are_coerced() {
        let mut data = Array3::<u16>::zeros((1, 2, 2));
        data[[0, 1, 1]] = 7;
        let mask = read_mask_npy(npy_bytes(&data).as_slice()).unwrap();
        assert_eq!(mask.labels_in_frame(0).unwrap(), BTreeSet::from([7]));

        let mut data = Array3::<i64>::zeros((1, 2, 2));
        data[[0, 0, 1]] = 3;
        let mask = read_mask_npy(npy_bytes(&data).as_slice()).unwrap();
        assert_eq!(mask.labels_in_frame(0).unwrap(), BTreeSet::from([3]));
    }

    #[test]
    fn test_negative_labels_rejected() {
        let mut data = Array3::<i32>::zeros((1, 2, 2));
        data[[0, 0, 0]] = -1;
        let err = read_mask_npy(npy_bytes(&data).as_slice()).unwrap_err();
        assert!(matches!(
            err,
            LineageError::Mask(MaskError::LabelOutOfRange { value: -1 })
        ));
    }

    #[test]
    fn test_wrong_rank_and_dtype_rejected() {
        let data = Array2::<u32>::zeros((2, 2));
        let err = read_mask_npy(npy_bytes(&data).as_slice()).unwrap_err();
        assert!(err.to_string().contains("got 2"));

        let data = Array3::<f32>::zeros((1, 2, 2));
        let err = read_mask_npy(npy_bytes(&data).as_slice()).unwrap_err();
        assert!(err.to_string().contains("Unsupported mask dtype"));
    }

    #[test]
    fn test_file_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = LineageGraph::new();
        graph.add_vertex(Vertex::new(0, 1, 4)).unwrap();
        graph.add_vertex(Vertex::new(1, 1, 4)).unwrap();
        graph.connect((0, 1), (1, 1), Overlap::full(4)).unwrap();

        let path = dir.path().join("sample.json.gz");
        save_graph(&path, &graph).unwrap();
        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded.vertex_count(), 2);
        assert_eq!(loaded.edge_count(), 1);

        let mask = LabelMask::zeros((2, 2, 2));
        let path = dir.path().join("sample.npy");
        save_mask(&path, &mask).unwrap();
        assert_eq!(load_mask(&path).unwrap(), mask);
    }

    #[test]
    fn test_graph_format_follows_file_name() {
        assert_eq!(GraphFormat::of("a/sample.graphmlz"), GraphFormat::GraphMlGz);
        assert_eq!(GraphFormat::of("sample.GraphML.gz"), GraphFormat::GraphMlGz);
        assert_eq!(GraphFormat::of("sample.graphml"), GraphFormat::GraphMl);
        assert_eq!(GraphFormat::of("sample.json.gz"), GraphFormat::JsonGz);

        let dir = tempfile::tempdir().unwrap();
        let mut graph = LineageGraph::new();
        graph.add_vertex(Vertex::new(0, 2, 6)).unwrap();
        graph.add_vertex(Vertex::new(2, 2, 5)).unwrap();
        graph.connect((0, 2), (2, 2), Overlap::from_areas(5, 6, 5)).unwrap();

        for name in ["sample.graphmlz", "sample.graphml"] {
            let path = dir.path().join(name);
            save_graph(&path, &graph).unwrap();
            let loaded = load_graph(&path).unwrap();
            assert_eq!(loaded.edge_count(), 1);
            assert!(loaded.find(2, 2).is_some());
        }
        let plain = std::fs::read_to_string(dir.path().join("sample.graphml")).unwrap();
        assert!(plain.contains("<graphml"));
    }

    #[test]
    fn test_write_records() {
        let records = vec![EventRecord {
            window_start: 0,
            frame: 2,
            window_end: 4,
            before_ids: BTreeSet::from([1]),
            after_ids: BTreeSet::from([2, 3]),
        }];
        let mut out = Vec::new();
        write_records(&mut out, &records, ',').unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "window_start,frame,window_end,before_ids,after_ids\n0,2,4,1,2 3\n");
    }
}
