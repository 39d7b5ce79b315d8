//! Individual validation stages.
//!
//! Each stage checks for a specific category of defect in a graph/raster
//! pair.

use crate::core::error::IntegrityError;
use crate::core::mask::LabelMask;
use crate::core::types::Frame;
use crate::graph::structure::LineageGraph;
use crate::validation::report::{ValidationError, ValidationWarning};
use std::collections::BTreeSet;

/// Trait for validation stages.
pub trait ValidationStage: Send + Sync {
    /// Name of this validation stage.
    fn name(&self) -> &str;

    /// Whether analysis cannot run on a pair this stage rejects.
    fn is_blocking(&self) -> bool {
        false
    }

    /// Validate the pair.
    ///
    /// Returns Ok with warnings, or Err with errors.
    fn validate(
        &self,
        graph: &LineageGraph,
        mask: &LabelMask,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>>;
}

fn into_result(
    warnings: Vec<ValidationWarning>,
    errors: Vec<ValidationError>,
) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(errors)
    }
}

/// Frame range validation - every vertex frame exists in the raster.
pub struct FrameRangeValidation;

impl ValidationStage for FrameRangeValidation {
    fn name(&self) -> &str {
        "Frame Range Validation"
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn validate(
        &self,
        graph: &LineageGraph,
        mask: &LabelMask,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let n_frames = mask.n_frames();
        let errors: Vec<ValidationError> = graph
            .mask_ids_by_frame()
            .into_keys()
            .filter(|&frame| frame as usize >= n_frames)
            .map(|frame| IntegrityError::FrameBeyondMask { frame, n_frames }.into())
            .collect();
        into_result(Vec::new(), errors)
    }
}

/// Mask consistency - every vertex has pixels and every label has a vertex.
pub struct MaskConsistency;

impl ValidationStage for MaskConsistency {
    fn name(&self) -> &str {
        "Mask Consistency"
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn validate(
        &self,
        graph: &LineageGraph,
        mask: &LabelMask,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        // Without vertices there is no pairing to check.
        if graph.is_empty() {
            return Ok(Vec::new());
        }
        let mut errors: Vec<ValidationError> = Vec::new();
        let by_frame = graph.mask_ids_by_frame();
        let empty = BTreeSet::new();

        for frame in 0..mask.n_frames() as Frame {
            let counts = match mask.pixel_counts(frame) {
                Ok(counts) => counts,
                Err(e) => {
                    errors.push(e.into());
                    continue;
                }
            };
            let ids = by_frame.get(&frame).unwrap_or(&empty);

            for &mask_id in ids {
                if !counts.contains_key(&mask_id) {
                    errors.push(IntegrityError::MissingPixels { frame, mask_id }.into());
                }
            }
            for &label in counts.keys() {
                if !ids.contains(&label) {
                    errors.push(IntegrityError::OrphanLabel { frame, label }.into());
                }
            }
        }
        into_result(Vec::new(), errors)
    }
}

/// Region connectivity - flags labels split into unconnected regions.
pub struct RegionConnectivity;

impl ValidationStage for RegionConnectivity {
    fn name(&self) -> &str {
        "Region Connectivity"
    }

    fn validate(
        &self,
        _graph: &LineageGraph,
        mask: &LabelMask,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let mut warnings = Vec::new();
        for frame in 0..mask.n_frames() as Frame {
            let counts = mask.region_counts(frame).map_err(|e| vec![ValidationError::from(e)])?;
            for (label, regions) in counts {
                if regions > 1 {
                    warnings.push(
                        ValidationWarning::new(format!(
                            "Label {} at frame {} consists of {} unconnected regions",
                            label, frame, regions
                        ))
                        .at(frame, Some(label))
                        .with_suggestion("Re-run segmentation or split the label before tracking"),
                    );
                }
            }
        }
        Ok(warnings)
    }
}

/// Overlap consistency - overlap measurements agree with vertex areas.
pub struct OverlapConsistency;

impl ValidationStage for OverlapConsistency {
    fn name(&self) -> &str {
        "Overlap Consistency"
    }

    fn validate(
        &self,
        graph: &LineageGraph,
        _mask: &LabelMask,
    ) -> Result<Vec<ValidationWarning>, Vec<ValidationError>> {
        let mut warnings = Vec::new();
        for e in graph.edge_indices() {
            let (s, t) = graph.endpoints(e);
            let attrs = graph.edge(e);
            let overlap = attrs.overlap;
            let fractions_ok = (0.0..=1.0).contains(&overlap.fraction_source)
                && (0.0..=1.0).contains(&overlap.fraction_target);
            let area_ok = overlap.area <= graph.vertex(s).area.min(graph.vertex(t).area);
            if !(fractions_ok && area_ok) {
                warnings.push(
                    ValidationWarning::new(format!(
                        "Edge ({}, {}) -> ({}, {}) has overlap {} (fractions {:.3}, {:.3}) inconsistent with vertex areas",
                        attrs.frame_source,
                        attrs.mask_id_source,
                        attrs.frame_target,
                        attrs.mask_id_target,
                        overlap.area,
                        overlap.fraction_source,
                        overlap.fraction_target
                    ))
                    .at(attrs.frame_source, Some(attrs.mask_id_source)),
                );
            }
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Overlap, Vertex};
    use ndarray::Array3;

    /// Two frames, label 1 at (0, 0) in both, linked.
    fn pair() -> (LineageGraph, LabelMask) {
        let mut graph = LineageGraph::new();
        graph.add_vertex(Vertex::new(0, 1, 1)).unwrap();
        graph.add_vertex(Vertex::new(1, 1, 1)).unwrap();
        graph.connect((0, 1), (1, 1), Overlap::full(1)).unwrap();
        let mut data = Array3::<u32>::zeros((2, 3, 3));
        data[[0, 0, 0]] = 1;
        data[[1, 0, 0]] = 1;
        (graph, LabelMask::new(data))
    }

    #[test]
    fn test_consistent_pair_passes() {
        let (graph, mask) = pair();
        assert_eq!(FrameRangeValidation.validate(&graph, &mask), Ok(vec![]));
        assert_eq!(MaskConsistency.validate(&graph, &mask), Ok(vec![]));
        assert_eq!(RegionConnectivity.validate(&graph, &mask), Ok(vec![]));
        assert_eq!(OverlapConsistency.validate(&graph, &mask), Ok(vec![]));
    }

    #[test]
    fn test_frame_beyond_mask() {
        let (mut graph, mask) = pair();
        graph.add_vertex(Vertex::new(4, 2, 1)).unwrap();
        let errors = FrameRangeValidation.validate(&graph, &mask).unwrap_err();
        assert_eq!(
            errors,
            vec![IntegrityError::FrameBeyondMask { frame: 4, n_frames: 2 }.into()]
        );
    }

    #[test]
    fn test_missing_pixels_and_orphans() {
        let (mut graph, mask) = pair();
        graph.add_vertex(Vertex::new(1, 5, 1)).unwrap();
        let mut data = mask.into_inner();
        data[[0, 2, 2]] = 9;
        let mask = LabelMask::new(data);

        let errors = MaskConsistency.validate(&graph, &mask).unwrap_err();
        assert!(errors.contains(&IntegrityError::OrphanLabel { frame: 0, label: 9 }.into()));
        assert!(errors.contains(&IntegrityError::MissingPixels { frame: 1, mask_id: 5 }.into()));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_split_label_warns() {
        let (graph, mask) = pair();
        let mut data = mask.into_inner();
        data[[1, 2, 2]] = 1;
        let warnings = RegionConnectivity.validate(&graph, &LabelMask::new(data)).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!((warnings[0].frame, warnings[0].mask_id), (Some(1), Some(1)));
    }

    #[test]
    fn test_overlap_larger_than_area_warns() {
        let (mut graph, mask) = pair();
        graph.add_vertex(Vertex::new(1, 2, 3)).unwrap();
        graph.connect((0, 1), (1, 2), Overlap::full(3)).unwrap();
        let warnings = OverlapConsistency.validate(&graph, &mask).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_empty_graph_has_no_orphans() {
        let (_, mask) = pair();
        assert_eq!(MaskConsistency.validate(&LineageGraph::new(), &mask), Ok(vec![]));
        assert_eq!(FrameRangeValidation.validate(&LineageGraph::new(), &mask), Ok(vec![]));
    }

    #[test]
    fn test_vertices_beyond_empty_mask() {
        let (graph, _) = pair();
        let errors = FrameRangeValidation
            .validate(&graph, &LabelMask::zeros((0, 3, 3)))
            .unwrap_err();
        // One error per referenced frame.
        assert_eq!(errors.len(), 2);
    }
}
