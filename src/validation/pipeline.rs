//! Input checks run before analysis.
//!
//! Degenerate pairs (no vertices or no frames) are valid input: they are
//! reported as warnings and never reach the stages, since there is nothing
//! to cross-check.

use crate::core::mask::LabelMask;
use crate::graph::structure::LineageGraph;
use crate::validation::report::{ValidationReport, ValidationWarning};
use crate::validation::stages::{
    FrameRangeValidation, MaskConsistency, OverlapConsistency, RegionConnectivity, ValidationStage,
};
use std::time::Instant;

/// Ordered validation stages run on a graph/raster pair before analysis.
pub struct ValidationPipeline {
    stages: Vec<Box<dyn ValidationStage>>,
}

impl ValidationPipeline {
    /// Every stage: range and pairing checks, then region and overlap checks.
    pub fn default_pipeline() -> Self {
        Self {
            stages: vec![
                Box::new(FrameRangeValidation),
                Box::new(MaskConsistency),
                Box::new(RegionConnectivity),
                Box::new(OverlapConsistency),
            ],
        }
    }

    /// Only the stages whose failures block analysis.
    pub fn minimal_pipeline() -> Self {
        let mut pipeline = Self::default_pipeline();
        pipeline.stages.retain(|stage| stage.is_blocking());
        pipeline
    }

    /// Names of the stages, in run order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Validate a graph/raster pair.
    pub fn validate(&self, graph: &LineageGraph, mask: &LabelMask) -> ValidationReport {
        let start = Instant::now();
        let mut report = ValidationReport::new();

        let degenerate = degenerate_input(graph, mask);
        if degenerate.is_empty() {
            self.run_stages(graph, mask, &mut report);
        } else {
            for warning in degenerate {
                log::warn!("{}", warning.message);
                report.add_warning(warning);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        log::debug!(
            "validation: {} errors, {} warnings in {}ms",
            report.errors.len(),
            report.warnings.len(),
            report.duration_ms
        );
        report
    }

    fn run_stages(&self, graph: &LineageGraph, mask: &LabelMask, report: &mut ValidationReport) {
        for stage in &self.stages {
            let errors = match stage.validate(graph, mask) {
                Ok(warnings) => {
                    for warning in warnings {
                        log::warn!("{}: {}", stage.name(), warning.message);
                        report.add_warning(warning);
                    }
                    continue;
                }
                Err(errors) => errors,
            };

            for error in errors {
                let fatal = error.is_fatal();
                log::debug!("{}: {}", stage.name(), error);
                report.add_error(error);
                if fatal {
                    log::debug!("{} stopped validation", stage.name());
                    return;
                }
            }
        }
    }
}

fn degenerate_input(graph: &LineageGraph, mask: &LabelMask) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if graph.is_empty() {
        warnings.push(
            ValidationWarning::new("Graph has no vertices")
                .with_suggestion("The output will be empty; check the tracking step produced a graph"),
        );
    }
    if mask.n_frames() == 0 {
        warnings.push(ValidationWarning::new("Mask has no frames"));
    }
    warnings
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::default_pipeline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vertex;
    use crate::validation::report::ValidationError;
    use ndarray::Array3;

    #[test]
    fn test_empty_pair_only_warns() {
        let report = ValidationPipeline::default_pipeline()
            .validate(&LineageGraph::new(), &LabelMask::zeros((0, 3, 3)));
        assert!(report.can_proceed());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_empty_graph_with_labeled_mask_only_warns() {
        let mut data = Array3::<u32>::zeros((2, 4, 4));
        data[[0, 1, 1]] = 3;
        data[[1, 2, 2]] = 7;
        let report = ValidationPipeline::default_pipeline().validate(&LineageGraph::new(), &LabelMask::new(data));

        assert!(report.can_proceed());
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].message, "Graph has no vertices");
    }

    #[test]
    fn test_vertices_without_frames_only_warn() {
        let mut graph = LineageGraph::new();
        graph.add_vertex(Vertex::new(0, 1, 1)).unwrap();
        let report = ValidationPipeline::default_pipeline().validate(&graph, &LabelMask::zeros((0, 4, 4)));
        assert!(report.can_proceed());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_fatal_error_stops_pipeline() {
        let mut graph = LineageGraph::new();
        graph.add_vertex(Vertex::new(3, 1, 1)).unwrap();
        graph.add_vertex(Vertex::new(0, 2, 1)).unwrap();
        let mask = LabelMask::zeros((2, 3, 3));

        let report = ValidationPipeline::default_pipeline().validate(&graph, &mask);
        assert!(!report.can_proceed());
        // Frame range fails first; mask consistency never runs.
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], ValidationError::Integrity(_)));
    }

    #[test]
    fn test_stage_names() {
        let pipeline = ValidationPipeline::minimal_pipeline();
        assert_eq!(pipeline.stage_names(), vec!["Frame Range Validation", "Mask Consistency"]);
        assert_eq!(ValidationPipeline::default_pipeline().stage_names().len(), 4);
    }
}
