//! Single-sample analysis pipeline.
//!
//! Runs validation, stability analysis, event detection and selection on
//! one graph/raster pair. The inputs are borrowed and never modified; the
//! output pair is built fresh.

use crate::analysis::events::{EventDetector, EventRecord};
use crate::analysis::selection::{EventSelector, Rejection};
use crate::analysis::stability::StabilityAnalyzer;
use crate::config::PipelineConfig;
use crate::core::error::LineageResult;
use crate::core::mask::LabelMask;
use crate::core::types::EventId;
use crate::graph::structure::LineageGraph;
use crate::graph::topology::{TopologyClassification, TopologyClassifier};
use crate::validation::{ValidationPipeline, ValidationReport};
use std::time::Instant;

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Graph of the selected events, relabeled.
    pub graph: LineageGraph,
    /// Raster relabeled consistently with `graph`.
    pub mask: LabelMask,
    /// Event id per vertex of `graph`.
    pub vertex_events: Vec<EventId>,
    /// One record per selected event.
    pub records: Vec<EventRecord>,
    /// Events detected before filtering.
    pub n_detected: usize,
    /// Events dropped by the selection filters.
    pub rejected: Vec<Rejection>,
    /// Input validation findings.
    pub report: ValidationReport,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

/// Configured analysis pipeline.
pub struct EventPipeline {
    config: PipelineConfig,
    validation: ValidationPipeline,
}

impl EventPipeline {
    /// Create a pipeline with the default validation stages.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            validation: ValidationPipeline::default_pipeline(),
        }
    }

    /// Replace the validation stages.
    pub fn with_validation(mut self, validation: ValidationPipeline) -> Self {
        self.validation = validation;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline on one pair.
    pub fn run(&self, graph: &LineageGraph, mask: &LabelMask) -> LineageResult<PipelineOutput> {
        let start = Instant::now();
        self.config.validate()?;
        let report = self.validation.validate(graph, mask).into_result()?;

        let stability = StabilityAnalyzer::new(graph)
            .analyze(self.config.stability.stable_overlap_fraction)?;
        let assignment = EventDetector::new(graph, &stability).detect(&self.config.events);
        let selection = EventSelector::new(self.config.selection.clone()).select(graph, mask, &assignment)?;

        let output = PipelineOutput {
            graph: selection.graph,
            mask: selection.mask,
            vertex_events: selection.vertex_events,
            records: selection.records,
            n_detected: assignment.len(),
            rejected: selection.rejected,
            report,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "pipeline: {} {} events kept of {} detected in {} ms",
            output.records.len(),
            self.config.events.kind,
            output.n_detected,
            output.duration_ms
        );
        Ok(output)
    }

    /// Classify the cell-track topologies of a graph with the configured limits.
    pub fn classify_topologies(&self, graph: &LineageGraph) -> TopologyClassification {
        TopologyClassifier::new(self.config.topology.max_events, self.config.topology.max_anomalies)
            .classify(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::events::DetectionParams;
    use crate::core::error::LineageError;
    use crate::core::types::{EventKind, Frame, MaskId, Overlap, Vertex};
    use ndarray::Array3;
    use std::collections::BTreeSet;

    /// Mask 1 over frames 0..=3 dividing into masks 2 and 3 over 4..=5,
    /// each vertex painted as one row of a 6x6 raster.
    fn division_pair() -> (LineageGraph, LabelMask) {
        let mut graph = LineageGraph::new();
        let mut data = Array3::<u32>::zeros((6, 6, 6));
        let mut add = |graph: &mut LineageGraph, f: Frame, m: MaskId| {
            graph.add_vertex(Vertex::new(f, m, 2)).unwrap();
            data[[f as usize, m as usize, 2]] = m;
            data[[f as usize, m as usize, 3]] = m;
        };
        for f in 0..=3 {
            add(&mut graph, f, 1);
        }
        for f in 4..=5 {
            add(&mut graph, f, 2);
            add(&mut graph, f, 3);
        }
        for f in 0..3 {
            graph.connect((f, 1), (f + 1, 1), Overlap::full(2)).unwrap();
        }
        graph.connect((4, 2), (5, 2), Overlap::full(2)).unwrap();
        graph.connect((4, 3), (5, 3), Overlap::full(2)).unwrap();
        graph.connect((3, 1), (4, 2), Overlap::from_areas(1, 2, 2)).unwrap();
        graph.connect((3, 1), (4, 3), Overlap::from_areas(1, 2, 2)).unwrap();
        (graph, LabelMask::new(data))
    }

    fn division_config() -> PipelineConfig {
        PipelineConfig::default().with_events(DetectionParams::new(EventKind::Division).with_stability(3, 2))
    }

    #[test]
    fn test_division_pipeline() {
        let (graph, mask) = division_pair();
        let output = EventPipeline::new(division_config()).run(&graph, &mask).unwrap();

        assert_eq!(output.n_detected, 1);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].frame, 3);
        assert_eq!(output.records[0].before_ids, BTreeSet::from([1]));
        assert_eq!(output.records[0].after_ids, BTreeSet::from([2, 3]));
        // Frame 0 is outside the before window and is dropped.
        assert!(output.mask.labels_in_frame(0).unwrap().is_empty());
        assert_eq!(output.graph.vertex_count(), 7);
        assert!(output.report.can_proceed());
    }

    #[test]
    fn test_inconsistent_input_fails_validation() {
        let (mut graph, mask) = division_pair();
        graph.add_vertex(Vertex::new(0, 5, 1)).unwrap();
        let err = EventPipeline::new(division_config()).run(&graph, &mask).unwrap_err();
        assert!(matches!(err, LineageError::Validation(_)));
        assert!(err.is_data_error());
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let output = EventPipeline::new(division_config())
            .run(&LineageGraph::new(), &LabelMask::zeros((0, 6, 6)))
            .unwrap();
        assert!(output.graph.is_empty());
        assert!(output.records.is_empty());
        assert_eq!(output.mask.shape(), (0, 6, 6));
        assert_eq!(output.report.warnings.len(), 2);
    }

    #[test]
    fn test_empty_graph_with_labeled_mask() {
        let mut data = Array3::<u32>::zeros((2, 4, 4));
        data[[0, 1, 1]] = 3;
        let output = EventPipeline::new(PipelineConfig::default())
            .run(&LineageGraph::new(), &LabelMask::new(data))
            .unwrap();

        assert!(output.graph.is_empty());
        assert!(output.records.is_empty());
        assert_eq!(output.mask.shape(), (2, 4, 4));
        assert!(output.mask.labels_in_frame(0).unwrap().is_empty());
        assert_eq!(output.report.warnings.len(), 1);
    }

    #[test]
    fn test_custom_validation_stages() {
        let (graph, mask) = division_pair();
        let mut data = mask.into_inner();
        // A stray pixel splits label 1 at frame 0 into two regions.
        data[[0, 5, 5]] = 1;
        let mask = LabelMask::new(data);

        let output = EventPipeline::new(division_config()).run(&graph, &mask).unwrap();
        assert_eq!(output.report.warnings.len(), 1);

        let output = EventPipeline::new(division_config())
            .with_validation(ValidationPipeline::minimal_pipeline())
            .run(&graph, &mask)
            .unwrap();
        assert!(output.report.warnings.is_empty());
        assert_eq!(output.records.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (graph, mask) = division_pair();
        let config = division_config().with_stable_overlap_fraction(2.0);
        let err = EventPipeline::new(config).run(&graph, &mask).unwrap_err();
        assert!(matches!(err, LineageError::Parameter(_)));
    }

    #[test]
    fn test_overlap_threshold_breaks_stability() {
        let (graph, mask) = division_pair();
        // Every edge has full overlap except the division edges, which are
        // never stable anyway.
        let config = division_config().with_stable_overlap_fraction(1.0);
        let output = EventPipeline::new(config).run(&graph, &mask).unwrap();
        assert_eq!(output.records.len(), 1);
    }

    #[test]
    fn test_classify_topologies() {
        let (graph, _) = division_pair();
        let classification = EventPipeline::new(division_config()).classify_topologies(&graph);
        assert_eq!(classification.topologies.len(), 1);
        assert_eq!(classification.topologies[0].complexity.n_divisions, 1);
    }
}
