//! Event selection and consistent graph/raster relabeling.
//!
//! Selection keeps only the vertices of accepted events and renumbers their
//! mask ids to `1..=N`, one id per distinct `(mask_id, event_id)` pair. The
//! same renumbering is applied to the raster frame by frame, so the pair
//! stays consistent: the positive labels of each frame are exactly the mask
//! ids of the graph's vertices at that frame.
//!
//! Every relabel builds a new graph and a new raster before returning them
//! together; inputs are never modified.

use crate::analysis::events::{Event, EventAssignment, EventRecord};
use crate::core::error::{IntegrityError, LineageResult};
use crate::core::mask::{LabelLut, LabelMask};
use crate::core::types::{EventId, Frame, MaskId, TrackId, NO_EVENT};
use crate::graph::structure::LineageGraph;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A relabeled graph/raster pair.
#[derive(Debug, Clone)]
pub struct Relabeled {
    /// Graph restricted to the selected vertices, with new mask ids.
    pub graph: LineageGraph,
    /// Raster with the same renumbering applied.
    pub mask: LabelMask,
    /// Event id per vertex of the new graph.
    pub vertex_events: Vec<EventId>,
    /// Old vertex index -> new vertex index.
    pub index_map: HashMap<NodeIndex, NodeIndex>,
}

/// Applies consistent relabels to a graph and its raster.
pub struct Relabeler;

impl Relabeler {
    /// Keep `selected` vertices and renumber them per `(mask_id, event_id)`.
    ///
    /// Fails with an [`IntegrityError`] when a selected vertex lies beyond the
    /// raster or has no pixels at its frame.
    pub fn relabel(
        graph: &LineageGraph,
        mask: &LabelMask,
        selected: &[(NodeIndex, EventId)],
    ) -> LineageResult<Relabeled> {
        check_pixels(graph, mask, selected.iter().map(|&(v, _)| v))?;

        let pairs: BTreeSet<(MaskId, EventId)> = selected
            .iter()
            .map(|&(v, event)| (graph.vertex(v).mask_id, event))
            .collect();
        let new_ids: HashMap<(MaskId, EventId), MaskId> = pairs
            .into_iter()
            .enumerate()
            .map(|(i, pair)| (pair, i as MaskId + 1))
            .collect();

        let mut vertex_ids: HashMap<NodeIndex, MaskId> = HashMap::new();
        let mut vertex_event: HashMap<NodeIndex, EventId> = HashMap::new();
        let mut frame_pairs: HashMap<Frame, Vec<(MaskId, MaskId)>> = HashMap::new();
        for &(v, event) in selected {
            let vertex = graph.vertex(v);
            let new_id = new_ids[&(vertex.mask_id, event)];
            vertex_ids.insert(v, new_id);
            vertex_event.insert(v, event);
            frame_pairs
                .entry(vertex.frame)
                .or_default()
                .push((vertex.mask_id, new_id));
        }

        let luts: HashMap<Frame, LabelLut> = frame_pairs
            .into_iter()
            .map(|(frame, pairs)| (frame, LabelLut::from_pairs(pairs)))
            .collect();
        let new_mask = mask.relabel_frames(&luts);
        let (new_graph, index_map) = graph.remapped(|v, _| vertex_ids.get(&v).copied())?;

        let mut vertex_events = vec![NO_EVENT; new_graph.vertex_count()];
        for (old, new) in &index_map {
            vertex_events[new.index()] = vertex_event[old];
        }

        log::debug!(
            "relabeled {} vertices to {} ids",
            new_graph.vertex_count(),
            new_ids.len()
        );
        Ok(Relabeled {
            graph: new_graph,
            mask: new_mask,
            vertex_events,
            index_map,
        })
    }

    /// Keep the given cell tracks, zeroing the pixels of every other
    /// vertex. Mask ids are not renumbered.
    pub fn retain_tracks(
        graph: &LineageGraph,
        mask: &LabelMask,
        keep: &BTreeSet<TrackId>,
    ) -> LineageResult<(LineageGraph, LabelMask)> {
        let kept: HashSet<NodeIndex> = graph
            .tracks()
            .into_iter()
            .filter(|(id, _)| keep.contains(id))
            .flat_map(|(_, members)| members)
            .collect();
        check_frames(graph, mask, kept.iter().copied())?;

        let mut labels: HashMap<Frame, BTreeSet<MaskId>> = HashMap::new();
        for &v in &kept {
            let vertex = graph.vertex(v);
            labels.entry(vertex.frame).or_default().insert(vertex.mask_id);
        }
        let new_mask = mask.retain_labels(&labels);
        let new_graph = graph.filtered(|v, _| kept.contains(&v));
        Ok((new_graph, new_mask))
    }
}

fn check_frames<I>(graph: &LineageGraph, mask: &LabelMask, vertices: I) -> Result<(), IntegrityError>
where
    I: IntoIterator<Item = NodeIndex>,
{
    let n_frames = mask.n_frames();
    for v in vertices {
        let frame = graph.vertex(v).frame;
        if frame as usize >= n_frames {
            return Err(IntegrityError::FrameBeyondMask { frame, n_frames });
        }
    }
    Ok(())
}

fn check_pixels<I>(graph: &LineageGraph, mask: &LabelMask, vertices: I) -> LineageResult<()>
where
    I: IntoIterator<Item = NodeIndex>,
{
    let vertices: Vec<NodeIndex> = vertices.into_iter().collect();
    check_frames(graph, mask, vertices.iter().copied())?;

    let mut counts: HashMap<Frame, BTreeMap<MaskId, u64>> = HashMap::new();
    for v in vertices {
        let vertex = graph.vertex(v);
        if !counts.contains_key(&vertex.frame) {
            counts.insert(vertex.frame, mask.pixel_counts(vertex.frame)?);
        }
        if !counts[&vertex.frame].contains_key(&vertex.mask_id) {
            return Err(IntegrityError::MissingPixels {
                frame: vertex.frame,
                mask_id: vertex.mask_id,
            }
            .into());
        }
    }
    Ok(())
}

/// Post-detection filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOptions {
    /// Reject events with a vertex within this many pixels of the border.
    pub border_width: Option<usize>,
    /// Reject events whose branch edges skip more frames than this.
    pub max_missing: Option<u32>,
}

impl SelectionOptions {
    /// No filtering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the border filter.
    pub fn with_border_width(mut self, width: usize) -> Self {
        self.border_width = Some(width);
        self
    }

    /// Enable the post-hoc missing-cell filter.
    pub fn with_max_missing(mut self, max_missing: u32) -> Self {
        self.max_missing = Some(max_missing);
        self
    }
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Branch edges skip too many frames.
    MissingFrames { n_missing: u32, max_missing: u32 },
    /// A member touches the raster border. Ids are the original ones.
    Border { frame: Frame, mask_id: MaskId },
}

/// A dropped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub event_id: EventId,
    #[serde(flatten)]
    pub reason: RejectionReason,
}

/// Output of [`EventSelector::select`].
#[derive(Debug, Clone)]
pub struct Selection {
    /// Graph of the kept events' vertices.
    pub graph: LineageGraph,
    /// Raster relabeled consistently with `graph`.
    pub mask: LabelMask,
    /// Event id per vertex of `graph`.
    pub vertex_events: Vec<EventId>,
    /// Records of the kept events, with relabeled ids.
    pub records: Vec<EventRecord>,
    /// Kept event ids, ascending.
    pub kept: Vec<EventId>,
    /// Dropped events, in id order per filter pass.
    pub rejected: Vec<Rejection>,
}

impl Selection {
    fn empty(mask: &LabelMask) -> Self {
        Self {
            graph: LineageGraph::new(),
            mask: LabelMask::zeros(mask.shape()),
            vertex_events: Vec::new(),
            records: Vec::new(),
            kept: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Filters detected events and relabels the survivors.
///
/// Filters run in two passes: the missing-cell filter before the first
/// relabel, the border filter on the relabeled pair before the second.
#[derive(Debug, Clone, Default)]
pub struct EventSelector {
    options: SelectionOptions,
}

impl EventSelector {
    pub fn new(options: SelectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SelectionOptions {
        &self.options
    }

    /// Select, filter and relabel the events of `assignment`.
    pub fn select(
        &self,
        graph: &LineageGraph,
        mask: &LabelMask,
        assignment: &EventAssignment,
    ) -> LineageResult<Selection> {
        if graph.is_empty() || mask.n_frames() == 0 {
            log::warn!(
                "empty input ({} vertices, {} frames); producing empty output",
                graph.vertex_count(),
                mask.n_frames()
            );
            return Ok(Selection::empty(mask));
        }
        if assignment.is_empty() {
            log::warn!("no {} events detected", assignment.kind());
        }

        let mut rejected = Vec::new();

        // Pass 1: missing-cell filter, then relabel.
        let mut surviving: Vec<&Event> = Vec::new();
        for event in assignment.events() {
            match self.options.max_missing {
                Some(max_missing) if event.n_missing > max_missing => rejected.push(Rejection {
                    event_id: event.id,
                    reason: RejectionReason::MissingFrames {
                        n_missing: event.n_missing,
                        max_missing,
                    },
                }),
                _ => surviving.push(event),
            }
        }
        let first = Relabeler::relabel(graph, mask, &members_of(&surviving, Some))?;

        // Pass 2: border filter on the relabeled pair, then relabel again.
        if let Some(width) = self.options.border_width {
            let mut touching: HashMap<Frame, HashSet<MaskId>> = HashMap::new();
            let mut kept = Vec::with_capacity(surviving.len());
            for event in surviving {
                match self.border_contact(event, &first, width, &mut touching)? {
                    Some(v) => {
                        let vertex = graph.vertex(v);
                        rejected.push(Rejection {
                            event_id: event.id,
                            reason: RejectionReason::Border {
                                frame: vertex.frame,
                                mask_id: vertex.mask_id,
                            },
                        });
                    }
                    None => kept.push(event),
                }
            }
            surviving = kept;
        }
        let second = Relabeler::relabel(
            &first.graph,
            &first.mask,
            &members_of(&surviving, |v| first.index_map.get(&v).copied()),
        )?;

        let final_index = |v: NodeIndex| {
            first
                .index_map
                .get(&v)
                .and_then(|mid| second.index_map.get(mid))
                .copied()
        };
        let ids = |members: &[NodeIndex]| -> BTreeSet<MaskId> {
            members
                .iter()
                .filter_map(|&v| final_index(v))
                .map(|v| second.graph.vertex(v).mask_id)
                .collect()
        };
        let records = surviving
            .iter()
            .map(|event| EventRecord {
                window_start: event.window_start,
                frame: event.frame,
                window_end: event.window_end,
                before_ids: ids(&event.before),
                after_ids: ids(&event.after),
            })
            .collect();

        log::info!(
            "selected {} of {} {} events ({} rejected)",
            surviving.len(),
            assignment.len(),
            assignment.kind(),
            rejected.len()
        );
        Ok(Selection {
            graph: second.graph,
            mask: second.mask,
            vertex_events: second.vertex_events,
            records,
            kept: surviving.iter().map(|e| e.id).collect(),
            rejected,
        })
    }

    /// First member (original index) touching the border in the pass-1 pair.
    fn border_contact(
        &self,
        event: &Event,
        relabeled: &Relabeled,
        width: usize,
        touching: &mut HashMap<Frame, HashSet<MaskId>>,
    ) -> LineageResult<Option<NodeIndex>> {
        for v in event.members() {
            let Some(&mid) = relabeled.index_map.get(&v) else {
                continue;
            };
            let vertex = relabeled.graph.vertex(mid);
            if !touching.contains_key(&vertex.frame) {
                let labels = relabeled.mask.labels_touching_border(vertex.frame, width)?;
                touching.insert(vertex.frame, labels);
            }
            if touching[&vertex.frame].contains(&vertex.mask_id) {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }
}

/// `(vertex, event_id)` pairs of the events' members, mapped through `map`.
fn members_of<F>(events: &[&Event], map: F) -> Vec<(NodeIndex, EventId)>
where
    F: Fn(NodeIndex) -> Option<NodeIndex>,
{
    let mut out = Vec::new();
    for event in events {
        for v in event.members() {
            if let Some(v) = map(v) {
                out.push((v, event.id));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::events::{DetectionParams, EventDetector};
    use crate::analysis::stability::StabilityAnalyzer;
    use crate::core::error::LineageError;
    use crate::core::types::{EventKind, Overlap, Vertex};
    use ndarray::{s, Array3};

    fn detect(graph: &LineageGraph, params: &DetectionParams) -> EventAssignment {
        let stability = StabilityAnalyzer::new(graph).analyze(0.0).unwrap();
        EventDetector::new(graph, &stability).detect(params)
    }

    /// Two divisions at frame 1: 1 -> {2, 3} and 4 -> {5, 6}.
    /// Mask 1 touches column 0.
    fn two_divisions() -> (LineageGraph, LabelMask) {
        let mut graph = LineageGraph::new();
        for (f, m) in [(0, 1), (1, 1), (0, 4), (1, 4), (2, 2), (2, 3), (2, 5), (2, 6)] {
            graph.add_vertex(Vertex::new(f, m, 4)).unwrap();
        }
        for (a, b) in [((0, 1), (1, 1)), ((1, 1), (2, 2)), ((1, 1), (2, 3))] {
            graph.connect(a, b, Overlap::full(2)).unwrap();
        }
        for (a, b) in [((0, 4), (1, 4)), ((1, 4), (2, 5)), ((1, 4), (2, 6))] {
            graph.connect(a, b, Overlap::full(2)).unwrap();
        }

        let mut data = Array3::<u32>::zeros((3, 8, 8));
        for f in 0..2 {
            data.slice_mut(s![f, 2..4, 0..2]).fill(1);
            data.slice_mut(s![f, 2..4, 4..6]).fill(4);
        }
        data.slice_mut(s![2, 1..3, 0..1]).fill(2);
        data.slice_mut(s![2, 4..6, 1..2]).fill(3);
        data.slice_mut(s![2, 2..3, 4..6]).fill(5);
        data.slice_mut(s![2, 4..6, 4..6]).fill(6);
        (graph, LabelMask::new(data))
    }

    fn division_params() -> DetectionParams {
        DetectionParams::new(EventKind::Division).with_stability(2, 1)
    }

    fn assert_consistent(graph: &LineageGraph, mask: &LabelMask) {
        let by_frame = graph.mask_ids_by_frame();
        for f in 0..mask.n_frames() as Frame {
            let expected = by_frame.get(&f).cloned().unwrap_or_default();
            assert_eq!(mask.labels_in_frame(f).unwrap(), expected, "frame {f}");
        }
    }

    #[test]
    fn test_select_without_filters_keeps_everything() {
        let (graph, mask) = two_divisions();
        let assignment = detect(&graph, &division_params());
        assert_eq!(assignment.len(), 2);

        let selection = EventSelector::default().select(&graph, &mask, &assignment).unwrap();
        assert_eq!(selection.kept, vec![1, 2]);
        assert!(selection.rejected.is_empty());
        assert_eq!(selection.graph.vertex_count(), 8);
        assert_consistent(&selection.graph, &selection.mask);
        assert_eq!(selection.records[1].before_ids, BTreeSet::from([4]));
    }

    #[test]
    fn test_border_filter_removes_whole_event() {
        let (graph, mask) = two_divisions();
        let assignment = detect(&graph, &division_params());
        let selector = EventSelector::new(SelectionOptions::new().with_border_width(2));
        let selection = selector.select(&graph, &mask, &assignment).unwrap();

        assert_eq!(selection.kept, vec![2]);
        assert_eq!(
            selection.rejected,
            vec![Rejection {
                event_id: 1,
                reason: RejectionReason::Border { frame: 0, mask_id: 1 },
            }]
        );

        // Survivors renumbered from 1; the rejected event's pixels are gone.
        assert_eq!(selection.graph.vertex_count(), 4);
        assert_consistent(&selection.graph, &selection.mask);
        let data = selection.mask.data();
        assert!(data.slice(s![0..2, 2..4, 0..2]).iter().all(|&l| l == 0));
        assert!(data.slice(s![0..2, 2..4, 4..6]).iter().all(|&l| l == 1));
        assert_eq!(selection.mask.labels_in_frame(2).unwrap(), BTreeSet::from([2, 3]));

        let record = &selection.records[0];
        assert_eq!(record.before_ids, BTreeSet::from([1]));
        assert_eq!(record.after_ids, BTreeSet::from([2, 3]));
        assert!(selection.vertex_events.iter().all(|&e| e == 2));
    }

    #[test]
    fn test_post_hoc_missing_filter() {
        // Mask 1 divides at frame 1 into 2 (frames 2-3) and 3 (frame 3, one gap).
        let vertices = [(0, 1), (1, 1), (2, 2), (3, 2), (3, 3)];
        let mut graph = LineageGraph::new();
        for (f, m) in vertices {
            graph.add_vertex(Vertex::new(f, m, 1)).unwrap();
        }
        graph.connect((0, 1), (1, 1), Overlap::full(1)).unwrap();
        graph.connect((1, 1), (2, 2), Overlap::full(1)).unwrap();
        graph.connect((2, 2), (3, 2), Overlap::full(1)).unwrap();
        graph.connect((1, 1), (3, 3), Overlap::full(1)).unwrap();
        let mut data = Array3::<u32>::zeros((4, 4, 4));
        for (f, m) in vertices {
            data[[f as usize, m as usize, 1]] = m;
        }
        let mask = LabelMask::new(data);

        let params = DetectionParams::new(EventKind::Division).with_stability(1, 2);
        let assignment = detect(&graph, &params);
        assert_eq!(assignment.len(), 1);

        let selector = EventSelector::new(SelectionOptions::new().with_max_missing(0));
        let selection = selector.select(&graph, &mask, &assignment).unwrap();
        assert!(selection.kept.is_empty());
        assert_eq!(
            selection.rejected[0].reason,
            RejectionReason::MissingFrames { n_missing: 1, max_missing: 0 }
        );
        assert!(selection.graph.is_empty());
        assert!(selection.mask.data().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_empty_input_produces_empty_output() {
        let graph = LineageGraph::new();
        let mask = LabelMask::zeros((0, 5, 5));
        let assignment = detect(&graph, &division_params());
        let selection = EventSelector::default().select(&graph, &mask, &assignment).unwrap();
        assert!(selection.graph.is_empty());
        assert_eq!(selection.mask.shape(), (0, 5, 5));
        assert!(selection.records.is_empty());
    }

    #[test]
    fn test_relabel_detects_missing_pixels() {
        let (graph, mask) = two_divisions();
        let mut data = mask.into_inner();
        data.slice_mut(s![2, .., ..]).mapv_inplace(|l| if l == 6 { 0 } else { l });
        let mask = LabelMask::new(data);

        let assignment = detect(&graph, &division_params());
        let err = EventSelector::default().select(&graph, &mask, &assignment).unwrap_err();
        assert!(matches!(
            err,
            LineageError::Integrity(IntegrityError::MissingPixels { frame: 2, mask_id: 6 })
        ));
    }

    #[test]
    fn test_relabel_separates_events_sharing_a_label() {
        // Label 1 is reused by two tracks in different frames.
        let mut graph = LineageGraph::new();
        let a = graph.add_vertex(Vertex::new(0, 1, 1)).unwrap();
        let b = graph.add_vertex(Vertex::new(1, 1, 1)).unwrap();
        let mut data = Array3::<u32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = 1;
        data[[1, 1, 1]] = 1;
        let mask = LabelMask::new(data);

        let relabeled = Relabeler::relabel(&graph, &mask, &[(a, 1), (b, 2)]).unwrap();
        assert_eq!(relabeled.mask.labels_in_frame(0).unwrap(), BTreeSet::from([1]));
        assert_eq!(relabeled.mask.labels_in_frame(1).unwrap(), BTreeSet::from([2]));
        assert_eq!(relabeled.vertex_events, vec![1, 2]);
        assert_eq!(relabeled.graph.find(1, 2), Some(relabeled.index_map[&b]));
    }

    #[test]
    fn test_retain_tracks_keeps_ids() {
        let (graph, mask) = two_divisions();
        let graph = graph.with_cell_tracks();
        let (kept, kept_mask) = Relabeler::retain_tracks(&graph, &mask, &BTreeSet::from([1])).unwrap();

        assert_eq!(kept.vertex_count(), 4);
        assert_eq!(kept_mask.labels_in_frame(0).unwrap(), BTreeSet::from([4]));
        assert_eq!(kept_mask.labels_in_frame(2).unwrap(), BTreeSet::from([5, 6]));
        assert_consistent(&kept, &kept_mask);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn relabel_keeps_graph_and_raster_consistent(
                pixels in proptest::collection::vec(0u32..5, 3 * 4 * 4),
                picks in proptest::collection::vec(0u32..3, 16),
            ) {
                let mask = LabelMask::from_shape_vec((3, 4, 4), pixels).unwrap();
                let mut graph = LineageGraph::new();
                for f in 0..3 {
                    for (label, count) in mask.pixel_counts(f).unwrap() {
                        graph.add_vertex(Vertex::new(f, label, count)).unwrap();
                    }
                }
                let selected: Vec<(NodeIndex, EventId)> = graph
                    .ordered_vertices()
                    .into_iter()
                    .zip(picks.iter().cycle())
                    .filter(|&(_, &event)| event != NO_EVENT)
                    .map(|(v, &event)| (v, event))
                    .collect();

                let relabeled = Relabeler::relabel(&graph, &mask, &selected).unwrap();
                let by_frame = relabeled.graph.mask_ids_by_frame();
                for f in 0..3 {
                    let expected = by_frame.get(&f).cloned().unwrap_or_default();
                    prop_assert_eq!(relabeled.mask.labels_in_frame(f).unwrap(), expected);
                }
                prop_assert_eq!(relabeled.graph.vertex_count(), selected.len());
            }
        }
    }
}
