//! Fusion and division event detection.
//!
//! Candidates are visited in ascending `(frame, mask_id)` order. A candidate
//! becomes an event when:
//! 1. its topology matches the event kind (see [`LineageGraph::is_division`]
//!    and [`LineageGraph::is_fusion`]);
//! 2. the stable regions around it cover `stable_before` frames up to the
//!    event and `stable_after` frames after it;
//! 3. the frames skipped by its branch edges do not exceed `max_missing`;
//! 4. every expected neighbour shows up in its window;
//! 5. no vertex of its windows already belongs to an earlier event.
//!
//! Rule 5 makes the result order-sensitive, which is why the visiting order
//! is fixed rather than taken from the container.

use crate::analysis::stability::StabilityReport;
use crate::core::types::{BranchProximity, EventId, EventKind, Frame, MaskId, NO_EVENT};
use crate::graph::structure::LineageGraph;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parameters of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Event kind to look for.
    pub kind: EventKind,
    /// Minimum stable frames up to and including the event.
    pub stable_before: u32,
    /// Minimum stable frames after the event.
    pub stable_after: u32,
    /// Maximum total of skipped frames on the branch edges.
    pub max_missing: Option<u32>,
    /// How far away other branching events must be.
    pub branch_proximity: BranchProximity,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            kind: EventKind::Fusion,
            stable_before: 0,
            stable_after: 0,
            max_missing: None,
            branch_proximity: BranchProximity::Immediate,
        }
    }
}

impl DetectionParams {
    /// Parameters for the given kind with no stability requirement.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Set the stability requirements.
    pub fn with_stability(mut self, stable_before: u32, stable_after: u32) -> Self {
        self.stable_before = stable_before;
        self.stable_after = stable_after;
        self
    }

    /// Set the missing-frame tolerance.
    pub fn with_max_missing(mut self, max_missing: u32) -> Self {
        self.max_missing = Some(max_missing);
        self
    }

    /// Set the branch proximity policy.
    pub fn with_branch_proximity(mut self, policy: BranchProximity) -> Self {
        self.branch_proximity = policy;
        self
    }

    /// Frames covered by the before window (at least one).
    fn window_before(&self) -> u32 {
        self.stable_before.max(1)
    }

    /// Frames covered by the after window (at least one).
    fn window_after(&self) -> u32 {
        self.stable_after.max(1)
    }
}

/// Exported tuple of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// First frame of the window.
    pub window_start: Frame,
    /// Nominal event frame.
    pub frame: Frame,
    /// Last frame of the window.
    pub window_end: Frame,
    /// Mask ids before the event.
    pub before_ids: BTreeSet<MaskId>,
    /// Mask ids after the event.
    pub after_ids: BTreeSet<MaskId>,
}

impl EventRecord {
    /// Column header.
    pub fn header(delimiter: char) -> String {
        ["window_start", "frame", "window_end", "before_ids", "after_ids"].join(&delimiter.to_string())
    }

    /// One delimited row. Id sets are space-separated within their cell.
    pub fn to_row(&self, delimiter: char) -> String {
        let ids = |set: &BTreeSet<MaskId>| {
            set.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };
        format!(
            "{start}{d}{frame}{d}{end}{d}{before}{d}{after}",
            start = self.window_start,
            frame = self.frame,
            end = self.window_end,
            before = ids(&self.before_ids),
            after = ids(&self.after_ids),
            d = delimiter
        )
    }
}

/// An accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event id, starting at 1.
    pub id: EventId,
    /// Event kind.
    pub kind: EventKind,
    /// The branching vertex.
    pub vertex: NodeIndex,
    /// Frame of the branching vertex.
    pub frame: Frame,
    /// First frame of the window.
    pub window_start: Frame,
    /// Last frame of the window.
    pub window_end: Frame,
    /// Window vertices before the event.
    pub before: Vec<NodeIndex>,
    /// Window vertices after the event.
    pub after: Vec<NodeIndex>,
    /// Mask ids of `before`.
    pub before_ids: BTreeSet<MaskId>,
    /// Mask ids of `after`.
    pub after_ids: BTreeSet<MaskId>,
    /// Frames skipped by the branch edges.
    pub n_missing: u32,
}

impl Event {
    /// All window vertices.
    pub fn members(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.before.iter().chain(self.after.iter()).copied()
    }

    /// Exported tuple, with ids as in the analysed graph.
    pub fn record(&self) -> EventRecord {
        EventRecord {
            window_start: self.window_start,
            frame: self.frame,
            window_end: self.window_end,
            before_ids: self.before_ids.clone(),
            after_ids: self.after_ids.clone(),
        }
    }
}

/// Result of a detection run: events plus the per-vertex event id.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAssignment {
    kind: EventKind,
    event_ids: Vec<EventId>,
    events: Vec<Event>,
}

impl EventAssignment {
    /// Event kind of the run.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Event id of a vertex, `0` when unassigned.
    pub fn event_id(&self, v: NodeIndex) -> EventId {
        self.event_ids.get(v.index()).copied().unwrap_or(NO_EVENT)
    }

    /// Accepted events in id order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of accepted events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event was accepted.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Exported tuples in id order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.events.iter().map(Event::record).collect()
    }
}

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Unstable,
    TooManyMissing,
    MissingNeighbour,
    BranchInWindow,
    Conflict,
}

/// Scans a stability-annotated graph for events.
pub struct EventDetector<'a> {
    graph: &'a LineageGraph,
    stability: &'a StabilityReport,
}

impl<'a> EventDetector<'a> {
    /// Create a detector over a graph and its stability report.
    pub fn new(graph: &'a LineageGraph, stability: &'a StabilityReport) -> Self {
        Self { graph, stability }
    }

    /// Candidate vertices of the given kind, ignoring stability.
    pub fn candidates(&self, kind: EventKind) -> Vec<NodeIndex> {
        self.graph
            .ordered_vertices()
            .into_iter()
            .filter(|&v| match kind {
                EventKind::Division => self.graph.is_division(v),
                EventKind::Fusion => self.graph.is_fusion(v),
            })
            .collect()
    }

    /// Run detection.
    pub fn detect(&self, params: &DetectionParams) -> EventAssignment {
        let mut event_ids = vec![NO_EVENT; self.graph.vertex_count()];
        let mut events: Vec<Event> = Vec::new();
        let mut skipped = [0usize; 5];

        for v in self.candidates(params.kind) {
            let proposal = match params.kind {
                EventKind::Division => self.propose_division(v, params),
                EventKind::Fusion => self.propose_fusion(v, params),
            };
            let mut event = match proposal {
                Ok(event) => event,
                Err(reason) => {
                    skipped[reason as usize] += 1;
                    continue;
                }
            };
            if event.members().any(|m| event_ids[m.index()] != NO_EVENT) {
                skipped[Skip::Conflict as usize] += 1;
                continue;
            }

            event.id = events.len() as EventId + 1;
            for m in event.members() {
                event_ids[m.index()] = event.id;
            }
            events.push(event);
        }

        log::debug!(
            "{} detection: {} events (skipped: {} unstable, {} missing frames, {} missing neighbour, {} branched window, {} conflicts)",
            params.kind,
            events.len(),
            skipped[Skip::Unstable as usize],
            skipped[Skip::TooManyMissing as usize],
            skipped[Skip::MissingNeighbour as usize],
            skipped[Skip::BranchInWindow as usize],
            skipped[Skip::Conflict as usize],
        );

        EventAssignment {
            kind: params.kind,
            event_ids,
            events,
        }
    }

    fn propose_division(&self, v: NodeIndex, params: &DetectionParams) -> Result<Event, Skip> {
        let graph = self.graph;
        let frame = graph.vertex(v).frame;
        let children = graph.successors(v);

        if frame - self.stability.frame_start(v) + 1 < params.stable_before {
            return Err(Skip::Unstable);
        }
        if children
            .iter()
            .any(|&c| self.stability.frame_end(c).saturating_sub(frame) < params.stable_after)
        {
            return Err(Skip::Unstable);
        }

        let n_missing = graph.missing_frames(graph.out_edges(v));
        if params.max_missing.map_or(false, |m| n_missing > m) {
            return Err(Skip::TooManyMissing);
        }

        let window_start = (frame + 1).saturating_sub(params.window_before());
        let window_end = frame + params.window_after();
        let before = self.stability.region_window(v, graph, window_start, frame);
        let after = self.window_of(&children, frame + 1, window_end)?;

        self.build_event(params, v, frame, window_start, window_end, before, after, n_missing)
    }

    fn propose_fusion(&self, v: NodeIndex, params: &DetectionParams) -> Result<Event, Skip> {
        let graph = self.graph;
        let frame = graph.vertex(v).frame;
        let parents = graph.predecessors(v);

        if self.stability.frame_end(v) - frame + 1 < params.stable_after {
            return Err(Skip::Unstable);
        }
        if parents
            .iter()
            .any(|&p| frame.saturating_sub(self.stability.frame_start(p)) < params.stable_before)
        {
            return Err(Skip::Unstable);
        }

        let n_missing = graph.missing_frames(graph.in_edges(v));
        if params.max_missing.map_or(false, |m| n_missing > m) {
            return Err(Skip::TooManyMissing);
        }

        let window_start = frame.saturating_sub(params.window_before());
        let window_end = frame + params.window_after() - 1;
        let before = self.window_of(&parents, window_start, frame.saturating_sub(1))?;
        let after = self.stability.region_window(v, graph, frame, window_end);

        self.build_event(params, v, frame, window_start, window_end, before, after, n_missing)
    }

    /// Union of the neighbours' region windows. Fails when a neighbour
    /// itself falls outside the window.
    fn window_of(&self, neighbours: &[NodeIndex], start: Frame, end: Frame) -> Result<Vec<NodeIndex>, Skip> {
        let mut out = Vec::new();
        for &n in neighbours {
            let window = self.stability.region_window(n, self.graph, start, end);
            if !window.contains(&n) {
                return Err(Skip::MissingNeighbour);
            }
            out.extend(window);
        }
        out.sort_by_key(|&m| self.graph.vertex(m).key());
        out.dedup();
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_event(
        &self,
        params: &DetectionParams,
        v: NodeIndex,
        frame: Frame,
        window_start: Frame,
        window_end: Frame,
        before: Vec<NodeIndex>,
        after: Vec<NodeIndex>,
        n_missing: u32,
    ) -> Result<Event, Skip> {
        if params.branch_proximity == BranchProximity::Window
            && before
                .iter()
                .chain(after.iter())
                .any(|&m| m != v && !self.graph.is_unbranched(m))
        {
            return Err(Skip::BranchInWindow);
        }

        let ids = |members: &[NodeIndex]| -> BTreeSet<MaskId> {
            members.iter().map(|&m| self.graph.vertex(m).mask_id).collect()
        };
        Ok(Event {
            id: NO_EVENT,
            kind: params.kind,
            vertex: v,
            frame,
            window_start,
            window_end,
            before_ids: ids(&before),
            after_ids: ids(&after),
            before,
            after,
            n_missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stability::StabilityAnalyzer;
    use crate::core::types::{Overlap, Vertex};

    fn add_chain(graph: &mut LineageGraph, mask_id: MaskId, frames: std::ops::RangeInclusive<Frame>) {
        for f in frames.clone() {
            graph.add_vertex(Vertex::new(f, mask_id, 10)).unwrap();
        }
        for f in *frames.start()..*frames.end() {
            graph.connect((f, mask_id), (f + 1, mask_id), Overlap::full(10)).unwrap();
        }
    }

    fn detect(graph: &LineageGraph, params: &DetectionParams) -> EventAssignment {
        let stability = StabilityAnalyzer::new(graph).analyze(0.0).unwrap();
        EventDetector::new(graph, &stability).detect(params)
    }

    /// Mask 1 over frames 0..=3 dividing into masks 2 and 3 over 4..=5.
    fn division_graph() -> LineageGraph {
        let mut graph = LineageGraph::new();
        add_chain(&mut graph, 1, 0..=3);
        add_chain(&mut graph, 2, 4..=5);
        add_chain(&mut graph, 3, 4..=5);
        graph.connect((3, 1), (4, 2), Overlap::full(5)).unwrap();
        graph.connect((3, 1), (4, 3), Overlap::full(5)).unwrap();
        graph
    }

    /// Masks 1 and 2 fusing into mask 3 at frame 5. When `gap` is set,
    /// mask 2 is absent at frame 4.
    fn fusion_graph(gap: bool) -> LineageGraph {
        let mut graph = LineageGraph::new();
        add_chain(&mut graph, 1, 0..=4);
        add_chain(&mut graph, 2, 0..=if gap { 3 } else { 4 });
        add_chain(&mut graph, 3, 5..=7);
        graph.connect((4, 1), (5, 3), Overlap::full(5)).unwrap();
        let last = if gap { 3 } else { 4 };
        graph.connect((last, 2), (5, 3), Overlap::full(5)).unwrap();
        graph
    }

    /// Masks 1 and 2 (frames `parents_from..=1`) fuse into mask 3 at frame 2;
    /// mask 3 then fuses with mask 4 into mask 5 at frame 4.
    fn chained_fusions(parents_from: Frame) -> LineageGraph {
        let mut graph = LineageGraph::new();
        add_chain(&mut graph, 1, parents_from..=1);
        add_chain(&mut graph, 2, parents_from..=1);
        add_chain(&mut graph, 3, 2..=3);
        add_chain(&mut graph, 4, 0..=3);
        add_chain(&mut graph, 5, 4..=5);
        graph.connect((1, 1), (2, 3), Overlap::full(5)).unwrap();
        graph.connect((1, 2), (2, 3), Overlap::full(5)).unwrap();
        graph.connect((3, 3), (4, 5), Overlap::full(5)).unwrap();
        graph.connect((3, 4), (4, 5), Overlap::full(5)).unwrap();
        graph
    }

    #[test]
    fn test_division_scenario() {
        let graph = division_graph();
        let params = DetectionParams::new(EventKind::Division).with_stability(3, 2);
        let assignment = detect(&graph, &params);

        assert_eq!(assignment.len(), 1);
        let event = &assignment.events()[0];
        assert_eq!(event.id, 1);
        assert_eq!(event.frame, 3);
        assert_eq!(event.before_ids, BTreeSet::from([1]));
        assert_eq!(event.after_ids, BTreeSet::from([2, 3]));
        assert_eq!((event.window_start, event.window_end), (1, 5));

        // Frame 0 lies outside the before window.
        assert_eq!(assignment.event_id(graph.find(0, 1).unwrap()), NO_EVENT);
        assert_eq!(assignment.event_id(graph.find(1, 1).unwrap()), 1);
        assert_eq!(assignment.event_id(graph.find(5, 3).unwrap()), 1);
    }

    #[test]
    fn test_division_requires_stability() {
        let graph = division_graph();
        let params = DetectionParams::new(EventKind::Division).with_stability(5, 2);
        assert!(detect(&graph, &params).is_empty());

        let params = DetectionParams::new(EventKind::Division).with_stability(3, 3);
        assert!(detect(&graph, &params).is_empty());
    }

    #[test]
    fn test_wrong_kind_finds_nothing() {
        let graph = division_graph();
        assert!(detect(&graph, &DetectionParams::new(EventKind::Fusion)).is_empty());
    }

    #[test]
    fn test_fusion_detected() {
        let graph = fusion_graph(false);
        let params = DetectionParams::new(EventKind::Fusion).with_stability(2, 3);
        let assignment = detect(&graph, &params);

        assert_eq!(assignment.len(), 1);
        let record = &assignment.records()[0];
        assert_eq!(record.frame, 5);
        assert_eq!(record.window_start, 3);
        assert_eq!(record.window_end, 7);
        assert_eq!(record.before_ids, BTreeSet::from([1, 2]));
        assert_eq!(record.after_ids, BTreeSet::from([3]));
    }

    #[test]
    fn test_fusion_with_gap_rejected_by_missing_filter() {
        let graph = fusion_graph(true);
        let params = DetectionParams::new(EventKind::Fusion).with_max_missing(0);
        assert!(detect(&graph, &params).is_empty());

        // Tolerating the gap, the late parent still falls outside a one-frame window.
        let params = DetectionParams::new(EventKind::Fusion).with_max_missing(1);
        assert!(detect(&graph, &params).is_empty());

        // A two-frame window reaches it.
        let params = DetectionParams::new(EventKind::Fusion)
            .with_stability(2, 1)
            .with_max_missing(1);
        let assignment = detect(&graph, &params);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.events()[0].n_missing, 1);
    }

    #[test]
    fn test_first_detected_event_wins() {
        // Two divisions sharing a stable stretch between them:
        // mask 1 divides at frame 1 into 2 and 3; mask 2 divides at frame 3.
        let mut graph = LineageGraph::new();
        add_chain(&mut graph, 1, 0..=1);
        add_chain(&mut graph, 2, 2..=3);
        add_chain(&mut graph, 3, 2..=5);
        add_chain(&mut graph, 4, 4..=5);
        add_chain(&mut graph, 5, 4..=5);
        graph.connect((1, 1), (2, 2), Overlap::full(5)).unwrap();
        graph.connect((1, 1), (2, 3), Overlap::full(5)).unwrap();
        graph.connect((3, 2), (4, 4), Overlap::full(5)).unwrap();
        graph.connect((3, 2), (4, 5), Overlap::full(5)).unwrap();

        let params = DetectionParams::new(EventKind::Division).with_stability(1, 2);
        let assignment = detect(&graph, &params);

        // The second division's before window (mask 2 at frame 3) overlaps
        // the first division's after window.
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.events()[0].frame, 1);
        assert_eq!(assignment.event_id(graph.find(3, 2).unwrap()), 1);
        assert_eq!(assignment.event_id(graph.find(4, 4).unwrap()), NO_EVENT);
    }

    #[test]
    fn test_first_detected_fusion_wins() {
        let graph = chained_fusions(0);
        let params = DetectionParams::new(EventKind::Fusion).with_stability(2, 2);
        let stability = StabilityAnalyzer::new(&graph).analyze(0.0).unwrap();
        let candidates = EventDetector::new(&graph, &stability).candidates(EventKind::Fusion);
        assert_eq!(candidates.len(), 2);

        let assignment = detect(&graph, &params);
        // Mask 3 is the after window of the first fusion and a parent of the
        // second, so the later fusion is skipped.
        assert_eq!(assignment.len(), 1);
        let event = &assignment.events()[0];
        assert_eq!(event.frame, 2);
        assert_eq!(event.before_ids, BTreeSet::from([1, 2]));
        assert_eq!(event.after_ids, BTreeSet::from([3]));
        assert_eq!(assignment.event_id(graph.find(3, 3).unwrap()), 1);
        assert_eq!(assignment.event_id(graph.find(4, 5).unwrap()), NO_EVENT);
        assert_eq!(assignment.event_id(graph.find(3, 4).unwrap()), NO_EVENT);
    }

    #[test]
    fn test_window_policy_rejects_fusion_behind_fusion() {
        // Parents of the first fusion are too short-lived to qualify, so
        // only the second fusion is a candidate. Its before window reaches
        // the first fusion vertex.
        let graph = chained_fusions(1);

        let immediate = DetectionParams::new(EventKind::Fusion).with_stability(2, 2);
        let assignment = detect(&graph, &immediate);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.events()[0].frame, 4);
        assert_eq!(assignment.events()[0].before_ids, BTreeSet::from([3, 4]));

        let window = immediate.with_branch_proximity(BranchProximity::Window);
        assert!(detect(&graph, &window).is_empty());
    }

    #[test]
    fn test_events_never_share_vertices() {
        let mut graph = division_graph();
        add_chain(&mut graph, 7, 0..=3);
        add_chain(&mut graph, 8, 4..=5);
        add_chain(&mut graph, 9, 4..=5);
        graph.connect((3, 7), (4, 8), Overlap::full(5)).unwrap();
        graph.connect((3, 7), (4, 9), Overlap::full(5)).unwrap();

        let params = DetectionParams::new(EventKind::Division).with_stability(2, 2);
        let assignment = detect(&graph, &params);
        assert_eq!(assignment.len(), 2);

        let mut seen = BTreeSet::new();
        for event in assignment.events() {
            for m in event.members() {
                assert!(seen.insert(m), "vertex in two events");
                assert_eq!(assignment.event_id(m), event.id);
            }
        }
        // Ids follow (frame, mask_id) order of the dividing vertices.
        assert_eq!(assignment.events()[0].before_ids, BTreeSet::from([1]));
        assert_eq!(assignment.events()[1].before_ids, BTreeSet::from([7]));
    }

    #[test]
    fn test_window_policy_rejects_branch_inside_window() {
        // Division at frame 1; child mask 2 divides again at frame 3.
        let mut graph = LineageGraph::new();
        add_chain(&mut graph, 1, 0..=1);
        add_chain(&mut graph, 2, 2..=3);
        add_chain(&mut graph, 3, 2..=4);
        add_chain(&mut graph, 4, 4..=4);
        add_chain(&mut graph, 5, 4..=4);
        graph.connect((1, 1), (2, 2), Overlap::full(5)).unwrap();
        graph.connect((1, 1), (2, 3), Overlap::full(5)).unwrap();
        graph.connect((3, 2), (4, 4), Overlap::full(5)).unwrap();
        graph.connect((3, 2), (4, 5), Overlap::full(5)).unwrap();

        let immediate = DetectionParams::new(EventKind::Division).with_stability(1, 2);
        let assignment = detect(&graph, &immediate);
        assert_eq!(assignment.events()[0].frame, 1);

        let window = immediate.with_branch_proximity(BranchProximity::Window);
        let assignment = detect(&graph, &window);
        assert!(assignment.events().iter().all(|e| e.frame != 1));
    }

    #[test]
    fn test_record_rows() {
        let record = EventRecord {
            window_start: 1,
            frame: 3,
            window_end: 5,
            before_ids: BTreeSet::from([1]),
            after_ids: BTreeSet::from([2, 3]),
        };
        assert_eq!(EventRecord::header(','), "window_start,frame,window_end,before_ids,after_ids");
        assert_eq!(record.to_row(','), "1,3,5,1,2 3");
        assert_eq!(record.to_row('\t'), "1\t3\t5\t1\t2 3");
    }
}
