//! Benchmarks for stability analysis, event detection and selection.
use cell_lineage::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array3;

// ============================================================================
// Helper Functions
// ============================================================================

/// `n` independent lineages, each a parent over frames 0..=3 dividing into
/// two children over frames 4..=6. Every label owns one raster row.
fn division_forest(n: u32) -> (LineageGraph, LabelMask) {
    let mut graph = LineageGraph::new();
    let mut data = Array3::<u32>::zeros((7, 3 * n as usize, 2));

    for k in 1..=n {
        let children = [n + k, 2 * n + k];
        for f in 0..=3 {
            graph.add_vertex(Vertex::new(f, k, 1)).unwrap();
            data[[f as usize, (k - 1) as usize, 0]] = k;
        }
        for f in 4..=6 {
            for &c in &children {
                graph.add_vertex(Vertex::new(f, c, 1)).unwrap();
                data[[f as usize, (c - 1) as usize, 0]] = c;
            }
        }
        for f in 0..3 {
            graph.connect((f, k), (f + 1, k), Overlap::full(1)).unwrap();
        }
        for &c in &children {
            graph.connect((3, k), (4, c), Overlap::full(1)).unwrap();
            for f in 4..6 {
                graph.connect((f, c), (f + 1, c), Overlap::full(1)).unwrap();
            }
        }
    }
    (graph, LabelMask::new(data))
}

fn division_params() -> DetectionParams {
    DetectionParams::new(EventKind::Division).with_stability(3, 2)
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_stability(c: &mut Criterion) {
    let mut group = c.benchmark_group("stability");
    for &n in &[100u32, 1_000] {
        let (graph, _) = division_forest(n);
        group.throughput(Throughput::Elements(graph.vertex_count() as u64));
        group.bench_with_input(BenchmarkId::new("lineages", n), &n, |b, _| {
            b.iter(|| StabilityAnalyzer::new(black_box(&graph)).analyze(0.0).unwrap())
        });
    }
    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");
    for &n in &[100u32, 1_000] {
        let (graph, _) = division_forest(n);
        let stability = StabilityAnalyzer::new(&graph).analyze(0.0).unwrap();
        let params = division_params();
        group.bench_with_input(BenchmarkId::new("lineages", n), &n, |b, _| {
            b.iter(|| EventDetector::new(black_box(&graph), &stability).detect(&params))
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    group.sample_size(20);
    for &n in &[100u32, 1_000] {
        let (graph, mask) = division_forest(n);
        let stability = StabilityAnalyzer::new(&graph).analyze(0.0).unwrap();
        let assignment = EventDetector::new(&graph, &stability).detect(&division_params());
        let selector = EventSelector::new(SelectionOptions::new().with_border_width(1));
        group.bench_with_input(BenchmarkId::new("lineages", n), &n, |b, _| {
            b.iter(|| selector.select(black_box(&graph), &mask, &assignment).unwrap())
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let (graph, mask) = division_forest(500);
    let pipeline = EventPipeline::new(PipelineConfig::default().with_events(division_params()));
    c.bench_function("pipeline_500_lineages", |b| {
        b.iter(|| pipeline.run(black_box(&graph), &mask).unwrap())
    });
}

criterion_group!(
    benches,
    bench_stability,
    bench_detection,
    bench_selection,
    bench_full_pipeline
);
criterion_main!(benches);
