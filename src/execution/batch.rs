//! Parallel processing of independent samples.
//!
//! A sample is one raster (`<name>.npy`) and its graph (`<name>.graphmlz`
//! or `<name>.json.gz`) in the same directory. Each worker loads its own
//! copies, so samples share no mutable state. A failing sample is reported
//! and the others continue; cancellation stops samples that have not
//! started yet.

use crate::core::error::{BatchError, LineageResult};
use crate::execution::io;
use crate::execution::pipeline::{EventPipeline, PipelineOutput};
use crate::execution::progress::ProgressTracker;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Graph file suffixes paired with each raster, in order of preference.
pub const GRAPH_SUFFIXES: [&str; 2] = [".graphmlz", ".json.gz"];

/// One raster/graph input pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// File stem shared by both inputs.
    pub name: String,
    pub mask_path: PathBuf,
    pub graph_path: PathBuf,
}

impl Sample {
    /// Sample for a raster path, with its graph next to it.
    ///
    /// The first existing graph file wins; without one the path points at
    /// the preferred `.graphmlz` name.
    pub fn from_mask_path(mask_path: &Path) -> Self {
        let name = mask_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let candidates: Vec<PathBuf> = GRAPH_SUFFIXES
            .iter()
            .map(|suffix| mask_path.with_file_name(format!("{}{}", name, suffix)))
            .collect();
        let graph_path = candidates
            .iter()
            .find(|p| p.is_file())
            .unwrap_or(&candidates[0])
            .clone();
        Self {
            name,
            mask_path: mask_path.to_path_buf(),
            graph_path,
        }
    }

    /// Find every `.npy` raster matching `pattern` and pair it with its graph.
    pub fn discover(pattern: &str) -> Result<Vec<Sample>, BatchError> {
        let paths = glob::glob(pattern).map_err(|e| BatchError::InvalidPattern {
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?;

        let mut samples = Vec::new();
        for path in paths.filter_map(Result::ok) {
            if path.extension().and_then(|e| e.to_str()) != Some("npy") {
                continue;
            }
            let sample = Sample::from_mask_path(&path);
            if !sample.graph_path.is_file() {
                return Err(BatchError::MissingGraph {
                    mask: sample.mask_path.display().to_string(),
                    graph: sample.graph_path.display().to_string(),
                });
            }
            samples.push(sample);
        }

        if samples.is_empty() {
            return Err(BatchError::NoInputsFound {
                pattern: pattern.to_string(),
            });
        }
        samples.sort_by(|a, b| a.mask_path.cmp(&b.mask_path));
        Ok(samples)
    }
}

/// Outcome of one successful sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSummary {
    pub n_detected: usize,
    pub n_selected: usize,
    pub n_rejected: usize,
    pub n_warnings: usize,
    pub duration_ms: u64,
}

impl SampleSummary {
    fn of(output: &PipelineOutput, duration_ms: u64) -> Self {
        Self {
            n_detected: output.n_detected,
            n_selected: output.records.len(),
            n_rejected: output.rejected.len(),
            n_warnings: output.report.warnings.len(),
            duration_ms,
        }
    }
}

/// Outcome of one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub name: String,
    /// Summary, or the error message of a failed sample.
    pub result: Result<SampleSummary, String>,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// One report per sample, in input order.
    pub reports: Vec<SampleReport>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Runs the pipeline over many samples in parallel.
pub struct BatchRunner {
    pipeline: EventPipeline,
    output_dir: Option<PathBuf>,
}

impl BatchRunner {
    pub fn new(pipeline: EventPipeline) -> Self {
        Self {
            pipeline,
            output_dir: None,
        }
    }

    /// Write `<name>.json.gz`, `<name>.npy` and `<name>_events.tsv` for
    /// every successful sample into `dir`.
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Process `samples`, reporting through a fresh tracker.
    pub fn run(&self, samples: &[Sample]) -> Result<BatchSummary, BatchError> {
        self.run_with_tracker(samples, &ProgressTracker::new(samples.len()))
    }

    /// Process `samples`, reporting through `tracker`.
    ///
    /// Returns [`BatchError::Cancelled`] when the tracker was cancelled
    /// before every sample ran.
    pub fn run_with_tracker(
        &self,
        samples: &[Sample],
        tracker: &ProgressTracker,
    ) -> Result<BatchSummary, BatchError> {
        tracker.start();
        log::info!("batch: processing {} samples", samples.len());

        let reports: Vec<Option<SampleReport>> = samples
            .par_iter()
            .map(|sample| {
                if tracker.is_cancelled() {
                    return None;
                }
                tracker.sample_started(&sample.name);
                let start = Instant::now();
                let result = match self.process(sample) {
                    Ok(output) => {
                        let duration_ms = start.elapsed().as_millis() as u64;
                        tracker.sample_completed(&sample.name, duration_ms);
                        Ok(SampleSummary::of(&output, duration_ms))
                    }
                    Err(e) => {
                        log::warn!("sample {} failed: {}", sample.name, e);
                        tracker.sample_failed(&sample.name, e.to_string());
                        Err(e.to_string())
                    }
                };
                Some(SampleReport {
                    name: sample.name.clone(),
                    result,
                })
            })
            .collect();

        tracker.complete();
        if reports.iter().any(Option::is_none) {
            return Err(BatchError::Cancelled {
                completed: tracker.finished(),
                total: samples.len(),
            });
        }

        let summary = BatchSummary {
            reports: reports.into_iter().flatten().collect(),
        };
        log::info!(
            "batch: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        );
        Ok(summary)
    }

    fn process(&self, sample: &Sample) -> LineageResult<PipelineOutput> {
        let graph = io::load_graph(&sample.graph_path)?;
        let mask = io::load_mask(&sample.mask_path)?;
        let output = self.pipeline.run(&graph, &mask)?;

        if let Some(dir) = &self.output_dir {
            // Results keep the input's graph format.
            let graph_name = sample
                .graph_path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| format!("{}{}", sample.name, GRAPH_SUFFIXES[0]).into());
            io::save_graph(dir.join(graph_name), &output.graph)?;
            io::save_mask(dir.join(format!("{}.npy", sample.name)), &output.mask)?;
            io::save_records(dir.join(format!("{}_events.tsv", sample.name)), &output.records)?;
        }
        Ok(output)
    }
}
