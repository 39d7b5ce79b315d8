//! Progress tracking for batch runs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// The batch has started.
    Started { total_samples: usize },
    /// A sample has started processing.
    SampleStarted { name: String, total: usize },
    /// A sample has completed processing.
    SampleCompleted {
        name: String,
        duration_ms: u64,
        index: usize,
        total: usize,
    },
    /// A sample failed; other samples continue.
    SampleFailed { name: String, message: String },
    /// Overall progress percentage.
    Progress {
        percent: f32,
        elapsed_ms: u64,
        estimated_remaining_ms: Option<u64>,
    },
    /// The batch has completed.
    Completed {
        total_duration_ms: u64,
        samples_processed: usize,
        samples_failed: usize,
    },
    /// The batch was cancelled.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks batch progress and allows cancellation.
///
/// All methods take `&self` so a tracker can be shared between worker
/// threads and a controlling thread.
pub struct ProgressTracker {
    /// Total number of samples to process.
    total_samples: usize,
    /// Number of samples completed.
    completed: AtomicU64,
    /// Number of samples failed.
    failed: AtomicU64,
    /// Whether the batch is cancelled.
    cancelled: AtomicBool,
    /// Start time.
    start_time: Mutex<Option<Instant>>,
    /// Progress callback.
    callback: Option<ProgressCallback>,
    /// Sample durations for estimation.
    sample_times: Mutex<Vec<u64>>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new(total_samples: usize) -> Self {
        Self {
            total_samples,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: Mutex::new(None),
            callback: None,
            sample_times: Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Total number of samples.
    pub fn total(&self) -> usize {
        self.total_samples
    }

    /// Start tracking.
    pub fn start(&self) {
        *self.start_time.lock() = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            total_samples: self.total_samples,
        });
    }

    /// Report that a sample has started.
    pub fn sample_started(&self, name: &str) {
        self.send_update(ProgressUpdate::SampleStarted {
            name: name.to_string(),
            total: self.total_samples,
        });
    }

    /// Report that a sample has completed.
    pub fn sample_completed(&self, name: &str, duration_ms: u64) {
        let index = self.completed.fetch_add(1, Ordering::Relaxed) as usize + 1;
        self.sample_times.lock().push(duration_ms);

        self.send_update(ProgressUpdate::SampleCompleted {
            name: name.to_string(),
            duration_ms,
            index,
            total: self.total_samples,
        });
        self.send_progress_update();
    }

    /// Report that a sample failed.
    pub fn sample_failed(&self, name: &str, message: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::SampleFailed {
            name: name.to_string(),
            message,
        });
        self.send_progress_update();
    }

    /// Number of samples finished, successfully or not.
    pub fn finished(&self) -> usize {
        (self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)) as usize
    }

    /// Check if the batch should be cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation. Samples already running finish normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Complete tracking.
    pub fn complete(&self) {
        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: self.elapsed_ms(),
            samples_processed: self.completed.load(Ordering::Relaxed) as usize,
            samples_failed: self.failed.load(Ordering::Relaxed) as usize,
        });
    }

    /// Get current progress percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.total_samples == 0 {
            return 100.0;
        }
        (self.finished() as f32 / self.total_samples as f32) * 100.0
    }

    /// Estimate remaining time in milliseconds.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let times = self.sample_times.lock();
        if times.is_empty() {
            return None;
        }

        let avg_time: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let remaining = self.total_samples.saturating_sub(self.finished());
        Some(avg_time * remaining as u64)
    }

    fn elapsed_ms(&self) -> u64 {
        let start = *self.start_time.lock();
        start.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self) {
        self.send_update(ProgressUpdate::Progress {
            percent: self.progress_percent(),
            elapsed_ms: self.elapsed_ms(),
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}
