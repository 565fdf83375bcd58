use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of per-block processing latencies
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window: usize,
}

impl LatencyWindow {
    /// Create a window keeping the most recent `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window))),
            window,
        }
    }

    /// Record one sample (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// Median latency in microseconds
    pub fn p50_micros(&self) -> f64 {
        self.percentile_micros(0.50)
    }

    /// 99th-percentile latency in microseconds
    pub fn p99_micros(&self) -> f64 {
        self.percentile_micros(0.99)
    }

    fn percentile_micros(&self, p: f64) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of samples currently in the window
    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Per-stage counters, shared between the chain link that records into them
/// and the pipeline handle that reads them
#[derive(Debug, Clone)]
pub struct StageMetrics {
    blocks_processed: Arc<AtomicU64>,
    latency: LatencyWindow,
    started: Instant,
}

impl StageMetrics {
    /// Fresh counters; throughput is measured from this moment
    pub fn new() -> Self {
        Self {
            blocks_processed: Arc::new(AtomicU64::new(0)),
            latency: LatencyWindow::new(1000),
            started: Instant::now(),
        }
    }

    /// Record one processed data block and its processing latency
    pub fn record_block(&self, latency_nanos: u64) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency_nanos);
    }

    /// Total data blocks processed so far
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Average throughput since creation, in blocks per second
    pub fn blocks_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.blocks_processed() as f64 / elapsed
        }
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocks_processed: self.blocks_processed(),
            blocks_per_sec: self.blocks_per_sec(),
            latency_p50_micros: self.latency.p50_micros(),
            latency_p99_micros: self.latency.p99_micros(),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of one stage's metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub blocks_processed: u64,
    pub blocks_per_sec: f64,
    pub latency_p50_micros: f64,
    pub latency_p99_micros: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Human-readable one-liner
    pub fn format(&self) -> String {
        format!(
            "Blocks: {}, Throughput: {:.2} blk/s, Latency P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.blocks_processed,
            self.blocks_per_sec,
            self.latency_p50_micros,
            self.latency_p99_micros,
            self.elapsed.as_secs_f64()
        )
    }
}

const BYTE_SUFFIXES: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Pretty-print a byte count with a binary-scaled suffix
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_SUFFIXES.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, BYTE_SUFFIXES[0])
    } else {
        format!("{:.2} {}", value, BYTE_SUFFIXES[unit])
    }
}
