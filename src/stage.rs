use crate::block::DataBlock;
use crate::error::Result;
use crate::metrics::format_bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single link's worth of work in the processing chain.
///
/// `process` consumes one block and produces one block, optionally with side
/// effects (accumulation, I/O at the terminal link). Implementations must
/// pass an end-of-stream block through unchanged; the chain relies on the
/// sentinel reaching every link, and does not enforce this itself.
///
/// A stage may keep private state, but it never sees the chain wiring: the
/// pipeline owns the links, so rewiring from inside `process` is impossible.
pub trait Stage: Send + 'static {
    /// Transform one block
    fn process(&mut self, block: DataBlock) -> Result<DataBlock>;

    /// Human-readable name for logging
    fn name(&self) -> &str {
        "stage"
    }
}

/// Forwards every block untouched
pub struct PassthroughStage;

impl Stage for PassthroughStage {
    fn process(&mut self, block: DataBlock) -> Result<DataBlock> {
        Ok(block)
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Checksum-style accumulator: sums the bytes of every `Vec<u8>` payload.
///
/// The running sum lives behind a shared handle so it stays observable after
/// the stage has moved into a pipeline.
pub struct AccumulatorStage {
    sum: Arc<AtomicU64>,
}

impl AccumulatorStage {
    pub fn new() -> Self {
        Self {
            sum: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the running sum; clone it out before handing the stage to
    /// a pipeline builder.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sum)
    }
}

impl Default for AccumulatorStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AccumulatorStage {
    fn process(&mut self, block: DataBlock) -> Result<DataBlock> {
        if block.is_end_of_stream() {
            return Ok(block);
        }
        let data = block.data::<Vec<u8>>()?;
        let sum: u64 = data.iter().map(|&b| b as u64).sum();
        self.sum.fetch_add(sum, Ordering::Relaxed);
        Ok(block)
    }

    fn name(&self) -> &str {
        "accumulator"
    }
}

/// Logs the data rate of `Vec<u8>` payloads flowing through it, once per
/// second, in human-readable bytes
pub struct ThroughputStage {
    window_start: Instant,
    window_bytes: u64,
    interval: Duration,
}

impl ThroughputStage {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            interval: Duration::from_secs(1),
        }
    }
}

impl Default for ThroughputStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ThroughputStage {
    fn process(&mut self, block: DataBlock) -> Result<DataBlock> {
        if block.is_end_of_stream() {
            return Ok(block);
        }
        self.window_bytes += block.data::<Vec<u8>>()?.len() as u64;
        if self.window_start.elapsed() >= self.interval {
            log::info!("data throughput: {}/s", format_bytes(self.window_bytes));
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
        Ok(block)
    }

    fn name(&self) -> &str {
        "throughput"
    }
}

/// Closure adapter for one-off stages, mostly in tests and small chains.
///
/// The closure only sees data blocks; end-of-stream sentinels are forwarded
/// without invoking it.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: FnMut(DataBlock) -> Result<DataBlock> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(DataBlock) -> Result<DataBlock> + Send + 'static,
{
    fn process(&mut self, block: DataBlock) -> Result<DataBlock> {
        if block.is_end_of_stream() {
            return Ok(block);
        }
        (self.f)(block)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_transparent() {
        let mut stage = PassthroughStage;
        let block = DataBlock::with_data(vec![1u8, 2, 3]);
        let out = stage.process(block).unwrap();
        assert_eq!(out.data::<Vec<u8>>().unwrap(), &vec![1u8, 2, 3]);
    }

    #[test]
    fn test_accumulator_sums_bytes() {
        let mut stage = AccumulatorStage::new();
        let sum = stage.counter();
        for _ in 0..3 {
            stage.process(DataBlock::with_data(vec![1u8, 2, 3])).unwrap();
        }
        assert_eq!(sum.load(Ordering::Relaxed), 18);
    }

    #[test]
    fn test_accumulator_passes_sentinel() {
        let mut stage = AccumulatorStage::new();
        let sum = stage.counter();
        let out = stage.process(DataBlock::end_of_stream()).unwrap();
        assert!(out.is_end_of_stream());
        assert_eq!(sum.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_fn_stage_transforms() {
        let mut stage = FnStage::new("double", |block: DataBlock| {
            let doubled: Vec<u8> = block.data::<Vec<u8>>()?.iter().map(|&b| b * 2).collect();
            Ok(DataBlock::with_data(doubled))
        });
        let out = stage.process(DataBlock::with_data(vec![1u8, 2])).unwrap();
        assert_eq!(out.data::<Vec<u8>>().unwrap(), &vec![2u8, 4]);
        assert_eq!(stage.name(), "double");
    }

    #[test]
    fn test_fn_stage_skips_sentinel() {
        let mut stage = FnStage::new("boom", |_| {
            panic!("closure must not see the sentinel");
        });
        let out = stage.process(DataBlock::end_of_stream()).unwrap();
        assert!(out.is_end_of_stream());
    }
}
