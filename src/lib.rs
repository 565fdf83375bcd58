//! A staged data-block pipeline with buffered, backpressure-aware links.
//!
//! Typed data blocks flow from producers through an ordered chain of
//! processing stages to a terminal consumer. Synchronous stages run on
//! whichever thread pushes into them; a buffered link interposes a bounded
//! queue and a dedicated worker thread, decoupling the producer's push rate
//! from the downstream processing rate.
//!
//! # Features
//!
//! - Immutable, cheaply cloneable [`DataBlock`]s with typed payload access
//! - Fluent chain assembly; topology is frozen before data flows
//! - Bounded buffering with blocking or spin-retry backpressure (never drops)
//! - FIFO ordering through every buffered link
//! - End-of-stream sentinel protocol for orderly shutdown, with join-on-drop
//! - Per-stage metrics: throughput and latency percentiles
//!
//! # Example
//!
//! ```ignore
//! use datastream::{BackpressurePolicy, DataBlock, PassthroughStage, PipelineBuilder};
//!
//! let mut pipeline = PipelineBuilder::new()
//!     .buffer(1000, BackpressurePolicy::Block)
//!     .stage(PassthroughStage)
//!     .build()?;
//!
//! pipeline.push(DataBlock::with_data(vec![1u8, 2, 3]))?;
//! pipeline.finish()?; // sentinel + join
//! ```

pub mod block;
pub mod buffer;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod stage;

// Re-exports for convenience
pub use block::{BlockBuilder, DataBlock};
pub use buffer::{BackpressurePolicy, BlockQueue, QueueConsumer};
pub use error::{PipelineError, Result};
pub use metrics::{format_bytes, LatencyWindow, MetricsSnapshot, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, Producer, ShutdownFlag};
pub use stage::{AccumulatorStage, FnStage, PassthroughStage, Stage, ThroughputStage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
