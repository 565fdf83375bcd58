use crate::block::DataBlock;
use crate::buffer::{BackpressurePolicy, BlockQueue, QueueConsumer};
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::stage::Stage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A synchronous link: a stage, its counters, and everything after it
struct StageLink {
    stage: Box<dyn Stage>,
    metrics: StageMetrics,
    next: Downstream,
}

/// Where a block goes after the current link.
///
/// Delivering a block runs the receiving stage's `process`, then keeps
/// pushing the result onward. The recursion stops at `End` (blocks pushed
/// past the last link are discarded) or detours through a queue at
/// `Buffered`.
enum Downstream {
    End,
    Stage(Box<StageLink>),
    Buffered(BufferedStage),
}

impl Downstream {
    fn push(&mut self, block: DataBlock) -> Result<()> {
        match self {
            Downstream::End => Ok(()),
            Downstream::Stage(link) => {
                let is_sentinel = block.is_end_of_stream();
                let started = Instant::now();
                let processed = link.stage.process(block)?;
                if !is_sentinel {
                    link.metrics.record_block(started.elapsed().as_nanos() as u64);
                }
                link.next.push(processed)
            }
            Downstream::Buffered(stage) => stage.enqueue(block),
        }
    }
}

/// A rate-decoupling link: a bounded queue plus one dedicated worker thread.
///
/// The worker exclusively owns the rest of the chain, so everything
/// downstream of a buffered link runs on the worker's thread. The worker
/// dequeues in FIFO order and never handles two blocks at once; it stops
/// after forwarding the end-of-stream sentinel.
struct BufferedStage {
    queue: BlockQueue<DataBlock>,
    worker: Option<JoinHandle<()>>,
}

impl BufferedStage {
    fn spawn(
        capacity: usize,
        policy: BackpressurePolicy,
        downstream: Downstream,
    ) -> Result<Self> {
        let (queue, consumer) = BlockQueue::bounded(capacity, policy)?;
        let worker = thread::Builder::new()
            .name("buffered-stage".into())
            .spawn(move || run_worker(consumer, downstream))
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;
        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    fn enqueue(&self, block: DataBlock) -> Result<()> {
        self.queue.push(block)
    }
}

impl Drop for BufferedStage {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // A sentinel may already have flowed through; this one makes the
            // worker stop on teardown paths (like a build error downstream)
            // where none was ever delivered. If the worker is already gone
            // the queue is closed and the push is a no-op.
            let _ = self.queue.push(DataBlock::end_of_stream());
            if worker.join().is_err() {
                log::error!("buffered stage worker panicked");
            }
        }
    }
}

/// Worker loop: dequeue, deliver downstream, repeat until the sentinel.
///
/// The sentinel is forwarded before the loop exits so downstream buffered
/// workers shut down too; dropping `downstream` on return joins them in
/// cascade. Dequeueing `None` means every producer handle is gone (a
/// teardown without a sentinel) and also ends the loop.
fn run_worker(queue: QueueConsumer<DataBlock>, mut downstream: Downstream) {
    while let Some(block) = queue.recv() {
        let is_sentinel = block.is_end_of_stream();
        if let Err(e) = downstream.push(block) {
            log::error!("buffered stage: downstream error: {e}");
        }
        if is_sentinel {
            break;
        }
    }
}

enum LinkSpec {
    Stage(Box<dyn Stage>),
    Buffer {
        capacity: usize,
        policy: BackpressurePolicy,
    },
}

/// Assembles a chain of links, in order, head first.
///
/// Assembly happens entirely before data flows: `build` validates the
/// specs, spawns every buffered worker, and returns a running [`Pipeline`]
/// whose topology is frozen.
pub struct PipelineBuilder {
    links: Vec<LinkSpec>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { links: Vec::new() }
    }

    /// Append a synchronous stage
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.links.push(LinkSpec::Stage(Box::new(stage)));
        self
    }

    /// Append a buffered link that decouples the push rate upstream of it
    /// from the processing rate downstream of it
    pub fn buffer(mut self, capacity: usize, policy: BackpressurePolicy) -> Self {
        self.links.push(LinkSpec::Buffer { capacity, policy });
        self
    }

    /// Build the chain tail-first and spawn the buffered workers.
    ///
    /// Each worker takes ownership of the chain section after its queue, so
    /// a nested buffered link is owned (and later joined) by the worker
    /// upstream of it.
    pub fn build(self) -> Result<Pipeline> {
        if self.links.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let mut metrics = Vec::new();
        let mut chain = Downstream::End;
        for link in self.links.into_iter().rev() {
            chain = match link {
                LinkSpec::Stage(stage) => {
                    let stage_metrics = StageMetrics::new();
                    metrics.push(stage_metrics.clone());
                    Downstream::Stage(Box::new(StageLink {
                        stage,
                        metrics: stage_metrics,
                        next: chain,
                    }))
                }
                LinkSpec::Buffer { capacity, policy } => {
                    Downstream::Buffered(BufferedStage::spawn(capacity, policy, chain)?)
                }
            };
        }
        metrics.reverse();

        Ok(Pipeline {
            chain,
            metrics,
            sentinel_sent: false,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running chain of processing links.
///
/// Producers feed blocks in through [`push`](Pipeline::push) (or through
/// cloned [`Producer`] handles when the first link is buffered), and
/// [`finish`](Pipeline::finish) delivers the end-of-stream sentinel and
/// joins every buffered worker. Dropping an unfinished pipeline delivers
/// the sentinel itself first, so teardown never leaves a worker blocked on
/// its queue.
pub struct Pipeline {
    chain: Downstream,
    metrics: Vec<StageMetrics>,
    sentinel_sent: bool,
}

impl Pipeline {
    /// Push one block into the head of the chain.
    ///
    /// Stage errors from links upstream of the first buffered link surface
    /// here, on the producer's thread; errors past a buffered link are
    /// logged on the worker thread instead.
    pub fn push(&mut self, block: DataBlock) -> Result<()> {
        if block.is_end_of_stream() {
            self.sentinel_sent = true;
        }
        self.chain.push(block)
    }

    /// Cloneable handle for concurrent producers.
    ///
    /// Only available when the first link is buffered: that queue is the
    /// single shared entry point several threads may push through. Pushing
    /// through a leaked handle after the pipeline has shut down stalls in
    /// the handle's own backpressure; deliver the sentinel only after all
    /// producers are done.
    pub fn producer(&self) -> Option<Producer> {
        match &self.chain {
            Downstream::Buffered(stage) => Some(Producer {
                queue: stage.queue.clone(),
            }),
            _ => None,
        }
    }

    /// Metrics for the `index`-th synchronous stage, in chain order
    pub fn stage_metrics(&self, index: usize) -> Option<&StageMetrics> {
        self.metrics.get(index)
    }

    /// One formatted line per synchronous stage
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline metrics:\n");
        for (i, metrics) in self.metrics.iter().enumerate() {
            summary.push_str(&format!("  stage {}: {}\n", i, metrics.snapshot().format()));
        }
        summary
    }

    /// Deliver the end-of-stream sentinel and wait for every buffered
    /// worker to drain and exit.
    ///
    /// Call after all producers have finished pushing. The sentinel flows
    /// through the whole chain exactly once; each worker forwards it and
    /// terminates, and the join cascade completes before this returns.
    pub fn finish(mut self) -> Result<()> {
        self.push(DataBlock::end_of_stream())
        // drop(self) joins the workers in chain order
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.sentinel_sent {
            if let Err(e) = self.chain.push(DataBlock::end_of_stream()) {
                log::warn!("pipeline teardown: sentinel push failed: {e}");
            }
        }
    }
}

/// Shared entry point into a pipeline whose first link is buffered.
///
/// Clones may push from any number of threads; their interleaving becomes
/// the queue's FIFO order.
#[derive(Clone)]
pub struct Producer {
    queue: BlockQueue<DataBlock>,
}

impl Producer {
    pub fn push(&self, block: DataBlock) -> Result<()> {
        self.queue.push(block)
    }
}

/// Cooperative stop signal for producer loops.
///
/// Set once (e.g. from a signal handler's glue code) and polled by
/// producers before each push. It only stops new blocks from entering the
/// chain; it never interrupts a worker that is blocked on its queue or
/// mid-`process`. Shutting those down is the sentinel's job.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that producer loops stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Polled by producer loops
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
