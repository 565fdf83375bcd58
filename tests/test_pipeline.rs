use datastream::{
    AccumulatorStage, BackpressurePolicy, DataBlock, FnStage, PassthroughStage, PipelineBuilder,
    PipelineError, Result as PipelineResult, Stage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Terminal stage that records every payload it sees
struct RecorderStage {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl Stage for RecorderStage {
    fn process(&mut self, block: DataBlock) -> PipelineResult<DataBlock> {
        if !block.is_end_of_stream() {
            self.seen.lock().push(*block.data::<u64>()?);
        }
        Ok(block)
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

/// Counts how many times the end-of-stream sentinel reaches it
struct SentinelCounter {
    seen: Arc<AtomicU64>,
}

impl Stage for SentinelCounter {
    fn process(&mut self, block: DataBlock) -> PipelineResult<DataBlock> {
        if block.is_end_of_stream() {
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
        Ok(block)
    }
}

/// Holds every data block until the gate opens
struct GatedStage {
    gate: Arc<AtomicBool>,
}

impl Stage for GatedStage {
    fn process(&mut self, block: DataBlock) -> PipelineResult<DataBlock> {
        if !block.is_end_of_stream() {
            while !self.gate.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(block)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

#[test]
fn test_fifo_preserved_through_buffered_link() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = PipelineBuilder::new()
        .buffer(4, BackpressurePolicy::Block)
        .stage(RecorderStage { seen: seen.clone() })
        .build()
        .expect("build failed");

    for i in 0..100u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    // In order, exactly once each
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<u64>>());
}

#[test]
fn test_sentinel_reaches_terminal_exactly_once() {
    let sentinels = Arc::new(AtomicU64::new(0));

    let mut pipeline = PipelineBuilder::new()
        .buffer(4, BackpressurePolicy::Block)
        .stage(PassthroughStage)
        .buffer(4, BackpressurePolicy::Block)
        .stage(SentinelCounter {
            seen: sentinels.clone(),
        })
        .build()
        .expect("build failed");

    for i in 0..10u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }
    // finish() returns only after every worker has drained and joined
    pipeline.finish().expect("finish failed");

    assert_eq!(sentinels.load(Ordering::Relaxed), 1);
}

#[test]
fn test_no_double_processing_across_buffered_links() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = PipelineBuilder::new()
        .buffer(2, BackpressurePolicy::Block)
        .stage(PassthroughStage)
        .buffer(2, BackpressurePolicy::Block)
        .stage(RecorderStage { seen: seen.clone() })
        .build()
        .expect("build failed");

    for i in 0..50u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    let seen = seen.lock();
    assert_eq!(seen.len(), 50);
    for (i, v) in seen.iter().enumerate() {
        assert_eq!(*v, i as u64);
    }
}

#[test]
fn test_blocking_backpressure_suspends_producer() {
    let gate = Arc::new(AtomicBool::new(false));

    let pipeline = PipelineBuilder::new()
        .buffer(2, BackpressurePolicy::Block)
        .stage(GatedStage { gate: gate.clone() })
        .build()
        .expect("build failed");
    let producer = pipeline.producer().expect("buffered head has a producer");

    // The worker takes the first block and parks in the gate; these fill
    // the queue once it has done so.
    for _ in 0..3 {
        producer
            .push(DataBlock::with_data(vec![0u8]))
            .expect("push failed");
    }

    // With the queue full, one more push must not return until the worker
    // dequeues again.
    let completed = Arc::new(AtomicBool::new(false));
    let blocked_push = {
        let producer = producer.clone();
        let completed = completed.clone();
        thread::spawn(move || {
            producer
                .push(DataBlock::with_data(vec![0u8]))
                .expect("push failed");
            completed.store(true, Ordering::Relaxed);
        })
    };

    thread::sleep(Duration::from_millis(150));
    assert!(
        !completed.load(Ordering::Relaxed),
        "push returned while the queue was still full"
    );

    gate.store(true, Ordering::Relaxed);
    blocked_push.join().expect("pusher panicked");
    assert!(completed.load(Ordering::Relaxed));

    pipeline.finish().expect("finish failed");
}

#[test]
fn test_spin_mode_loses_nothing() {
    let acc = AccumulatorStage::new();
    let sum = acc.counter();

    let mut pipeline = PipelineBuilder::new()
        .buffer(1, BackpressurePolicy::Spin)
        .stage(FnStage::new("slow", |block: DataBlock| {
            thread::sleep(Duration::from_millis(1));
            Ok(block)
        }))
        .stage(acc)
        .build()
        .expect("build failed");

    // Far faster than the consumer drains; every push spins until it lands
    for _ in 0..50 {
        pipeline
            .push(DataBlock::with_data(vec![1u8]))
            .expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    assert_eq!(sum.load(Ordering::Relaxed), 50);
}

#[test]
fn test_passthrough_chain_is_transparent() {
    let payloads = Arc::new(Mutex::new(Vec::new()));

    let sink = {
        let payloads = payloads.clone();
        FnStage::new("sink", move |block: DataBlock| {
            payloads.lock().push(block.data::<Vec<u8>>()?.clone());
            Ok(block)
        })
    };

    let mut pipeline = PipelineBuilder::new()
        .buffer(8, BackpressurePolicy::Block)
        .stage(PassthroughStage)
        .stage(PassthroughStage)
        .stage(PassthroughStage)
        .stage(sink)
        .build()
        .expect("build failed");

    let pushed: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 33]).collect();
    for payload in &pushed {
        pipeline
            .push(DataBlock::with_data(payload.clone()))
            .expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    assert_eq!(*payloads.lock(), pushed);
}

#[test]
fn test_accumulator_scenario() {
    // Five one-byte blocks through a capacity-2 blocking buffer, then the
    // sentinel: the accumulator must have summed exactly 5.
    let acc = AccumulatorStage::new();
    let sum = acc.counter();

    let mut pipeline = PipelineBuilder::new()
        .buffer(2, BackpressurePolicy::Block)
        .stage(acc)
        .stage(PassthroughStage)
        .build()
        .expect("build failed");

    for _ in 0..5 {
        pipeline
            .push(DataBlock::with_data(vec![1u8]))
            .expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    assert_eq!(sum.load(Ordering::Relaxed), 5);
}

#[test]
fn test_buffered_link_with_no_downstream() {
    let mut pipeline = PipelineBuilder::new()
        .buffer(4, BackpressurePolicy::Block)
        .build()
        .expect("build failed");

    // Blocks pushed past the end of the chain are discarded, and the worker
    // must still terminate cleanly on the sentinel.
    for i in 0..10u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }
    pipeline.finish().expect("finish failed");
}

#[test]
fn test_concurrent_producers() {
    let acc = AccumulatorStage::new();
    let sum = acc.counter();

    let pipeline = PipelineBuilder::new()
        .buffer(8, BackpressurePolicy::Block)
        .stage(acc)
        .build()
        .expect("build failed");
    let producer = pipeline.producer().expect("buffered head has a producer");

    let mut producers = Vec::new();
    for _ in 0..2 {
        let producer = producer.clone();
        producers.push(thread::spawn(move || {
            for _ in 0..100 {
                producer
                    .push(DataBlock::with_data(vec![1u8]))
                    .expect("push failed");
            }
        }));
    }
    for handle in producers {
        handle.join().expect("producer panicked");
    }
    drop(producer);

    pipeline.finish().expect("finish failed");
    assert_eq!(sum.load(Ordering::Relaxed), 200);
}

#[test]
fn test_stage_error_surfaces_to_pusher() {
    // No buffered link in front, so the failure lands on the caller
    let mut pipeline = PipelineBuilder::new()
        .stage(FnStage::new("reject", |_| {
            Err(PipelineError::StageError("bad payload".into()))
        }))
        .build()
        .expect("build failed");

    assert!(matches!(
        pipeline.push(DataBlock::with_data(vec![1u8])),
        Err(PipelineError::StageError(_))
    ));
    pipeline.finish().expect("finish failed");
}

#[test]
fn test_drop_without_finish_still_joins() {
    let sentinels = Arc::new(AtomicU64::new(0));

    let mut pipeline = PipelineBuilder::new()
        .buffer(4, BackpressurePolicy::Block)
        .stage(SentinelCounter {
            seen: sentinels.clone(),
        })
        .build()
        .expect("build failed");

    for i in 0..5u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }

    // No finish(): drop must deliver the sentinel and join the worker
    drop(pipeline);

    assert_eq!(sentinels.load(Ordering::Relaxed), 1);
}

#[test]
fn test_metrics_count_data_blocks_only() {
    let mut pipeline = PipelineBuilder::new()
        .buffer(4, BackpressurePolicy::Block)
        .stage(PassthroughStage)
        .build()
        .expect("build failed");
    let metrics = pipeline.stage_metrics(0).expect("metrics missing").clone();

    for i in 0..25u64 {
        pipeline.push(DataBlock::with_data(i)).expect("push failed");
    }
    pipeline.finish().expect("finish failed");

    // The sentinel passed through but is not a processed data block
    assert_eq!(metrics.blocks_processed(), 25);
}
