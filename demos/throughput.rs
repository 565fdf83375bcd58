//! End-to-end throughput demo.
//!
//! Two producer threads push fixed-size data blocks through a buffered head
//! (spin backpressure), a configurable run of passthrough stages, a byte-sum
//! accumulator, and a throughput monitor, then deliver the end-of-stream
//! sentinel and report totals.
//!
//! Usage: cargo run --example throughput_demo --release -- -d 100000 -s 30 -b 16384

use clap::Parser;
use datastream::{
    format_bytes, AccumulatorStage, BackpressurePolicy, DataBlock, PassthroughStage,
    PipelineBuilder, ShutdownFlag, ThroughputStage,
};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

#[derive(Parser)]
#[command(version, about = "Data-block pipeline throughput demo")]
struct Args {
    /// Number of data blocks each producer pushes
    #[arg(short = 'd', long, default_value_t = 100_000)]
    datablocks: u64,

    /// Number of passthrough stages in the chain
    #[arg(short = 's', long, default_value_t = 30)]
    streams: u32,

    /// Number of bytes in each block
    #[arg(short = 'b', long, default_value_t = 16_384)]
    bytes: usize,
}

fn main() -> datastream::Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!(
        "processing {} blocks of {} each, per producer",
        args.datablocks,
        format_bytes(args.bytes as u64)
    );

    let accumulator = AccumulatorStage::new();
    let checksum = accumulator.counter();

    let mut builder = PipelineBuilder::new().buffer(1000, BackpressurePolicy::Spin);
    for _ in 0..args.streams {
        builder = builder.stage(PassthroughStage);
    }
    let pipeline = builder
        .stage(accumulator)
        .stage(ThroughputStage::new())
        .build()?;

    let producer = pipeline
        .producer()
        .expect("pipeline starts with a buffered link");

    // Cooperative stop for the producer loops; wire `shutdown.trigger()` to
    // your signal handler of choice. It never interrupts the workers; the
    // sentinel below shuts those down.
    let shutdown = ShutdownFlag::new();
    let payload = vec![1u8; args.bytes];

    let started = Instant::now();
    let mut producers = Vec::new();
    for _ in 0..2 {
        let producer = producer.clone();
        let shutdown = shutdown.clone();
        let payload = payload.clone();
        let blocks = args.datablocks;
        producers.push(thread::spawn(move || {
            for _ in 0..blocks {
                if shutdown.is_triggered() {
                    break;
                }
                if producer.push(DataBlock::with_data(payload.clone())).is_err() {
                    break;
                }
            }
        }));
    }

    for handle in producers {
        if handle.join().is_err() {
            log::error!("producer thread panicked");
        }
    }
    drop(producer);

    log::debug!("{}", pipeline.metrics_summary());

    // All producers are done; deliver the sentinel and join the worker
    pipeline.finish()?;

    let elapsed = started.elapsed();
    log::info!(
        "processed {} ({} block-bytes summed) in {:.2}s",
        format_bytes(2 * args.datablocks * args.bytes as u64),
        checksum.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );

    Ok(())
}
