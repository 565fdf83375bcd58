use crate::error::{PipelineError, Result};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What a producer experiences when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Suspend the pushing thread until space is available
    Block,
    /// Busy-retry the enqueue until it succeeds. Trades CPU for latency
    /// under pressure; never drops a block.
    Spin,
}

/// Producer side of a bounded FIFO queue between pipeline links.
///
/// Cloneable so multiple producer threads can enqueue concurrently; the
/// single [`QueueConsumer`] end belongs to the worker thread. Enqueue order
/// is whatever total order the channel establishes for interleaved sends.
pub struct BlockQueue<T> {
    tx: Sender<T>,
    policy: BackpressurePolicy,
    capacity: usize,
    contended: Arc<AtomicU64>,
}

// Manual impl so T does not need to be Clone
impl<T> Clone for BlockQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
            capacity: self.capacity,
            contended: Arc::clone(&self.contended),
        }
    }
}

impl<T: Send> BlockQueue<T> {
    /// Create a bounded queue and its consumer end.
    ///
    /// Fails with [`PipelineError::ZeroCapacity`] for `capacity == 0`.
    pub fn bounded(
        capacity: usize,
        policy: BackpressurePolicy,
    ) -> Result<(Self, QueueConsumer<T>)> {
        if capacity == 0 {
            return Err(PipelineError::ZeroCapacity);
        }
        let (tx, rx) = channel::bounded(capacity);
        Ok((
            Self {
                tx,
                policy,
                capacity,
                contended: Arc::new(AtomicU64::new(0)),
            },
            QueueConsumer { rx },
        ))
    }

    /// Enqueue an item, applying the backpressure policy when full.
    ///
    /// Returns [`PipelineError::QueueClosed`] once the consumer is gone.
    pub fn push(&self, item: T) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    BackpressurePolicy::Block => self
                        .tx
                        .send(item)
                        .map_err(|_| PipelineError::QueueClosed),
                    BackpressurePolicy::Spin => self.push_spinning(item),
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }

    /// Retry until space frees up. A microsleep keeps the spin from
    /// monopolizing a core while the consumer catches up.
    fn push_spinning(&self, mut item: T) -> Result<()> {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(i)) => {
                    item = i;
                    thread::sleep(Duration::from_micros(1));
                }
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::QueueClosed),
            }
        }
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many pushes found the queue full and had to wait or spin
    pub fn contended_pushes(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

/// Consumer side of a [`BlockQueue`]. Exactly one worker thread owns this.
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
}

impl<T: Send> QueueConsumer<T> {
    /// Blocking dequeue. Returns `None` once the queue is empty and every
    /// producer handle has been dropped.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }
}
