use crate::error::{PipelineError, Result};
use std::any::Any;
use std::sync::Arc;

/// An immutable unit of data flowing through the pipeline.
///
/// A block is either payload-bearing or the end-of-stream sentinel, never
/// both. Clones share the payload, so a finalized block can be read by any
/// number of stages concurrently; nothing mutates it after construction.
#[derive(Clone)]
pub struct DataBlock {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    end_of_stream: bool,
}

impl DataBlock {
    /// Create a payload-bearing block directly, skipping the builder.
    pub fn with_data<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            payload: Some(Arc::new(value)),
            end_of_stream: false,
        }
    }

    /// Create the terminal sentinel. Pushing it through the chain shuts
    /// every buffered worker down in order.
    pub fn end_of_stream() -> Self {
        Self {
            payload: None,
            end_of_stream: true,
        }
    }

    /// Typed read-only view of the payload.
    ///
    /// Returns [`PipelineError::TypeMismatch`] if the stored payload is of a
    /// different type, and [`PipelineError::NoPayload`] if the block has no
    /// payload at all (an end-of-stream sentinel, or a builder finalized
    /// without data).
    pub fn data<T: 'static>(&self) -> Result<&T> {
        let payload = self.payload.as_ref().ok_or(PipelineError::NoPayload)?;
        payload
            .downcast_ref::<T>()
            .ok_or(PipelineError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Whether this block is the terminal sentinel. Always safe to call.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}

/// Exclusively owned, writable form of a block.
///
/// Producers fill a builder and [`build`](BlockBuilder::build) it into an
/// immutable [`DataBlock`] before it enters the chain.
#[derive(Default)]
pub struct BlockBuilder {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    end_of_stream: bool,
}

impl BlockBuilder {
    /// A fresh builder: no payload, end-of-stream unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload, replacing any previous one.
    ///
    /// # Panics
    ///
    /// Panics if the end-of-stream flag is already set. A sentinel carrying
    /// data indicates pipeline-construction misuse, not a runtime condition.
    pub fn set_data<T: Send + Sync + 'static>(&mut self, value: T) {
        assert!(
            !self.end_of_stream,
            "cannot attach a payload to an end-of-stream block"
        );
        self.payload = Some(Arc::new(value));
    }

    /// Mark this block as the terminal sentinel. Any payload is irrelevant
    /// from here on.
    pub fn set_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Finalize into an immutable, shareable block.
    pub fn build(self) -> DataBlock {
        DataBlock {
            payload: self.payload,
            end_of_stream: self.end_of_stream,
        }
    }
}
