use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or driving a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The stored payload is of a different type than requested
    #[error("payload is not a {expected}")]
    TypeMismatch {
        /// Type name the caller asked for
        expected: &'static str,
    },

    /// The block carries no payload (e.g. an end-of-stream sentinel)
    #[error("block carries no payload")]
    NoPayload,

    /// Cannot build a pipeline with no links
    #[error("cannot build an empty pipeline")]
    EmptyPipeline,

    /// Buffered stages need room for at least one block
    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// The queue's consumer is gone; the pipeline has shut down
    #[error("queue is closed")]
    QueueClosed,

    /// Worker thread error
    #[error("worker thread error: {0}")]
    ThreadError(String),

    /// Stage execution error
    #[error("stage failed: {0}")]
    StageError(String),
}
