//! Bounded work-queue pipelines for producer/consumer workloads.
//!
//! A [`pipeline::Pipeline`] couples a fixed-capacity [`comms::queue::BoundedQueue`]
//! with a one-shot [`sync::shutdown::ShutdownSignal`], spawns producer and consumer
//! loops over it, and reports how often either side was stalled by backpressure.
//! The `workloads` module wires the engine to concrete jobs: chunked matrix
//! multiplication, framed binary messages and batch summation.
use thiserror::Error;

pub mod comms;
pub mod logging;
pub mod pipeline;
pub mod scheduling;
pub mod sync;
pub mod workloads;

pub use comms::codec::{Frame, Message};
pub use comms::queue::{BoundedQueue, Delivery};
pub use logging::report::{ReportSink, RunReport};
pub use pipeline::{config::PipelineConfig, Pipeline, PipelineReport};
pub use scheduling::partition::{split, Partitioner, Remainder};
pub use sync::shutdown::ShutdownSignal;
pub use sync::stats::WaitStats;

/// Error type for all pipeline components
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Queue is closed, no further items are accepted")]
    QueueClosed,
    #[error("Malformed frame of {len} bytes, expected 9..=58")]
    MalformedFrame { len: usize },
    #[error("Handler failed: {0}")]
    HandlerFailure(String),
    #[error("Run was aborted before the producer finished its range")]
    Aborted,
    #[error("Matrix dimensions do not line up: {0}")]
    DimensionMismatch(String),
    #[error("Rows {start}..{end} fall outside a result of {rows} rows")]
    RegionOutOfBounds { start: usize, end: usize, rows: usize },
    #[error("Row {0} of the shared result was written twice")]
    RegionOverlap(usize),
    #[error("Shared result is missing {missing} rows")]
    IncompleteResult { missing: usize },
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
