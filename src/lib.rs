//! A small concurrent pipeline for integer streams.
//!
//! Values flow from a token source through a chain of filter stages into a
//! bounded ring buffer that overwrites its oldest entry when full. A
//! background drainer periodically empties the buffer into an output sink,
//! and shutdown performs one last drain after every stage has stopped.
//!
//! # Features
//!
//! - One thread per stage, connected by zero-capacity crossbeam channels
//! - One-shot broadcast cancellation observed by every stage
//! - Overwrite-oldest ring buffer with atomic drain
//! - Explicit completion reporting with a bounded shutdown wait
//! - Pluggable observability sink with a non-blocking bounded log queue
//! - Per-stage counters
//!
//! # Example
//!
//! ```no_run
//! use drain_pipeline::{CollectingSink, IterSource, PipelineBuilder};
//! use std::sync::Arc;
//!
//! # fn main() -> drain_pipeline::Result<()> {
//! let sink = CollectingSink::new();
//! let mut running = PipelineBuilder::new()
//!     .standard_filters()
//!     .capacity(3)
//!     .exit_on_exhaustion(true)
//!     .build()?
//!     .start(IterSource::new(["5", "-2", "9", "7", "12", "4"]), Arc::new(sink.clone()))?;
//!
//! let (_trigger_tx, trigger_rx) = crossbeam::channel::bounded(1);
//! running.wait_for_termination(&trigger_rx);
//! let report = running.shutdown().into_result()?;
//! assert_eq!(report.final_batch, Some(vec![5, 7, 4]));
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod drainer;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod stage;

// Re-exports for convenience
pub use buffer::RingBuffer;
pub use cancel::{cancellation, CancelSignal, Canceller};
pub use config::PipelineConfig;
pub use drainer::{CollectingSink, DrainOrigin, OutputSink, PeriodicDrainer, WriterSink};
pub use error::{PipelineError, Result, SourceError};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use observer::{Event, LogQueue, LogWorker, NoopObserver, Observer, TracingObserver};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineState, RunningPipeline, ShutdownReport, Termination,
};
pub use sink::SinkWriter;
pub use source::{IterSource, LineSource, SourceStage, TokenSource};
pub use stage::{non_negative, not_multiple_of_three, FilterStage, StageExit, StopReason};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
