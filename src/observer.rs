//! Observability sink for pipeline events.
//!
//! Stages receive an `Arc<dyn Observer>` explicitly. Nothing in the pipeline
//! reads observer state back, so swapping in [`NoopObserver`] never changes
//! behaviour.

use crate::stage::StopReason;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Something that happened inside the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BufferCreated { capacity: usize },
    ValueRead(i64),
    MalformedToken { token: String },
    ReadFailed { error: String, consecutive: u32 },
    Accepted { stage: String, value: i64 },
    Rejected { stage: String, value: i64 },
    Pushed { value: i64, evicted: Option<i64> },
    Drained { values: Vec<i64> },
    StageStopped { stage: String, reason: StopReason },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::BufferCreated { capacity } => {
                write!(f, "created buffer with capacity {}", capacity)
            }
            Event::ValueRead(v) => write!(f, "read value {}", v),
            Event::MalformedToken { token } => write!(f, "skipping malformed token {:?}", token),
            Event::ReadFailed { error, consecutive } => {
                write!(f, "read failed ({} in a row): {}", consecutive, error)
            }
            Event::Accepted { stage, value } => write!(f, "{} passed {}", stage, value),
            Event::Rejected { stage, value } => write!(f, "{} dropped {}", stage, value),
            Event::Pushed {
                value,
                evicted: Some(old),
            } => write!(f, "pushed {} into full buffer, evicted {}", value, old),
            Event::Pushed {
                value,
                evicted: None,
            } => write!(f, "pushed {}", value),
            Event::Drained { values } => write!(f, "drained {:?}", values),
            Event::StageStopped { stage, reason } => write!(f, "{} stopped: {}", stage, reason),
        }
    }
}

/// Receiver of pipeline events
pub trait Observer: Send + Sync {
    fn observe(&self, event: Event);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn observe(&self, _event: Event) {}
}

/// Emits every event synchronously at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: Event) {
        tracing::debug!(target: "drain_pipeline::events", "{}", event);
    }
}

/// Bounded asynchronous event queue.
///
/// Events are handed to a worker thread that logs them through `tracing`.
/// When the queue is full the event is dropped and counted; producers never
/// block.
#[derive(Debug, Clone)]
pub struct LogQueue {
    tx: Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Handle to the thread draining a [`LogQueue`]
#[derive(Debug)]
pub struct LogWorker {
    finished: Receiver<()>,
    handle: thread::JoinHandle<()>,
}

impl LogQueue {
    /// Spawn the worker and return the producer side
    pub fn spawn(capacity: usize) -> io::Result<(LogQueue, LogWorker)> {
        let (tx, rx) = channel::bounded::<Event>(capacity.max(1));
        let (finished_tx, finished) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("log-queue".into())
            .spawn(move || {
                let _finished = finished_tx;
                for event in rx {
                    tracing::info!(target: "drain_pipeline::events", "{}", event);
                }
            })?;

        Ok((
            LogQueue {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            LogWorker { finished, handle },
        ))
    }

    /// Number of events discarded because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Observer for LogQueue {
    fn observe(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Worker already gone; nothing left to record to.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl LogWorker {
    /// Wait for the worker to flush the queue and exit.
    ///
    /// The worker exits once every [`LogQueue`] clone has been dropped.
    /// Returns `false` if that did not happen within `timeout`, in which case
    /// the worker is left detached.
    pub fn finish(self, timeout: Duration) -> bool {
        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                let _ = self.handle.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}
