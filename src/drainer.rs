use crate::buffer::RingBuffer;
use crate::error::{PipelineError, Result};
use crate::observer::{Event, Observer};
use crate::stage::{StageContext, StopReason};
use crossbeam::channel::{select, tick};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Who emptied the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOrigin {
    Periodic,
    Final,
}

impl fmt::Display for DrainOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainOrigin::Periodic => f.write_str("periodic"),
            DrainOrigin::Final => f.write_str("final"),
        }
    }
}

/// Receives drained batches, oldest value first
pub trait OutputSink: Send + Sync {
    fn emit(&self, batch: &[i64], origin: DrainOrigin) -> io::Result<()>;
}

/// Writes one line per batch to any writer
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Write batches to `writer`, flushing after each one
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn emit(&self, batch: &[i64], origin: DrainOrigin) -> io::Result<()> {
        let label = match origin {
            DrainOrigin::Periodic => "buffer",
            DrainOrigin::Final => "final buffer",
        };
        let mut writer = self.writer.lock();
        writeln!(writer, "{}: {:?}", label, batch)?;
        writer.flush()
    }
}

impl<W> fmt::Debug for WriterSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

/// Keeps every emitted batch in memory. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    batches: Arc<Mutex<Vec<(DrainOrigin, Vec<i64>)>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches emitted so far, in emission order
    pub fn batches(&self) -> Vec<(DrainOrigin, Vec<i64>)> {
        self.batches.lock().clone()
    }

    /// Every emitted value, flattened in emission order
    pub fn values(&self) -> Vec<i64> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, batch)| batch.iter().copied())
            .collect()
    }
}

impl OutputSink for CollectingSink {
    fn emit(&self, batch: &[i64], origin: DrainOrigin) -> io::Result<()> {
        self.batches.lock().push((origin, batch.to_vec()));
        Ok(())
    }
}

/// Empty the buffer and hand a non-empty result to the sink.
///
/// Returns the drained values, or `None` if the buffer was empty. If the sink
/// fails, the drained values travel back in [`PipelineError::Emit`].
pub fn drain_into(
    buffer: &RingBuffer<i64>,
    sink: &dyn OutputSink,
    origin: DrainOrigin,
    observer: &dyn Observer,
) -> Result<Option<Vec<i64>>> {
    let Some(batch) = buffer.drain() else {
        return Ok(None);
    };
    observer.observe(Event::Drained {
        values: batch.clone(),
    });
    if let Err(source) = sink.emit(&batch, origin) {
        return Err(PipelineError::Emit {
            origin,
            batch,
            source,
        });
    }
    Ok(Some(batch))
}

/// Wakes on a fixed interval and flushes the buffer to the output sink
pub struct PeriodicDrainer {
    buffer: RingBuffer<i64>,
    interval: Duration,
    sink: Arc<dyn OutputSink>,
}

impl PeriodicDrainer {
    pub fn new(buffer: RingBuffer<i64>, interval: Duration, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            buffer,
            interval,
            sink,
        }
    }

    /// Tick until cancelled. Missed ticks are not queued, and cancellation
    /// never triggers a drain here.
    pub fn run(self, ctx: &StageContext) -> StopReason {
        let ticker = tick(self.interval);
        loop {
            if ctx.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }
            select! {
                recv(ctx.cancel.receiver()) -> _ => return StopReason::Cancelled,
                recv(ticker) -> _ => {
                    if ctx.cancel.is_cancelled() {
                        return StopReason::Cancelled;
                    }
                    self.tick_once(ctx);
                }
            }
        }
    }

    fn tick_once(&self, ctx: &StageContext) {
        match drain_into(&self.buffer, self.sink.as_ref(), DrainOrigin::Periodic, ctx.observer.as_ref()) {
            Ok(Some(batch)) => {
                for _ in &batch {
                    ctx.metrics.record_received();
                    ctx.metrics.record_forwarded();
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(stage = %ctx.name, "failed to emit drained batch: {}", e);
                ctx.metrics.record_rejected();
                // Retried on the next tick, or by the final drain.
                if let PipelineError::Emit { batch, .. } = e {
                    self.buffer.restore(batch);
                }
            }
        }
    }
}

impl fmt::Debug for PeriodicDrainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicDrainer")
            .field("capacity", &self.buffer.capacity())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use crate::metrics::StageMetrics;
    use crate::observer::NoopObserver;
    use std::thread;

    fn context(cancel: crate::cancel::CancelSignal) -> StageContext {
        StageContext {
            name: "drainer".into(),
            cancel,
            observer: Arc::new(NoopObserver),
            metrics: StageMetrics::new(),
        }
    }

    #[test]
    fn test_writer_sink_format() {
        let sink = WriterSink::new(Vec::new());
        sink.emit(&[5, 7, 4], DrainOrigin::Periodic).unwrap();
        sink.emit(&[1], DrainOrigin::Final).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "buffer: [5, 7, 4]\nfinal buffer: [1]\n");
    }

    #[test]
    fn test_drain_into_empty_emits_nothing() {
        let buffer = RingBuffer::new(3);
        let sink = CollectingSink::new();
        let drained = drain_into(&buffer, &sink, DrainOrigin::Final, &NoopObserver).unwrap();
        assert_eq!(drained, None);
        assert!(sink.batches().is_empty());
    }

    #[test]
    fn test_periodic_drainer_flushes_and_stops_on_cancel() {
        let (canceller, cancel) = cancellation();
        let ctx = context(cancel);
        let buffer = RingBuffer::new(4);
        buffer.push(1);
        buffer.push(2);
        let sink = CollectingSink::new();

        let drainer = PeriodicDrainer::new(buffer.clone(), Duration::from_millis(10), Arc::new(sink.clone()));
        let worker = thread::spawn(move || drainer.run(&ctx));

        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
        assert_eq!(worker.join().unwrap(), StopReason::Cancelled);
        assert_eq!(sink.batches(), vec![(DrainOrigin::Periodic, vec![1, 2])]);
    }

    /// Fails the first `failures` emits, then records like `CollectingSink`
    struct FlakySink {
        failures: Mutex<u32>,
        inner: CollectingSink,
    }

    impl OutputSink for FlakySink {
        fn emit(&self, batch: &[i64], origin: DrainOrigin) -> io::Result<()> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink down"));
            }
            self.inner.emit(batch, origin)
        }
    }

    #[test]
    fn test_drain_into_returns_batch_on_emit_failure() {
        let buffer = RingBuffer::new(3);
        buffer.push(4);
        buffer.push(5);
        let sink = FlakySink {
            failures: Mutex::new(1),
            inner: CollectingSink::new(),
        };

        let err = drain_into(&buffer, &sink, DrainOrigin::Final, &NoopObserver).unwrap_err();
        assert_eq!(err.undelivered(), Some(&[4, 5][..]));
        assert!(matches!(
            err,
            PipelineError::Emit {
                origin: DrainOrigin::Final,
                ..
            }
        ));
        assert!(sink.inner.batches().is_empty());
    }

    #[test]
    fn test_failed_periodic_emit_keeps_values() {
        let (_canceller, cancel) = cancellation();
        let ctx = context(cancel);
        let buffer = RingBuffer::new(4);
        buffer.push(1);
        buffer.push(2);
        let sink = Arc::new(FlakySink {
            failures: Mutex::new(1),
            inner: CollectingSink::new(),
        });
        let drainer = PeriodicDrainer::new(buffer.clone(), Duration::from_secs(60), sink.clone());

        drainer.tick_once(&ctx);
        assert!(sink.inner.batches().is_empty());
        assert_eq!(ctx.metrics.total_rejected(), 1);

        buffer.push(3);
        drainer.tick_once(&ctx);
        assert_eq!(
            sink.inner.batches(),
            vec![(DrainOrigin::Periodic, vec![1, 2, 3])]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_cancelled_drainer_leaves_buffer_for_final_drain() {
        let (canceller, cancel) = cancellation();
        let ctx = context(cancel);
        let buffer = RingBuffer::new(4);
        buffer.push(9);
        let sink = CollectingSink::new();
        canceller.cancel();

        let drainer = PeriodicDrainer::new(buffer.clone(), Duration::from_millis(1), Arc::new(sink.clone()));
        assert_eq!(drainer.run(&ctx), StopReason::Cancelled);
        assert!(sink.batches().is_empty());
        assert_eq!(buffer.drain(), Some(vec![9]));
    }
}
