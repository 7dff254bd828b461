use crate::buffer::RingBuffer;
use crate::cancel::{cancellation, CancelSignal, Canceller};
use crate::config::PipelineConfig;
use crate::drainer::{drain_into, DrainOrigin, OutputSink, PeriodicDrainer};
use crate::error::{PipelineError, Result};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::observer::{Event, NoopObserver, Observer};
use crate::sink::SinkWriter;
use crate::source::{SourceStage, TokenSource};
use crate::stage::{
    non_negative, not_multiple_of_three, BoxPredicate, FilterStage, StageContext, StageExit,
    StopReason,
};
use crossbeam::channel::{self, select, Receiver, Sender};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const SOURCE_STAGE: &str = "source";
pub const SINK_WRITER_STAGE: &str = "sink_writer";
pub const DRAINER_STAGE: &str = "drainer";

/// Lifecycle of a started pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Running,
    ShuttingDown,
    Draining,
    Terminated,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PipelineState::Running => "running",
            PipelineState::ShuttingDown => "shutting down",
            PipelineState::Draining => "draining",
            PipelineState::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// Why [`RunningPipeline::wait_for_termination`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The external trigger fired (or its sender went away)
    Triggered,
    /// The input ran out and every value reached the buffer
    InputExhausted,
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    config: PipelineConfig,
    filters: Vec<FilterStage<BoxPredicate>>,
    observer: Arc<dyn Observer>,
    exit_on_exhaustion: bool,
}

impl PipelineBuilder {
    /// Create a builder with default settings and no filters
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            filters: Vec::new(),
            observer: Arc::new(NoopObserver),
            exit_on_exhaustion: false,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.drain_interval = interval;
        self
    }

    pub fn grace_margin(mut self, margin: Duration) -> Self {
        self.config.grace_margin = margin;
        self
    }

    pub fn max_read_failures(mut self, limit: u32) -> Self {
        self.config.max_read_failures = limit;
        self
    }

    /// Append a filter; filters run in the order they are added
    pub fn filter<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(i64) -> bool + Send + 'static,
    {
        self.filters
            .push(FilterStage::new(name, Box::new(predicate) as BoxPredicate));
        self
    }

    /// Append the non-negative filter followed by the not-a-multiple-of-three filter
    pub fn standard_filters(self) -> Self {
        self.filter("non_negative", non_negative)
            .filter("not_multiple_of_three", not_multiple_of_three)
    }

    /// Set the observability sink handed to every stage
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Also end [`RunningPipeline::wait_for_termination`] when the input runs out
    pub fn exit_on_exhaustion(mut self, enable: bool) -> Self {
        self.exit_on_exhaustion = enable;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let mut names: HashSet<&str> = [SOURCE_STAGE, SINK_WRITER_STAGE, DRAINER_STAGE]
            .into_iter()
            .collect();
        for filter in &self.filters {
            if !names.insert(filter.name()) {
                return Err(PipelineError::Config(format!(
                    "duplicate stage name {:?}",
                    filter.name()
                )));
            }
        }

        let buffer = RingBuffer::new(self.config.capacity);
        self.observer.observe(Event::BufferCreated {
            capacity: buffer.capacity(),
        });

        Ok(Pipeline {
            config: self.config,
            filters: self.filters,
            observer: self.observer,
            exit_on_exhaustion: self.exit_on_exhaustion,
            buffer,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured pipeline that has not been started yet
pub struct Pipeline {
    config: PipelineConfig,
    filters: Vec<FilterStage<BoxPredicate>>,
    observer: Arc<dyn Observer>,
    exit_on_exhaustion: bool,
    buffer: RingBuffer<i64>,
}

impl Pipeline {
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle to the shared ring buffer
    pub fn buffer(&self) -> RingBuffer<i64> {
        self.buffer.clone()
    }

    /// Names of the filter stages, in chain order
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Spawn one thread per stage and wire them together.
    ///
    /// Source -> filters -> sink writer are connected by zero-capacity
    /// channels; the drainer only shares the buffer. The last filter commits
    /// its handoff, so a value that passed every filter reaches the buffer
    /// even if cancellation fires meanwhile.
    pub fn start<S: TokenSource>(
        self,
        source: S,
        sink: Arc<dyn OutputSink>,
    ) -> Result<RunningPipeline> {
        let (canceller, cancel) = cancellation();
        let (done_tx, done_rx) = channel::unbounded();
        let mut spawner = Spawner {
            cancel: cancel.clone(),
            observer: Arc::clone(&self.observer),
            done_tx,
            handles: Vec::new(),
            metrics: Vec::new(),
        };

        let (source_tx, mut upstream) = channel::bounded::<i64>(0);
        let source = SourceStage::new(source, self.config.max_read_failures);
        spawner.spawn(SOURCE_STAGE, move |ctx| source.run(source_tx, ctx))?;

        let last = self.filters.len().saturating_sub(1);
        for (index, filter) in self.filters.into_iter().enumerate() {
            let filter = if index == last { filter.committing() } else { filter };
            let (tx, rx) = channel::bounded::<i64>(0);
            let input = std::mem::replace(&mut upstream, rx);
            let name = filter.name().to_string();
            spawner.spawn(&name, move |ctx| filter.run(input, tx, ctx))?;
        }

        let writer = SinkWriter::new(self.buffer.clone());
        spawner.spawn(SINK_WRITER_STAGE, move |ctx| writer.run(upstream, ctx))?;

        let drainer = PeriodicDrainer::new(
            self.buffer.clone(),
            self.config.drain_interval,
            Arc::clone(&sink),
        );
        spawner.spawn(DRAINER_STAGE, move |ctx| drainer.run(ctx))?;

        tracing::info!(
            stages = spawner.handles.len(),
            capacity = self.config.capacity,
            interval_ms = self.config.drain_interval.as_millis() as u64,
            "pipeline running"
        );

        Ok(RunningPipeline {
            canceller: Some(canceller),
            cancel,
            done_rx,
            exits: Vec::new(),
            handles: spawner.handles,
            metrics: spawner.metrics,
            buffer: self.buffer,
            sink,
            observer: self.observer,
            config: self.config,
            exit_on_exhaustion: self.exit_on_exhaustion,
            state: PipelineState::Running,
        })
    }
}

/// Spawns stage threads and collects their handles and metrics
struct Spawner {
    cancel: CancelSignal,
    observer: Arc<dyn Observer>,
    done_tx: Sender<StageExit>,
    handles: Vec<(String, JoinHandle<()>)>,
    metrics: Vec<(String, StageMetrics)>,
}

impl Spawner {
    fn spawn<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(&StageContext) -> StopReason + Send + 'static,
    {
        let ctx = StageContext {
            name: name.to_string(),
            cancel: self.cancel.clone(),
            observer: Arc::clone(&self.observer),
            metrics: StageMetrics::new(),
        };
        self.metrics.push((name.to_string(), ctx.metrics.clone()));
        let done_tx = self.done_tx.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!(stage = %ctx.name, "stage started");
                let reason = body(&ctx);
                tracing::debug!(stage = %ctx.name, %reason, "stage stopped");
                ctx.observer.observe(Event::StageStopped {
                    stage: ctx.name.clone(),
                    reason,
                });
                let _ = done_tx.send(StageExit {
                    stage: ctx.name,
                    reason,
                });
            })
            .map_err(|source| PipelineError::Spawn {
                stage: name.to_string(),
                source,
            })?;

        self.handles.push((name.to_string(), handle));
        Ok(())
    }
}

/// Outcome of [`RunningPipeline::shutdown`]
#[derive(Debug)]
pub struct ShutdownReport {
    /// Completion reports, in the order they arrived
    pub exits: Vec<StageExit>,
    /// Stages that did not report before the grace period ran out
    pub unfinished: Vec<String>,
    /// Contents of the final drain, if the buffer was non-empty.
    /// Filled in even when emitting it failed.
    pub final_batch: Option<Vec<i64>>,
    /// Set when the output sink rejected the final batch
    pub emit_error: Option<PipelineError>,
    pub metrics: Vec<MetricsSnapshot>,
    /// Values overwritten because the buffer was full
    pub evicted: u64,
}

impl ShutdownReport {
    /// Every stage stopped within the grace period
    pub fn is_clean(&self) -> bool {
        self.unfinished.is_empty()
    }

    /// Turn a failed final emit into an error, keeping the rest of the report
    pub fn into_result(mut self) -> Result<Self> {
        match self.emit_error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// A running pipeline that can be monitored and shut down
pub struct RunningPipeline {
    canceller: Option<Canceller>,
    cancel: CancelSignal,
    done_rx: Receiver<StageExit>,
    exits: Vec<StageExit>,
    handles: Vec<(String, JoinHandle<()>)>,
    metrics: Vec<(String, StageMetrics)>,
    buffer: RingBuffer<i64>,
    sink: Arc<dyn OutputSink>,
    observer: Arc<dyn Observer>,
    config: PipelineConfig,
    exit_on_exhaustion: bool,
    state: PipelineState,
}

impl RunningPipeline {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle to the shared ring buffer
    pub fn buffer(&self) -> RingBuffer<i64> {
        self.buffer.clone()
    }

    /// Get metrics for a stage by name
    pub fn stage_metrics(&self, stage: &str) -> Option<&StageMetrics> {
        self.metrics
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, metrics)| metrics)
    }

    /// Stage names in pipeline order
    pub fn stage_names(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for snapshot in self.snapshots() {
            summary.push_str(&format!("  {}\n", snapshot));
        }
        summary.push_str(&format!("  evicted from buffer: {}\n", self.buffer.evicted_count()));
        summary
    }

    fn snapshots(&self) -> Vec<MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(name, metrics)| metrics.snapshot(name))
            .collect()
    }

    /// Block until `trigger` delivers a message or disconnects.
    ///
    /// With `exit_on_exhaustion` enabled this also returns once the sink
    /// writer has seen its input close, i.e. the source ran dry and every
    /// surviving value is in the buffer.
    pub fn wait_for_termination(&mut self, trigger: &Receiver<()>) -> Termination {
        loop {
            select! {
                recv(trigger) -> _ => return Termination::Triggered,
                recv(self.done_rx) -> exit => {
                    let Ok(exit) = exit else {
                        // Every stage has already reported; only the trigger is left.
                        let _ = trigger.recv();
                        return Termination::Triggered;
                    };
                    let ingest_done = exit.stage == SINK_WRITER_STAGE
                        && exit.reason == StopReason::UpstreamClosed;
                    self.exits.push(exit);
                    if ingest_done && self.exit_on_exhaustion {
                        return Termination::InputExhausted;
                    }
                }
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(next > self.state, "pipeline state moved backwards");
        tracing::info!(from = %self.state, to = %next, "pipeline state change");
        self.state = next;
    }

    /// Cancel every stage, wait for them to stop, then drain the buffer
    /// one last time.
    ///
    /// The wait is bounded by the configured grace period. Stages that miss
    /// it are detached and listed in the report. Shutdown always reaches
    /// [`PipelineState::Terminated`]; a sink failure on the final drain is
    /// recorded in [`ShutdownReport::emit_error`] next to the drained batch.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.transition(PipelineState::ShuttingDown);
        if let Some(canceller) = self.canceller.take() {
            canceller.cancel();
        }

        let deadline = Instant::now() + self.config.grace_period();
        while self.exits.len() < self.handles.len() {
            match self.done_rx.recv_deadline(deadline) {
                Ok(exit) => self.exits.push(exit),
                Err(_) => break,
            }
        }

        self.transition(PipelineState::Draining);
        let (final_batch, emit_error) = match drain_into(
            &self.buffer,
            self.sink.as_ref(),
            DrainOrigin::Final,
            self.observer.as_ref(),
        ) {
            Ok(batch) => (batch, None),
            Err(err) => {
                tracing::error!("final drain was not delivered: {}", err);
                (err.undelivered().map(<[i64]>::to_vec), Some(err))
            }
        };

        let finished: HashSet<&str> = self.exits.iter().map(|e| e.stage.as_str()).collect();
        let mut unfinished = Vec::new();
        for (name, handle) in self.handles.drain(..) {
            if finished.contains(name.as_str()) {
                let _ = handle.join();
            } else {
                tracing::warn!(stage = %name, "stage did not stop within the grace period");
                unfinished.push(name);
            }
        }

        let report = ShutdownReport {
            exits: std::mem::take(&mut self.exits),
            unfinished,
            final_batch,
            emit_error,
            metrics: self.snapshots(),
            evicted: self.buffer.evicted_count(),
        };
        self.transition(PipelineState::Terminated);
        debug_assert!(self.cancel.is_cancelled());
        report
    }
}
