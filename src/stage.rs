use crate::cancel::CancelSignal;
use crate::metrics::StageMetrics;
use crate::observer::{Event, Observer};
use crossbeam::channel::{select, Receiver, Sender};
use std::fmt;
use std::sync::Arc;

/// Why a stage returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation signal fired
    Cancelled,
    /// The input channel was closed by the upstream stage
    UpstreamClosed,
    /// The downstream stage is gone
    DownstreamClosed,
    /// The token source reached end of stream
    InputExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Cancelled => "cancelled",
            StopReason::UpstreamClosed => "upstream closed",
            StopReason::DownstreamClosed => "downstream closed",
            StopReason::InputExhausted => "input exhausted",
        };
        f.write_str(text)
    }
}

/// Completion report sent by every stage thread when it returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExit {
    pub stage: String,
    pub reason: StopReason,
}

/// What every stage needs besides its channels
#[derive(Clone)]
pub struct StageContext {
    pub name: String,
    pub cancel: CancelSignal,
    pub observer: Arc<dyn Observer>,
    pub metrics: StageMetrics,
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Wait for the next upstream value.
///
/// Cancellation wins if it has already fired; otherwise whichever of the two
/// becomes ready first is taken.
pub(crate) fn receive(input: &Receiver<i64>, cancel: &CancelSignal) -> Result<i64, StopReason> {
    if cancel.is_cancelled() {
        return Err(StopReason::Cancelled);
    }
    select! {
        recv(cancel.receiver()) -> _ => Err(StopReason::Cancelled),
        recv(input) -> msg => msg.map_err(|_| StopReason::UpstreamClosed),
    }
}

/// Hand a value to the next stage, giving up if cancellation fires first.
pub(crate) fn forward(output: &Sender<i64>, value: i64, cancel: &CancelSignal) -> Result<(), StopReason> {
    if cancel.is_cancelled() {
        return Err(StopReason::Cancelled);
    }
    select! {
        recv(cancel.receiver()) -> _ => Err(StopReason::Cancelled),
        send(output, value) -> res => res.map_err(|_| StopReason::DownstreamClosed),
    }
}

/// Boxed predicate as stored by the pipeline builder
pub type BoxPredicate = Box<dyn Fn(i64) -> bool + Send + 'static>;

/// Passes `value >= 0`
pub fn non_negative(value: i64) -> bool {
    value >= 0
}

/// Passes values that are not multiples of three
pub fn not_multiple_of_three(value: i64) -> bool {
    value % 3 != 0
}

/// A filtering stage that forwards values matching a predicate
pub struct FilterStage<F>
where
    F: Fn(i64) -> bool + Send + 'static,
{
    name: String,
    predicate: F,
    commit_handoff: bool,
}

impl<F> FilterStage<F>
where
    F: Fn(i64) -> bool + Send + 'static,
{
    /// Create a new filter stage
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            commit_handoff: false,
        }
    }

    /// Make the handoff of an accepted value immune to cancellation.
    ///
    /// Used for the last filter: once a value has passed it, it is delivered
    /// to the sink writer, which keeps receiving until this stage closes its
    /// output.
    pub fn committing(mut self) -> Self {
        self.commit_handoff = true;
        self
    }

    /// Get the stage name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check a value against the predicate
    pub fn accepts(&self, value: i64) -> bool {
        (self.predicate)(value)
    }

    /// Move values from `input` to `output` until cancelled or upstream closes.
    ///
    /// Cancellation stops the next receive. An accepted value already on its
    /// way out is dropped on cancellation unless the stage is
    /// [`committing`](Self::committing). `output` is dropped on return, which
    /// closes it for the next stage.
    pub fn run(self, input: Receiver<i64>, output: Sender<i64>, ctx: &StageContext) -> StopReason {
        loop {
            let value = match receive(&input, &ctx.cancel) {
                Ok(value) => value,
                Err(reason) => return reason,
            };
            ctx.metrics.record_received();

            if !self.accepts(value) {
                ctx.metrics.record_rejected();
                ctx.observer.observe(Event::Rejected {
                    stage: self.name.clone(),
                    value,
                });
                continue;
            }

            ctx.observer.observe(Event::Accepted {
                stage: self.name.clone(),
                value,
            });
            let sent = if self.commit_handoff {
                output.send(value).map_err(|_| StopReason::DownstreamClosed)
            } else {
                forward(&output, value, &ctx.cancel)
            };
            if let Err(reason) = sent {
                return reason;
            }
            ctx.metrics.record_forwarded();
        }
    }
}

impl<F> fmt::Debug for FilterStage<F>
where
    F: Fn(i64) -> bool + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("name", &self.name)
            .field("commit_handoff", &self.commit_handoff)
            .finish()
    }
}
