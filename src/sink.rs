use crate::buffer::RingBuffer;
use crate::observer::Event;
use crate::stage::{receive, StageContext, StopReason};
use crossbeam::channel::Receiver;

/// Last stage: pushes every value that made it through the filters into the buffer
#[derive(Debug)]
pub struct SinkWriter {
    buffer: RingBuffer<i64>,
}

impl SinkWriter {
    /// Create a writer feeding `buffer`
    pub fn new(buffer: RingBuffer<i64>) -> Self {
        Self { buffer }
    }

    /// Push values until upstream closes.
    ///
    /// After cancellation the writer stops waiting on the signal and takes
    /// whatever upstream still hands over, returning once the channel closes.
    /// The upstream stage stops receiving on cancellation, so this is bounded
    /// by the values already past the last filter.
    pub fn run(self, input: Receiver<i64>, ctx: &StageContext) -> StopReason {
        loop {
            match receive(&input, &ctx.cancel) {
                Ok(value) => self.store(value, ctx),
                Err(StopReason::Cancelled) => break,
                Err(reason) => return reason,
            }
        }

        for value in input.iter() {
            self.store(value, ctx);
        }
        StopReason::Cancelled
    }

    fn store(&self, value: i64, ctx: &StageContext) {
        ctx.metrics.record_received();
        let evicted = self.buffer.push(value);
        ctx.metrics.record_forwarded();
        ctx.observer.observe(Event::Pushed { value, evicted });
    }
}
