use crate::error::SourceError;
use crate::observer::Event;
use crate::stage::{forward, StageContext, StopReason};
use crossbeam::channel::Sender;
use std::collections::VecDeque;
use std::io::BufRead;

/// A lazy supply of integer tokens.
///
/// Each call yields one integer or an error. Transient errors apply to one
/// token only; the next call moves on.
pub trait TokenSource: Send + 'static {
    fn next_value(&mut self) -> Result<i64, SourceError>;
}

fn parse_token(token: &str) -> Result<i64, SourceError> {
    token.parse::<i64>().map_err(|source| SourceError::Malformed {
        token: token.to_string(),
        source,
    })
}

/// Reads whitespace-separated integers from a buffered reader
#[derive(Debug)]
pub struct LineSource<R> {
    reader: R,
    pending: VecDeque<String>,
    line: String,
}

impl<R: BufRead + Send + 'static> LineSource<R> {
    /// Wrap `reader`; lines are split on whitespace as they are read
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send + 'static> TokenSource for LineSource<R> {
    fn next_value(&mut self) -> Result<i64, SourceError> {
        while self.pending.is_empty() {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Err(SourceError::Exhausted);
            }
            self.pending
                .extend(self.line.split_whitespace().map(str::to_owned));
        }
        match self.pending.pop_front() {
            Some(token) => parse_token(&token),
            None => Err(SourceError::Exhausted),
        }
    }
}

/// Adapts any iterator of tokens; the end of the iterator is end of stream
#[derive(Debug)]
pub struct IterSource<I> {
    tokens: I,
}

impl<I, S> IterSource<I>
where
    I: Iterator<Item = S> + Send + 'static,
    S: AsRef<str>,
{
    /// Create a source yielding `tokens` in order
    pub fn new(tokens: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }
}

impl<I, S> TokenSource for IterSource<I>
where
    I: Iterator<Item = S> + Send + 'static,
    S: AsRef<str>,
{
    fn next_value(&mut self) -> Result<i64, SourceError> {
        match self.tokens.next() {
            Some(token) => parse_token(token.as_ref().trim()),
            None => Err(SourceError::Exhausted),
        }
    }
}

/// First stage: reads from a [`TokenSource`] and feeds the first filter
pub struct SourceStage<S> {
    source: S,
    max_read_failures: u32,
}

impl<S: TokenSource> SourceStage<S> {
    /// `max_read_failures` consecutive failed reads are treated as end of stream
    pub fn new(source: S, max_read_failures: u32) -> Self {
        Self {
            source,
            max_read_failures: max_read_failures.max(1),
        }
    }

    /// Read and forward values until cancelled, exhausted, or nobody listens.
    ///
    /// A read already in progress cannot be interrupted; cancellation is
    /// observed before the next read and while waiting on the handoff.
    pub fn run(mut self, output: Sender<i64>, ctx: &StageContext) -> StopReason {
        let mut consecutive_failures = 0u32;
        loop {
            if ctx.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }

            let value = match self.source.next_value() {
                Ok(value) => {
                    consecutive_failures = 0;
                    value
                }
                Err(err) if !err.is_transient() => return StopReason::InputExhausted,
                Err(err) => {
                    consecutive_failures += 1;
                    ctx.metrics.record_rejected();
                    match &err {
                        SourceError::Malformed { token, .. } => {
                            ctx.observer.observe(Event::MalformedToken {
                                token: token.clone(),
                            });
                        }
                        _ => ctx.observer.observe(Event::ReadFailed {
                            error: err.to_string(),
                            consecutive: consecutive_failures,
                        }),
                    }
                    if consecutive_failures >= self.max_read_failures {
                        tracing::warn!(
                            stage = %ctx.name,
                            failures = consecutive_failures,
                            "giving up on input after repeated read failures"
                        );
                        return StopReason::InputExhausted;
                    }
                    continue;
                }
            };

            ctx.metrics.record_received();
            ctx.observer.observe(Event::ValueRead(value));
            if let Err(reason) = forward(&output, value, &ctx.cancel) {
                return reason;
            }
            ctx.metrics.record_forwarded();
        }
    }
}
