//! Reads integers from stdin, filters them, and periodically prints the
//! buffered survivors until interrupted.

use anyhow::Context;
use clap::Parser;
use crossbeam::channel::{self, Sender};
use drain_pipeline::{
    LineSource, LogQueue, Observer, PipelineBuilder, PipelineConfig, Termination, WriterSink,
};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "drain-pipeline")]
#[command(about = "Filter integers from stdin into a bounded buffer that is flushed periodically")]
struct Cli {
    /// Maximum number of values held between flushes
    #[arg(long, default_value_t = 10)]
    capacity: usize,

    /// Seconds between periodic flushes
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Extra seconds, on top of the interval, to wait for stages at shutdown
    #[arg(long, default_value_t = 1)]
    grace_margin: u64,

    /// Consecutive failed reads after which stdin counts as exhausted
    #[arg(long, default_value_t = 32)]
    max_read_failures: u32,

    /// Slots in the asynchronous event log queue
    #[arg(long, default_value_t = 200)]
    log_queue: usize,

    /// Shut down once stdin is exhausted instead of waiting for a signal
    #[arg(long)]
    exit_on_eof: bool,

    /// Log every pipeline event
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,drain_pipeline=debug"
    } else {
        "info,drain_pipeline::events=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = PipelineConfig {
        capacity: cli.capacity,
        drain_interval: Duration::from_secs(cli.interval),
        grace_margin: Duration::from_secs(cli.grace_margin),
        max_read_failures: cli.max_read_failures,
    };

    let (log_queue, log_worker) =
        LogQueue::spawn(cli.log_queue).context("failed to start event log queue")?;
    let observer: Arc<dyn Observer> = Arc::new(log_queue.clone());

    let (trigger_tx, trigger_rx) = channel::bounded(1);
    spawn_signal_listener(trigger_tx).context("failed to install signal handlers")?;

    let mut running = PipelineBuilder::new()
        .config(config)
        .standard_filters()
        .observer(observer)
        .exit_on_exhaustion(cli.exit_on_eof)
        .build()?
        .start(
            LineSource::new(io::BufReader::new(io::stdin())),
            Arc::new(WriterSink::stdout()),
        )?;

    match running.wait_for_termination(&trigger_rx) {
        Termination::Triggered => tracing::info!("termination signal received"),
        Termination::InputExhausted => tracing::info!("input exhausted"),
    }

    let report = running.shutdown();
    for snapshot in &report.metrics {
        tracing::info!("{}", snapshot);
    }
    if !report.is_clean() {
        tracing::warn!(stages = ?report.unfinished, "exiting with stages still blocked");
    }

    let dropped = log_queue.dropped_count();
    drop(log_queue);
    if dropped > 0 {
        tracing::warn!(dropped, "event log queue overflowed");
    }
    // Detached stages still hold observer clones, so this may time out.
    log_worker.finish(Duration::from_millis(100));

    report
        .into_result()
        .context("final buffer contents were not written")?;
    Ok(())
}

/// Deliver one message on `trigger` when SIGINT or SIGTERM arrives.
///
/// Handlers are installed before this returns, so a failure to install them
/// is reported to the caller instead of being mistaken for a signal.
fn spawn_signal_listener(trigger: Sender<()>) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let signals = {
        let _guard = runtime.enter();
        Signals::install()?
    };

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            runtime.block_on(signals.recv());
            let _ = trigger.send(());
        })?;
    Ok(())
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(windows)]
struct Signals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl Signals {
    fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(mut self) {
        self.ctrl_c.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_listener_waits_for_a_signal() {
        let (trigger_tx, trigger_rx) = channel::bounded(1);
        spawn_signal_listener(trigger_tx).unwrap();
        assert!(trigger_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
