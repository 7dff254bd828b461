//! One-shot broadcast cancellation.
//!
//! The [`Canceller`] is the single owner of the trigger. Cancelling consumes
//! it, so the signal can only ever fire once. Every [`CancelSignal`] clone
//! observes the transition either through [`CancelSignal::is_cancelled`] or by
//! selecting on [`CancelSignal::receiver`], which disconnects when the
//! trigger fires.

use crossbeam::channel::{self, Receiver, Sender};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create a connected trigger/signal pair
pub fn cancellation() -> (Canceller, CancelSignal) {
    let (tx, rx) = channel::bounded(0);
    let flag = Arc::new(AtomicBool::new(false));
    (
        Canceller {
            flag: Arc::clone(&flag),
            _tx: tx,
        },
        CancelSignal { flag, rx },
    )
}

/// Owner of the cancellation trigger. Dropping it cancels as well.
#[derive(Debug)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
    // Never sent on; dropping it disconnects every receiver.
    _tx: Sender<Infallible>,
}

impl Canceller {
    /// Fire the signal
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Canceller {
    fn drop(&mut self) {
        // The flag is set before the sender goes away so that anyone woken
        // by the disconnect also sees `is_cancelled() == true`.
        self.flag.store(true, Ordering::Release);
    }
}

/// Observer side of the cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    rx: Receiver<Infallible>,
}

impl CancelSignal {
    /// Check whether cancellation has fired
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Channel that becomes ready (disconnected) once cancellation fires.
    ///
    /// Meant for use as a `recv` arm in `crossbeam::channel::select!`.
    pub fn receiver(&self) -> &Receiver<Infallible> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::RecvTimeoutError;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_starts_untriggered() {
        let (_canceller, signal) = cancellation();
        assert!(!signal.is_cancelled());
        assert_eq!(
            signal.receiver().recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn test_cancel_reaches_every_clone() {
        let (canceller, signal) = cancellation();
        let clones: Vec<_> = (0..4).map(|_| signal.clone()).collect();
        canceller.cancel();
        for s in clones.iter().chain(std::iter::once(&signal)) {
            assert!(s.is_cancelled());
            assert!(s.receiver().recv().is_err());
        }
    }

    #[test]
    fn test_drop_cancels() {
        let (canceller, signal) = cancellation();
        drop(canceller);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_wait_wakes_blocked_thread() {
        let (canceller, signal) = cancellation();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let woken = signal.receiver().recv_timeout(Duration::from_secs(10));
            (woken, signal.is_cancelled(), start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        let (woken, cancelled, elapsed) = waiter.join().unwrap();
        assert_eq!(woken, Err(RecvTimeoutError::Disconnected));
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }
}
