use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::listeners::Tick;
use crate::ticker::Shared;

static LIVE_WORKERS: AtomicUsize = AtomicUsize::new(0);

/// Number of ticker worker threads currently inside their loop, process wide.
pub fn live_workers() -> usize {
    LIVE_WORKERS.load(Ordering::SeqCst)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickerStats {
    /// Ticks dispatched so far
    pub ticks: u64,
    /// Listener invocations that returned an error or panicked
    pub listener_failures: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    ticks: AtomicU64,
    listener_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> TickerStats {
        TickerStats {
            ticks: self.ticks.load(Ordering::Acquire),
            listener_failures: self.listener_failures.load(Ordering::Acquire),
        }
    }
}

/// Body of the worker thread: wait, tick, repeat until cancelled.
pub(crate) struct TickLoop {
    interval: Duration,
    shared: Arc<Shared>,
    next_seq: u64,
}

impl TickLoop {
    pub(crate) fn new(interval: Duration, shared: Arc<Shared>) -> TickLoop {
        TickLoop {
            interval,
            shared,
            next_seq: 1,
        }
    }

    pub(crate) fn run(&mut self) {
        let _exit = ExitSignal::new(self.shared.clone());
        let mut wait = self.interval;
        loop {
            // checks the token before and after the wait
            if self.shared.cancel_token.wait_for_cancellation(wait) {
                break;
            }
            let started = Instant::now();
            self.run_one(started);
            wait = self.interval.saturating_sub(started.elapsed());
        }
    }

    fn run_one(&mut self, at: Instant) {
        let tick = Tick {
            seq: self.next_seq,
            at,
        };
        self.next_seq += 1;
        self.shared.counters.ticks.fetch_add(1, Ordering::AcqRel);

        let failures = self.shared.listeners.dispatch(&tick);
        if failures > 0 {
            self.shared
                .counters
                .listener_failures
                .fetch_add(failures, Ordering::AcqRel);
        }
    }
}

/// Marks the worker as exited when the loop returns or unwinds, and wakes
/// every thread blocked in `Ticker::cancel`.
struct ExitSignal {
    shared: Arc<Shared>,
}

impl ExitSignal {
    fn new(shared: Arc<Shared>) -> ExitSignal {
        LIVE_WORKERS.fetch_add(1, Ordering::SeqCst);
        ExitSignal { shared }
    }
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        LIVE_WORKERS.fetch_sub(1, Ordering::SeqCst);
        self.shared.lifecycle.lock().exited = true;
        self.shared.exited.notify_all();
    }
}
