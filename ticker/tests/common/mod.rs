#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use ticker::{Tick, Ticker};

/// Subscribes a listener that counts its ticks.
pub fn counter(ticker: &Ticker) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    ticker.subscribe(move |_: &Tick| -> anyhow::Result<()> {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    count
}

pub fn load(count: &AtomicUsize) -> usize {
    count.load(Ordering::SeqCst)
}

/// Polls `cond` every millisecond, panicking after `timeout`.
pub fn wait_until(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(1));
    }
}
