use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop signal shared between a ticker and its worker thread.
///
/// Once cancelled a token stays cancelled. Clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    mutex: Mutex<()>,
    condition: Condvar,
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        {
            let _guard = self.inner.mutex.lock();
            self.inner.cancelled.store(true, Ordering::Release);
        }
        self.inner.condition.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Blocks for up to `timeout` or until the token is cancelled, whichever
    /// comes first. Returns whether the token is cancelled on return.
    pub fn wait_for_cancellation(&self, timeout: Duration) -> bool {
        let mut guard = self.inner.mutex.lock();
        if self.is_cancelled() {
            return true;
        }

        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !self.is_cancelled() {
                    if self
                        .inner
                        .condition
                        .wait_until(&mut guard, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
            None => {
                while !self.is_cancelled() {
                    self.inner.condition.wait(&mut guard);
                }
            }
        }

        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn times_out_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert_eq!(token.wait_for_cancellation(Duration::from_millis(20)), false);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(token.is_cancelled(), false);
    }

    #[test]
    fn returns_immediately_once_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(token.wait_for_cancellation(Duration::from_secs(60)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancel_wakes_a_waiting_thread() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let cancelled = waiter.wait_for_cancellation(Duration::from_secs(60));
            (cancelled, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (cancelled, waited) = handle.join().unwrap();
        assert!(cancelled);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }
}
