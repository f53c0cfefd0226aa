use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::cancel::CancellationToken;
use crate::config::{TickerConfig, DEFAULT_INTERVAL_MS};
use crate::error::{Result, TickerError};
use crate::listeners::{Listener, Registry, Subscription, SubscriptionGuard, Tick};
use crate::worker::{Counters, TickLoop, TickerStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickerState {
    /// Constructed, never started
    Idle,
    /// Worker spawned and ticking
    Running,
    /// Stop requested, worker not yet joined
    Cancelling,
    /// Worker gone. Terminal
    Stopped,
}

pub(crate) struct Lifecycle {
    pub(crate) state: TickerState,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) worker_id: Option<ThreadId>,
    pub(crate) exited: bool,
}

/// State shared between the owning `Ticker` and its worker thread.
pub(crate) struct Shared {
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) exited: Condvar,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) listeners: Arc<Registry>,
    pub(crate) counters: Counters,
}

#[derive(Clone, Copy)]
enum Spawner {
    Os,
    #[cfg(test)]
    Failing,
}

impl Spawner {
    fn spawn<F>(self, name: String, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Spawner::Os => thread::Builder::new().name(name).spawn(f),
            #[cfg(test)]
            Spawner::Failing => Err(io::Error::new(io::ErrorKind::Other, "spawn refused")),
        }
    }
}

/// Emits a [`Tick`] to its listeners once per interval from a dedicated
/// thread, independently of whatever the owning thread is blocked on.
///
/// A ticker starts at most once. [`Ticker::cancel`] is idempotent and blocks
/// until the worker thread has exited; dropping the ticker cancels it.
///
/// Listeners run on the worker thread, one at a time. Use
/// [`Ticker::subscribe_channel`] to consume ticks from another thread's loop.
pub struct Ticker {
    config: TickerConfig,
    interval: Duration,
    shared: Arc<Shared>,
    spawner: Spawner,
}

impl Ticker {
    pub fn new(config: TickerConfig) -> Result<Ticker> {
        config.validate()?;
        let interval = config.interval()?;
        Ok(Ticker::with_valid_config(config, interval))
    }

    pub fn with_interval_ms(interval_ms: f64) -> Result<Ticker> {
        Ticker::builder().interval_ms(interval_ms).build()
    }

    pub fn builder() -> TickerBuilder {
        TickerBuilder::default()
    }

    fn with_valid_config(config: TickerConfig, interval: Duration) -> Ticker {
        Ticker {
            config,
            interval,
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: TickerState::Idle,
                    worker: None,
                    worker_id: None,
                    exited: false,
                }),
                exited: Condvar::new(),
                cancel_token: CancellationToken::new(),
                listeners: Arc::new(Registry::new()),
                counters: Counters::default(),
            }),
            spawner: Spawner::Os,
        }
    }

    /// Worker thread name
    pub fn name(&self) -> String {
        self.config.thread_name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> TickerState {
        self.shared.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        let lc = self.shared.lifecycle.lock();
        lc.state == TickerState::Running && !lc.exited && !self.shared.cancel_token.is_cancelled()
    }

    pub fn stats(&self) -> TickerStats {
        self.shared.counters.snapshot()
    }

    /// Spawns the worker thread. Only valid on an idle ticker; never blocks on
    /// the worker.
    pub fn start(&self) -> Result<()> {
        let mut lc = self.shared.lifecycle.lock();
        if lc.state != TickerState::Idle {
            return Err(TickerError::AlreadyStarted { state: lc.state });
        }

        let name = self.name();
        let span_name = name.clone();
        let mut tick_loop = TickLoop::new(self.interval, self.shared.clone());
        let handle = self
            .spawner
            .spawn(name.clone(), move || {
                let span = span!(Level::INFO, "ticker", name = %span_name);
                let _enter = span.enter();
                tick_loop.run();
            })
            .map_err(|source| TickerError::Spawn {
                name: name.clone(),
                source,
            })?;

        lc.worker_id = Some(handle.thread().id());
        lc.worker = Some(handle);
        lc.state = TickerState::Running;
        info!("ticker {} started, interval {:?}", name, self.interval);
        Ok(())
    }

    /// Stops the ticker for good and waits for the worker thread to exit.
    ///
    /// When called from a tick handler (on the worker thread) it only requests
    /// the stop: no further tick is dispatched, and the thread leaves its loop
    /// once the handler returns.
    pub fn cancel(&self) {
        self.shared.cancel_token.cancel();

        let handle = {
            let mut lc = self.shared.lifecycle.lock();
            match lc.state {
                TickerState::Stopped => return,
                TickerState::Idle => {
                    lc.state = TickerState::Stopped;
                    debug!("ticker {} cancelled before start", self.name());
                    return;
                }
                TickerState::Running | TickerState::Cancelling => {
                    lc.state = TickerState::Cancelling;
                }
            }

            if lc.worker_id == Some(thread::current().id()) {
                debug!("ticker {} cancelled from its own tick handler", self.name());
                return;
            }

            while !lc.exited {
                self.shared.exited.wait(&mut lc);
            }
            lc.state = TickerState::Stopped;
            lc.worker.take()
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("ticker {} worker thread panicked", self.name());
            }
            info!("ticker {} stopped after {} ticks", self.name(), self.stats().ticks);
        }
    }

    pub fn subscribe<L: Listener>(&self, listener: L) -> Subscription {
        self.shared.listeners.insert(Box::new(listener))
    }

    /// Like [`Ticker::subscribe`], unsubscribing when the guard is dropped.
    pub fn subscribe_scoped<L: Listener>(&self, listener: L) -> SubscriptionGuard {
        let id = self.subscribe(listener);
        SubscriptionGuard::new(id, &self.shared.listeners)
    }

    /// Subscribes a one-slot channel. A tick is dropped rather than queued if
    /// the previous one has not been received yet.
    pub fn subscribe_channel(&self) -> (Subscription, flume::Receiver<Tick>) {
        let (tx, rx) = flume::bounded(1);
        (self.subscribe(tx), rx)
    }

    /// Returns whether `subscription` was still registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.shared.listeners.remove(subscription)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Ticker::with_valid_config(
            TickerConfig::default(),
            Duration::from_nanos((DEFAULT_INTERVAL_MS * 1_000_000.0) as u64),
        )
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
pub struct TickerBuilder {
    config: TickerConfig,
}

impl TickerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Label of the owning context, prefixed to the worker thread name
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = Some(owner.into());
        self
    }

    pub fn interval_ms(mut self, interval_ms: f64) -> Self {
        self.config.interval_ms = interval_ms;
        self
    }

    pub fn build(self) -> Result<Ticker> {
        Ticker::new(self.config)
    }
}
