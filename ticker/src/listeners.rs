use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Instant;

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::error::ListenerError;

/// One periodic notification.
#[derive(Clone, Copy, Debug)]
pub struct Tick {
    /// 1 for the first tick of a ticker, then increasing by one
    pub seq: u64,
    /// When the worker began dispatching this tick
    pub at: Instant,
}

/// Receives ticks on the worker thread.
///
/// An `Err` or a panic is contained by the dispatcher: it is logged and counted,
/// and the ticker carries on delivering to this listener and all others.
pub trait Listener: Send + 'static {
    fn on_tick(&mut self, tick: &Tick) -> Result<()>;

    /// A closed listener is unsubscribed after the tick it was just given.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> Listener for F
where
    F: FnMut(&Tick) -> Result<()> + Send + 'static,
{
    fn on_tick(&mut self, tick: &Tick) -> Result<()> {
        self(tick)
    }
}

/// Forwards ticks into a channel so another thread can consume them from its
/// own loop. When the channel is full the tick is dropped rather than waited
/// on; once every receiver is gone the listener closes.
impl<E> Listener for flume::Sender<E>
where
    E: From<Tick> + Send + 'static,
{
    fn on_tick(&mut self, tick: &Tick) -> Result<()> {
        match self.try_send(E::from(*tick)) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                debug!("tick {} coalesced, receiver is behind", tick.seq);
                Ok(())
            }
            Err(flume::TrySendError::Disconnected(_)) => bail!("tick receiver disconnected"),
        }
    }

    fn is_closed(&self) -> bool {
        self.is_disconnected()
    }
}

/// Opaque handle for a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type SharedListener = Arc<Mutex<Box<dyn Listener>>>;

struct RegistryInner {
    next_id: u64,
    entries: Vec<(Subscription, SharedListener)>,
}

/// Ordered set of listeners. Dispatch works on a snapshot, so the set can be
/// changed from any thread, including from inside a handler.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    pub(crate) fn insert(&self, listener: Box<dyn Listener>) -> Subscription {
        let mut inner = self.inner.lock();
        let id = Subscription(inner.next_id);
        inner.next_id += 1;
        inner.entries.push((id, Arc::new(Mutex::new(listener))));
        id
    }

    pub(crate) fn remove(&self, id: Subscription) -> bool {
        // the listener is dropped after the lock is released
        let removed = {
            let mut inner = self.inner.lock();
            let index = inner.entries.iter().position(|(s, _)| *s == id);
            index.map(|i| inner.entries.remove(i))
        };
        removed.is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn snapshot(&self) -> Vec<(Subscription, SharedListener)> {
        self.inner.lock().entries.clone()
    }

    /// Delivers `tick` to every listener registered right now, in subscription
    /// order, then drops the ones that have closed. Returns the number of
    /// listeners that failed.
    pub(crate) fn dispatch(&self, tick: &Tick) -> u64 {
        let mut failures = 0;
        let mut closed = Vec::new();
        for (subscription, listener) in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut listener = listener.lock();
                let result = listener.on_tick(tick);
                (result, listener.is_closed())
            }));
            match outcome {
                Ok((Ok(()), done)) => {
                    if done {
                        closed.push(subscription);
                    }
                }
                Ok((Err(e), done)) => {
                    failures += 1;
                    if done {
                        closed.push(subscription);
                    }
                    let err = ListenerError {
                        subscription,
                        tick: tick.seq,
                        message: format!("{:#}", e),
                    };
                    warn!("{}", err);
                }
                Err(payload) => {
                    failures += 1;
                    let err = ListenerError {
                        subscription,
                        tick: tick.seq,
                        message: format!("panicked: {}", panic_message(&*payload)),
                    };
                    error!("{}", err);
                }
            }
        }
        for subscription in closed {
            if self.remove(subscription) {
                debug!("listener {} closed, unsubscribed", subscription);
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Unsubscribes its listener when dropped.
#[must_use = "dropping the guard unsubscribes the listener"]
pub struct SubscriptionGuard {
    id: Subscription,
    registry: Weak<Registry>,
}

impl SubscriptionGuard {
    pub(crate) fn new(id: Subscription, registry: &Arc<Registry>) -> SubscriptionGuard {
        SubscriptionGuard {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn subscription(&self) -> Subscription {
        self.id
    }

    /// Keeps the listener registered for the rest of the ticker's life.
    pub fn detach(self) -> Subscription {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let span = span!(Level::DEBUG, "subscription_drop");
            let _enter = span.enter();
            registry.remove(self.id);
            debug!("subscription {} dropped", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            at: Instant::now(),
        }
    }

    fn counter(count: &Arc<AtomicUsize>) -> Box<dyn Listener> {
        let count = count.clone();
        Box::new(move |_: &Tick| -> Result<()> {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn dispatches_in_subscription_order() {
        let registry = Registry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let order = order.clone();
            registry.insert(Box::new(move |_: &Tick| -> Result<()> {
                order.lock().push(name);
                Ok(())
            }));
        }

        assert_eq!(registry.dispatch(&tick(1)), 0);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn removed_listener_gets_nothing() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = registry.insert(counter(&count));

        assert!(registry.remove(id));
        assert!(!registry.remove(id), "second removal");
        registry.dispatch(&tick(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn failures_are_contained() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.insert(Box::new(|_: &Tick| -> Result<()> { bail!("refused") }));
        registry.insert(Box::new(|_: &Tick| -> Result<()> { panic!("boom") }));
        registry.insert(counter(&count));

        assert_eq!(registry.dispatch(&tick(1)), 2);
        assert_eq!(registry.dispatch(&tick(2)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_can_change_registry_during_dispatch() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let reg = registry.clone();
        let late = count.clone();
        registry.insert(Box::new(move |_: &Tick| -> Result<()> {
            reg.insert(counter(&late));
            Ok(())
        }));

        registry.dispatch(&tick(1));
        assert_eq!(count.load(Ordering::SeqCst), 0, "added mid-dispatch");
        assert_eq!(registry.len(), 2);

        registry.dispatch(&tick(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let registry = Arc::new(Registry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let guard = SubscriptionGuard::new(registry.insert(counter(&count)), &registry);

        registry.dispatch(&tick(1));
        drop(guard);
        registry.dispatch(&tick(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn channel_listener_coalesces_and_reports_disconnect() {
        let (mut tx, rx) = flume::bounded::<Tick>(1);
        tx.on_tick(&tick(1)).unwrap();
        tx.on_tick(&tick(2)).unwrap();

        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert!(rx.try_recv().is_err(), "second tick was coalesced");
        assert!(!tx.is_closed());

        drop(rx);
        assert!(tx.on_tick(&tick(3)).is_err());
        assert!(tx.is_closed());
    }

    #[derive(Debug)]
    enum Event {
        Tick(u64),
    }

    impl From<Tick> for Event {
        fn from(tick: Tick) -> Self {
            Event::Tick(tick.seq)
        }
    }

    #[test]
    fn channel_listener_converts_into_event_type() {
        let registry = Registry::new();
        let (tx, rx) = flume::unbounded::<Event>();
        registry.insert(Box::new(tx));

        registry.dispatch(&tick(7));
        match rx.try_recv() {
            Ok(Event::Tick(seq)) => assert_eq!(seq, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disconnected_channel_fails_once_then_leaves() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = flume::bounded::<Tick>(1);
        registry.insert(Box::new(tx));
        registry.insert(counter(&count));
        drop(rx);

        assert_eq!(registry.dispatch(&tick(1)), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(&tick(2)), 0);
        assert_eq!(registry.dispatch(&tick(3)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_stays_subscribed() {
        let registry = Registry::new();
        registry.insert(Box::new(|_: &Tick| -> Result<()> { panic!("boom") }));

        assert_eq!(registry.dispatch(&tick(1)), 1);
        assert_eq!(registry.dispatch(&tick(2)), 1);
        assert_eq!(registry.len(), 1);
    }
}
