use std::io;
use thiserror::Error;

use crate::{Subscription, TickerState};

#[derive(Debug, Error)]
pub enum TickerError {
    #[error("ticker cannot start from state {state:?}")]
    AlreadyStarted { state: TickerState },

    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("tick interval must be a positive number of milliseconds, got {0}")]
    InvalidInterval(f64),

    #[error("ticker name may not contain NUL bytes: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, TickerError>;

/// A listener failed while handling a tick. Logged by the dispatcher, never
/// returned to callers.
#[derive(Debug, Error)]
#[error("listener {subscription} failed on tick {tick}: {message}")]
pub struct ListenerError {
    pub subscription: Subscription,
    pub tick: u64,
    pub message: String,
}
