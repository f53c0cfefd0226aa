//! A periodic tick from a dedicated thread.
//!
//! Event loops that stop dispatching for a while (a modal prompt, a long
//! blocking call) also stop their own timers. A [`Ticker`] keeps time on its
//! own worker thread instead, so its listeners keep hearing about every
//! interval regardless of what the owning thread is doing.
//!
//! ```no_run
//! use ticker::{Tick, Ticker};
//!
//! let ticker = Ticker::with_interval_ms(16.0)?;
//! ticker.subscribe(|tick: &Tick| -> anyhow::Result<()> {
//!     println!("tick {}", tick.seq);
//!     Ok(())
//! });
//! ticker.start()?;
//! // ...
//! ticker.cancel();
//! # Ok::<(), ticker::TickerError>(())
//! ```
pub mod cancel;
pub mod config;
pub mod error;
pub mod listeners;
pub mod ticker;
mod worker;

pub use cancel::CancellationToken;
pub use config::TickerConfig;
pub use error::{ListenerError, TickerError};
pub use listeners::{Listener, Subscription, SubscriptionGuard, Tick};
pub use ticker::{Ticker, TickerBuilder, TickerState};
pub use worker::{live_workers, TickerStats};
