use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use ticker::{Tick, Ticker, TickerConfig};

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::Cli;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Ticks seen by the listener on the ticker's own thread
    pub system_ticks: u64,
    /// Ticks the main loop received through its channel
    pub main_loop_ticks: u64,
    /// System ticks that happened while the main loop was blocked
    pub modal_ticks: u64,
}

/// What the main loop receives
#[derive(Debug, Clone, Copy)]
pub enum Event {
    Tick(Tick),
    /// A modal dialog that keeps the main loop busy for this long
    Modal(Duration),
}

impl From<Tick> for Event {
    fn from(tick: Tick) -> Self {
        Event::Tick(tick)
    }
}

/// Main loop state, fed one tick at a time
pub struct App {
    pub last_seq: u64,
    pub received: u64,
    pub skipped: u64,
}

impl App {
    pub fn new() -> App {
        App {
            last_seq: 0,
            received: 0,
            skipped: 0,
        }
    }

    pub fn on_tick(&mut self, tick: Tick) {
        self.received += 1;
        // ticks coalesced while we were busy show up as gaps in seq
        self.skipped += tick.seq.saturating_sub(self.last_seq + 1);
        self.last_seq = tick.seq;
    }
}

impl Default for App {
    fn default() -> Self {
        App::new()
    }
}

pub fn ticker_config(cli: &Cli) -> Result<TickerConfig> {
    let mut config = match &cli.config {
        Some(path) => TickerConfig::load(path)?,
        None => TickerConfig::default(),
    };
    if config.owner.is_none() {
        config.owner = Some(String::from(env!("CARGO_PKG_NAME")));
    }
    if let Some(ms) = cli.interval_ms {
        config.interval_ms = ms;
    }
    Ok(config)
}

pub fn run(cli: &Cli) -> Result<Report> {
    let ticker = Ticker::new(ticker_config(cli)?).context("could not build ticker")?;

    // System tick - runs on the ticker thread, unaffected by the main loop
    let system_ticks = Arc::new(AtomicU64::new(0));
    let s = system_ticks.clone();
    ticker.subscribe(move |tick: &Tick| -> Result<()> {
        s.store(tick.seq, Ordering::Release);
        Ok(())
    });

    // Main loop ticks - only seen when the loop gets around to receiving them
    let (tx_event, rx_event) = flume::bounded::<Event>(1);
    ticker.subscribe(tx_event.clone());

    ticker.start()?;
    info!("ticking every {:?} for {} ms", ticker.interval(), cli.run_ms);

    let run_for = Duration::from_millis(cli.run_ms);
    let dialog = if cli.modal_ms > 0 {
        let blocked_for = Duration::from_millis(cli.modal_ms);
        let handle = thread::Builder::new()
            .name(String::from("dialog"))
            .spawn(move || {
                thread::sleep(run_for / 2);
                if tx_event.send(Event::Modal(blocked_for)).is_err() {
                    debug!("main loop gone before the dialog opened");
                }
            })
            .context("could not spawn dialog thread")?;
        Some(handle)
    } else {
        drop(tx_event);
        None
    };

    let mut app = App::new();
    let mut modal_ticks = 0;
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed >= run_for {
            break;
        }
        match rx_event.recv_timeout(run_for - elapsed) {
            Ok(Event::Tick(tick)) => app.on_tick(tick),
            Ok(Event::Modal(blocked_for)) => {
                let before = system_ticks.load(Ordering::Acquire);
                info!("main loop blocked for {:?}", blocked_for);
                thread::sleep(blocked_for);
                modal_ticks = system_ticks.load(Ordering::Acquire) - before;
                info!("main loop resumed, {} system ticks meanwhile", modal_ticks);
            }
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => bail!("ticker channel closed"),
        }
    }

    drop(rx_event);
    if let Some(dialog) = dialog {
        if dialog.join().is_err() {
            error!("dialog thread panicked");
        }
    }
    ticker.cancel();
    debug!("main loop skipped {} coalesced ticks", app.skipped);

    Ok(Report {
        system_ticks: system_ticks.load(Ordering::Acquire),
        main_loop_ticks: app.received,
        modal_ticks,
    })
}
