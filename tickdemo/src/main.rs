use std::io::Write;

use tickdemo::{app, Cli};
use tracing::info;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn main() -> anyhow::Result<()> {
    let cli: Cli = argh::from_env();

    if cli.version {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        writeln!(
            stdout,
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        )?;
        return Ok(())
    }

    tracing_subscriber::fmt::init();

    let report = app::run(&cli)?;
    info!(
        "{} system ticks, {} reached the main loop, {} while it was blocked",
        report.system_ticks, report.main_loop_ticks, report.modal_ticks,
    );
    Ok(())
}
