pub mod app;

use argh::FromArgs;

#[derive(Debug, FromArgs, Clone)]
/// Runs a main loop that blocks in a "modal" phase while a system tick keeps
/// running on its own thread
pub struct Cli {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// tick period in ms (overrides the config file)
    #[argh(option)]
    pub interval_ms: Option<f64>,
    /// total run time in ms
    #[argh(option, default = "1000")]
    pub run_ms: u64,
    /// how long the main loop stops dispatching, in ms
    #[argh(option, default = "300")]
    pub modal_ms: u64,
    /// ticker config file path (TOML)
    #[argh(option)]
    pub config: Option<String>,
}
