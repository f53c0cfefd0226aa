use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::TickerError;

pub const DEFAULT_INTERVAL_MS: f64 = 10.0;
pub const DEFAULT_NAME: &str = "ticker";

/// Settings fixed when a ticker is built. Readable from TOML:
///
/// ```toml
/// name = "system-tick"
/// owner = "editor"
/// interval_ms = 16.6
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TickerConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub interval_ms: f64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        TickerConfig {
            name: String::from(DEFAULT_NAME),
            owner: None,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl TickerConfig {
    pub fn from_toml_str(s: &str) -> Result<TickerConfig> {
        let cfg: TickerConfig = toml::de::from_str(s).context("invalid ticker config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<TickerConfig> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("could not read ticker config {}", path.display()))?;
        TickerConfig::from_toml_str(&s)
            .with_context(|| format!("in ticker config {}", path.display()))
    }

    pub fn validate(&self) -> std::result::Result<(), TickerError> {
        self.interval()?;
        for label in std::iter::once(&self.name).chain(self.owner.iter()) {
            if label.contains('\0') {
                return Err(TickerError::InvalidName(label.clone()));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> std::result::Result<Duration, TickerError> {
        let ms = self.interval_ms;
        let nanos = (ms * 1_000_000.0).round();
        // also rejects NaN, and intervals too small to measure in nanoseconds
        if !(nanos >= 1.0 && nanos < u64::MAX as f64) {
            return Err(TickerError::InvalidInterval(ms));
        }
        Ok(Duration::from_nanos(nanos as u64))
    }

    /// Worker thread name, `owner-name` when an owner is set
    pub fn thread_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}-{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}
