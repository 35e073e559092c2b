use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogLimit;
use crate::error::{Error, Result};

/// Runtime settings, loaded from an optional JSON file.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wireless interface to drive; auto-detected when absent.
    pub interface: Option<String>,
    /// Time spent listening on each channel.
    pub dwell_ms: u64,
    /// Interval between deauthentication bursts.
    pub deauth_period_ms: u64,
    /// Frames buffered between the capture context and the scanner.
    pub capture_queue: usize,
    pub catalog: CatalogLimit,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: None,
            dwell_ms: 5000,
            deauth_period_ms: 100,
            capture_queue: 1024,
            catalog: CatalogLimit::unbounded(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dwell_ms == 0 {
            return Err(Error::Config("dwell_ms must be positive".to_string()));
        }
        if self.deauth_period_ms == 0 {
            return Err(Error::Config("deauth_period_ms must be positive".to_string()));
        }
        if self.capture_queue == 0 {
            return Err(Error::Config("capture_queue must be positive".to_string()));
        }
        if self.catalog.max_devices == Some(0) {
            return Err(Error::Config(
                "catalog.max_devices must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn deauth_period(&self) -> Duration {
        Duration::from_millis(self.deauth_period_ms)
    }
}
