//! Controller configuration, loadable from a YAML file.

use crate::command::WordOrder;
use crate::error::TesError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Connection and sizing parameters for a [`crate::DeviceController`].
///
/// Every field has a default, so a config file only needs the keys that
/// differ from a stock setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port path, or `host:port` when using a socket link.
    pub port: String,
    pub baud: u32,
    /// Reply deadline, in seconds.
    pub timeout: f64,
    /// Number of bias channels.
    pub num_tes: usize,
    /// Number of amplifier channels.
    pub num_lna: usize,
    /// Grammar of rail-addressed amplifier commands.
    pub lna_word_order: WordOrder,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: "/dev/ttyACM0".to_owned(),
            baud: 115_200,
            timeout: 1.0,
            num_tes: 6,
            num_lna: 6,
            lna_word_order: WordOrder::default(),
        }
    }
}

impl Config {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TesError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&text).map_err(|err| TesError::Config(err.to_string()))
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }
}
