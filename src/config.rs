use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::monitor::MIN_READ_BUFFER;

/// Name of the configuration file looked up by [`MonitorConfig::load`].
pub const CONFIG_FILE: &str = "path-monitor.toml";

/// Default size of the buffer each inotify `read` fills.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Configuration loaded from `path-monitor.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Bytes requested per inotify read. Raised to the size of one maximal record if smaller.
    pub read_buffer_size: usize,
    /// Paths the `path-monitor` binary registers in addition to its arguments.
    pub paths: Vec<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            paths: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path-monitor.toml` in the given directory.
    ///
    /// Returns a default configuration if the file does not exist or cannot be parsed.
    pub fn load(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %config_path.display(), "failed to parse config: {err}. Using defaults.");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %config_path.display(), "failed to read config: {err}. Using defaults.");
                Self::default()
            }
        }
    }

    pub fn effective_read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(MIN_READ_BUFFER)
    }
}
