//! Loading and saving the configuration file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ConfigError, Configuration};

/// Name of the configuration file, relative to the project directory.
pub const CONFIG_FILE: &str = ".ssh_push_config.json";

/// What was found at the configuration path.
#[derive(Debug)]
pub enum ConfigState {
    /// No configuration file exists
    Missing,
    /// A file exists but could not be used
    Corrupt(ConfigError),
    /// A valid configuration
    Loaded(Configuration),
}

/// Reads and writes the configuration file of one project directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store for the configuration file inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CONFIG_FILE),
        }
    }

    /// Full path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inspect the configuration file without collapsing failures.
    pub fn inspect(&self) -> ConfigState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return ConfigState::Missing,
            Err(e) => {
                return ConfigState::Corrupt(ConfigError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let config: Configuration = match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                return ConfigState::Corrupt(ConfigError::Parse {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        match config.validate() {
            Ok(()) => ConfigState::Loaded(config),
            Err(e) => ConfigState::Corrupt(e),
        }
    }

    /// Load the configuration.
    ///
    /// A missing or unusable file yields `None`. Unusable files are
    /// logged as a warning so the cause is not lost.
    #[allow(dead_code)]
    pub fn load(&self) -> Option<Configuration> {
        match self.inspect() {
            ConfigState::Loaded(config) => Some(config),
            ConfigState::Missing => None,
            ConfigState::Corrupt(e) => {
                warn!("Ignoring unusable configuration file: {}", e);
                None
            }
        }
    }

    /// Save the configuration as pretty-printed JSON, replacing any
    /// existing file.
    pub fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        let mut content = serde_json::to_string_pretty(config)?;
        content.push('\n');

        fs::write(&self.path, content).map_err(|e| ConfigError::Write {
            path: self.path.clone(),
            source: e,
        })?;

        debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }
}
