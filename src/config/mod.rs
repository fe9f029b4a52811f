//! Per-project connection settings.
//!
//! The configuration lives in a JSON file inside the project directory so
//! each checkout can point at its own remote device.

mod store;

pub use store::{ConfigState, ConfigStore};
#[cfg(test)]
pub use store::CONFIG_FILE;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;
/// Default remote working directory.
pub const DEFAULT_REMOTE_DIR: &str = "~/fpga_work";
/// Default private key used for key authentication.
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";

/// How the remote host authenticates us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Public key authentication with an identity file
    #[default]
    Key,
    /// Let the SSH client prompt for a password
    Password,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Key => f.write_str("key"),
            AuthMethod::Password => f.write_str("password"),
        }
    }
}

/// Connection settings for one remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Remote host, optionally prefixed with `user@`
    pub hostname: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Working directory on the remote host
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Authentication mode
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Private key path, only meaningful with key authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_remote_dir() -> String {
    DEFAULT_REMOTE_DIR.to_string()
}

impl Configuration {
    /// Create a key-authenticated configuration with default settings.
    #[cfg(test)]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            remote_dir: default_remote_dir(),
            auth_method: AuthMethod::Key,
            key_path: Some(DEFAULT_KEY_PATH.to_string()),
        }
    }

    /// Switch to password authentication, dropping any key path.
    #[cfg(test)]
    pub fn with_password_auth(mut self) -> Self {
        self.auth_method = AuthMethod::Password;
        self.key_path = None;
        self
    }

    /// Set the port.
    #[cfg(test)]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the remote working directory.
    #[cfg(test)]
    pub fn with_remote_dir(mut self, remote_dir: impl Into<String>) -> Self {
        self.remote_dir = remote_dir.into();
        self
    }

    /// Use key authentication with the given key path.
    #[cfg(test)]
    pub fn with_key(mut self, key_path: impl Into<String>) -> Self {
        self.auth_method = AuthMethod::Key;
        self.key_path = Some(key_path.into());
        self
    }

    /// The configured key path as written, falling back to the default
    /// when key authentication has no explicit path.
    pub fn key_path_or_default(&self) -> &str {
        self.key_path.as_deref().unwrap_or(DEFAULT_KEY_PATH)
    }

    /// Identity file to present, tilde-expanded. `None` for password auth.
    pub fn identity_file(&self) -> Option<PathBuf> {
        match self.auth_method {
            AuthMethod::Key => Some(expand_tilde(self.key_path_or_default())),
            AuthMethod::Password => None,
        }
    }

    /// Bring the value into its canonical shape.
    ///
    /// Key auth always carries a key path; password auth never does.
    pub fn normalized(mut self) -> Self {
        match self.auth_method {
            AuthMethod::Key => {
                if self.key_path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    self.key_path = Some(DEFAULT_KEY_PATH.to_string());
                }
            }
            AuthMethod::Password => self.key_path = None,
        }
        self
    }

    /// Check the invariants a loaded file must satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "hostname",
                reason: "must not be empty".to_string(),
            });
        }
        if self.remote_dir.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "remote_dir",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Field/value pairs in display order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("hostname", self.hostname.clone()),
            ("port", self.port.to_string()),
            ("remote_dir", self.remote_dir.clone()),
            ("auth_method", self.auth_method.to_string()),
        ];
        if let Some(ref key_path) = self.key_path {
            fields.push(("key_path", key_path.clone()));
        }
        fields
    }
}

/// Resolve a leading `~` against the current user's home directory.
///
/// Paths without a leading tilde, or when no home directory can be
/// determined, are returned unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(path),
    };

    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Errors raised while reading or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The file parsed but a field violates an invariant
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Serializing the configuration failed
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The file could not be written
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
