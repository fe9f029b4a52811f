//! User-facing operations.
//!
//! Each operation combines the configuration store, the command builder
//! and a remote invoker into one action and reports through [`OpError`].

mod connection;
mod push;
mod setup;
mod speed;

pub use speed::DEFAULT_SPEED_TEST_MB;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, ConfigState, ConfigStore, Configuration};
use crate::remote::{CaptureMode, InvokeError, Outcome, RemoteCommand, RemoteInvoker, Timeouts};

/// Failures surfaced by operations, each with its own exit code.
#[derive(Error, Debug)]
pub enum OpError {
    /// No configuration file in the project directory
    #[error("no SSH configuration found; run --setup first")]
    ConfigMissing,

    /// A configuration file exists but is unusable
    #[error("configuration file {path} could not be used ({reason}); run --setup to recreate it")]
    ConfigCorrupt { path: PathBuf, reason: String },

    /// Saving the configuration failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An external program could not be run
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// The remote command exited with a non-zero status
    #[error("{action} failed: {detail}")]
    ConnectionFailed { action: &'static str, detail: String },

    /// The remote command exceeded its timeout
    #[error("{action} timed out after {secs}s")]
    Timeout { action: &'static str, secs: u64 },

    /// Nothing to push
    #[error("no files to push")]
    NoFiles,

    /// A local filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Interactive input could not be read
    #[error("could not read input: {0}")]
    Input(#[source] std::io::Error),
}

impl OpError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            OpError::ConfigMissing | OpError::ConfigCorrupt { .. } => 7,
            OpError::ConnectionFailed { .. } => 3,
            OpError::Timeout { .. } => 4,
            OpError::Invoke(InvokeError::NotFound { .. }) => 5,
            OpError::NoFiles => 6,
            OpError::Config(_) | OpError::Invoke(_) | OpError::Io { .. } | OpError::Input(_) => 1,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OpError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Everything an operation needs: where the project lives and how to
/// reach the remote host.
pub struct Session<I> {
    store: ConfigStore,
    workdir: PathBuf,
    invoker: I,
    timeouts: Timeouts,
    verbose: bool,
}

impl<I: RemoteInvoker> Session<I> {
    /// Session for the project rooted at `workdir`.
    pub fn new(workdir: impl Into<PathBuf>, invoker: I) -> Self {
        let workdir = workdir.into();
        Self {
            store: ConfigStore::in_dir(&workdir),
            workdir,
            invoker,
            timeouts: Timeouts::default(),
            verbose: false,
        }
    }

    /// Override the default timeouts.
    #[cfg(test)]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Show transfer progress from the external programs.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Load the configuration, failing when it is missing or unusable.
    fn require_config(&self) -> Result<Configuration, OpError> {
        match self.store.inspect() {
            ConfigState::Loaded(config) => Ok(config),
            ConfigState::Missing => Err(OpError::ConfigMissing),
            ConfigState::Corrupt(e) => Err(OpError::ConfigCorrupt {
                path: self.store.path().to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Run a command and turn non-zero exits and timeouts into errors.
    fn run_remote(
        &self,
        action: &'static str,
        command: &RemoteCommand,
        timeout: Duration,
        capture: CaptureMode,
    ) -> Result<Outcome, OpError> {
        let outcome = self.invoker.run(command, timeout, capture)?;

        if outcome.timed_out {
            return Err(OpError::Timeout {
                action,
                secs: timeout.as_secs(),
            });
        }
        if !outcome.success {
            let detail = match outcome.stderr.trim() {
                "" => "remote command exited with a non-zero status".to_string(),
                stderr => stderr.to_string(),
            };
            return Err(OpError::ConnectionFailed { action, detail });
        }

        debug!("{} succeeded", action);
        Ok(outcome)
    }
}
