//! Remote operations through the system SSH tooling.
//!
//! Commands are built by [`command`] and executed by a [`RemoteInvoker`],
//! which keeps command construction testable without a live host.

pub mod command;
mod invoker;

pub use command::{Program, RemoteCommand};
pub use invoker::{CaptureMode, Outcome, ProcessInvoker, RemoteInvoker};
#[cfg(test)]
pub use invoker::StubInvoker;

use std::time::Duration;

use thiserror::Error;

/// Bounded waits for each kind of invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Connection test and remote listing
    pub connect: Duration,
    /// File transfer
    pub push: Duration,
    /// Throughput measurement transfer
    pub speed_test: Duration,
    /// Key pair generation
    pub keygen: Duration,
    /// Public key installation
    pub copy_id: Duration,
    /// Best-effort remote cleanup and directory creation
    pub housekeeping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            push: Duration::from_secs(60),
            speed_test: Duration::from_secs(300),
            keygen: Duration::from_secs(30),
            copy_id: Duration::from_secs(30),
            housekeeping: Duration::from_secs(10),
        }
    }
}

/// Errors that prevent an external program from running at all.
#[derive(Error, Debug)]
pub enum InvokeError {
    /// The program is not installed or not on PATH
    #[error("required program not found on PATH: {program}")]
    NotFound { program: Program },

    /// The program exists but could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: Program,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the running program failed
    #[error("failed to wait on {program}: {source}")]
    Wait {
        program: Program,
        #[source]
        source: std::io::Error,
    },
}
