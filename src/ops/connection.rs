//! Connectivity test and remote listing.

use crate::config::Configuration;
use crate::remote::{command, CaptureMode, RemoteInvoker};

use super::{OpError, Session};

/// Text echoed by the remote host during a connection test.
const TEST_MARKER: &str = "SSH connection test successful";

impl<I: RemoteInvoker> Session<I> {
    /// Check that the configured host accepts a remote command.
    pub fn test(&self) -> Result<(), OpError> {
        let config = self.require_config()?;

        println!("Testing SSH connection to {}...", config.hostname);
        self.check_connection(&config)?;
        println!("✓ SSH connection successful!");
        Ok(())
    }

    pub(super) fn check_connection(&self, config: &Configuration) -> Result<(), OpError> {
        let cmd = command::ssh(config, &format!("echo \"{}\"", TEST_MARKER));
        let outcome = self.run_remote("SSH connection test", &cmd, self.timeouts.connect, CaptureMode::Capture)?;

        if !outcome.stdout.contains(TEST_MARKER) {
            tracing::debug!("Connection test output lacked marker: {:?}", outcome.stdout);
        }
        Ok(())
    }

    /// Print the contents of the remote working directory.
    pub fn list(&self) -> Result<(), OpError> {
        let config = self.require_config()?;

        let cmd = command::list_remote_dir(&config);
        let outcome = self.run_remote("listing remote files", &cmd, self.timeouts.connect, CaptureMode::Capture)?;

        println!("\nFiles in {}:", config.remote_dir);
        println!("{}", "=".repeat(40));
        print!("{}", outcome.stdout);
        if !outcome.stdout.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::configured_dir;
    use crate::remote::{InvokeError, Outcome, Program, StubInvoker};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_success_on_zero_exit() {
        let (dir, _) = configured_dir();
        let invoker = StubInvoker::always(Outcome::ok(format!("{}\n", TEST_MARKER)));
        let session = Session::new(dir.path(), &invoker);

        session.test().unwrap();

        let calls = invoker.calls();
        assert_eq!(calls.len(), 1);
        let (cmd, timeout, capture) = &calls[0];
        assert_eq!(cmd.program, Program::Ssh);
        assert_eq!(cmd.flag_value("-p"), Some("2222"));
        assert_eq!(*timeout, Duration::from_secs(10));
        assert_eq!(*capture, CaptureMode::Capture);
    }

    #[test]
    fn test_failure_on_nonzero_exit() {
        let (dir, _) = configured_dir();
        let session = Session::new(dir.path(), StubInvoker::always(Outcome::failed("Connection refused")));

        let err = session.test().unwrap_err();
        assert!(matches!(err, OpError::ConnectionFailed { .. }));
        assert!(err.to_string().contains("Connection refused"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_timeout_is_distinct() {
        let (dir, _) = configured_dir();
        let session = Session::new(dir.path(), StubInvoker::always(Outcome::timeout()));

        let err = session.test().unwrap_err();
        assert!(matches!(err, OpError::Timeout { secs: 10, .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_missing_config_short_circuits() {
        let dir = TempDir::new().unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        assert!(matches!(session.test(), Err(OpError::ConfigMissing)));
        assert!(matches!(session.list(), Err(OpError::ConfigMissing)));
        assert!(invoker.commands().is_empty());
    }

    #[test]
    fn test_missing_ssh_binary() {
        let (dir, _) = configured_dir();
        let session = Session::new(
            dir.path(),
            StubInvoker::new(|cmd| Err(InvokeError::NotFound { program: cmd.program })),
        );

        assert_eq!(session.test().unwrap_err().exit_code(), 5);
    }

    #[test]
    fn test_list_runs_ls() {
        let (dir, _) = configured_dir();
        let invoker = StubInvoker::always(Outcome::ok("total 0\n"));
        let session = Session::new(dir.path(), &invoker);

        session.list().unwrap();

        let commands = invoker.commands();
        assert_eq!(commands[0].args.last().map(String::as_str), Some("ls -la ~/fpga_work"));
    }

    #[test]
    fn test_list_surfaces_stderr() {
        let (dir, _) = configured_dir();
        let session = Session::new(
            dir.path(),
            StubInvoker::always(Outcome::failed("ls: cannot access '~/fpga_work': No such file or directory")),
        );

        let err = session.list().unwrap_err();
        assert!(err.to_string().ends_with("No such file or directory"));
    }
}
