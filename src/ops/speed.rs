//! Transfer throughput measurement.

use std::io::Write;
use std::time::{Duration, Instant};

use rand::RngCore;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::config::Configuration;
use crate::remote::{command, CaptureMode, RemoteInvoker};

use super::{OpError, Session};

/// Size of the generated test file when none is requested.
pub const DEFAULT_SPEED_TEST_MB: u64 = 10;

const MIB: u64 = 1024 * 1024;
/// Write granularity, keeps memory use at one chunk regardless of size.
const CHUNK_SIZE: usize = MIB as usize;

/// Measured throughput of one transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl SpeedReport {
    /// Megabytes (MiB) per second.
    pub fn megabytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(0.001);
        self.bytes as f64 / MIB as f64 / secs
    }

    /// Megabits per second.
    pub fn megabits_per_sec(&self) -> f64 {
        self.megabytes_per_sec() * 8.0
    }

    fn print(&self) {
        println!("✓ Speed test complete");
        println!("  File size:     {} MB", self.bytes / MIB);
        println!("  Transfer time: {:.2} s", self.elapsed.as_secs_f64());
        println!(
            "  Throughput:    {:.2} MB/s ({:.2} Mb/s)",
            self.megabytes_per_sec(),
            self.megabits_per_sec()
        );
    }
}

/// Create a temporary file of `size_mb` MiB of random bytes.
///
/// The file is deleted when the returned guard is dropped.
fn write_test_file(size_mb: u64) -> Result<NamedTempFile, OpError> {
    let mut file = Builder::new()
        .prefix("ssh_push_speed_")
        .suffix(".bin")
        .tempfile()
        .map_err(|e| OpError::io("failed to create speed test file", e))?;

    let mut rng = rand::thread_rng();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    for _ in 0..size_mb {
        rng.fill_bytes(&mut chunk);
        file.write_all(&chunk)
            .map_err(|e| OpError::io("failed to write speed test file", e))?;
    }
    file.flush()
        .map_err(|e| OpError::io("failed to write speed test file", e))?;

    debug!("Wrote {} MB test file to {}", size_mb, file.path().display());
    Ok(file)
}

impl<I: RemoteInvoker> Session<I> {
    /// Time the transfer of a `size_mb` MiB file to the remote host.
    pub fn speed_test(&self, size_mb: u64) -> Result<SpeedReport, OpError> {
        let config = self.require_config()?;
        let size_mb = size_mb.max(1);

        let mkdir = command::mkdir_remote_dir(&config);
        self.run_remote(
            "creating remote directory",
            &mkdir,
            self.timeouts.housekeeping,
            CaptureMode::Capture,
        )?;

        println!("Generating {} MB test file...", size_mb);
        let local = write_test_file(size_mb)?;

        let remote_file = command::remote_path(
            &config,
            &format!(".ssh_push_speed_test_{}.bin", std::process::id()),
        );
        let scp = command::scp(&config, &[local.path().to_path_buf()], &remote_file, false);

        println!("Transferring to {}...", config.hostname);
        let start = Instant::now();
        let transfer = self.run_remote("speed test transfer", &scp, self.timeouts.speed_test, CaptureMode::Capture);
        let elapsed = start.elapsed();

        // A failed or killed transfer can still leave a partial file behind.
        if !matches!(transfer, Err(OpError::Invoke(_))) {
            self.remove_remote_artifact(&config, &remote_file);
        }

        if let Err(e) = local.close() {
            warn!("Failed to remove temporary test file: {}", e);
        }

        transfer?;

        let report = SpeedReport {
            bytes: size_mb * MIB,
            elapsed,
        };
        report.print();
        Ok(report)
    }

    /// Best-effort removal of the remote test file. Failures are only logged.
    fn remove_remote_artifact(&self, config: &Configuration, remote_file: &str) {
        let cmd = command::remove_remote_file(config, remote_file);
        match self.invoker.run(&cmd, self.timeouts.housekeeping, CaptureMode::Capture) {
            Ok(outcome) if outcome.success => debug!("Removed remote test file {}", remote_file),
            Ok(outcome) => debug!(
                "Remote cleanup of {} failed (timed_out={}): {}",
                remote_file,
                outcome.timed_out,
                outcome.stderr.trim()
            ),
            Err(e) => debug!("Remote cleanup of {} failed: {}", remote_file, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::configured_dir;
    use crate::remote::{InvokeError, Outcome, Program, RemoteCommand, StubInvoker};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    /// Local file path and its size as seen while scp was "running".
    type Observed = Rc<RefCell<Option<(PathBuf, u64)>>>;

    fn observing_invoker(scp_result: fn() -> Result<Outcome, InvokeError>) -> (StubInvoker, Observed) {
        let observed: Observed = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&observed);
        let invoker = StubInvoker::new(move |cmd: &RemoteCommand| {
            if cmd.program == Program::Scp {
                let local = PathBuf::from(&cmd.args[cmd.args.len() - 2]);
                let size = std::fs::metadata(&local).map(|m| m.len()).unwrap_or(0);
                *sink.borrow_mut() = Some((local, size));
                return scp_result();
            }
            Ok(Outcome::ok(""))
        });
        (invoker, observed)
    }

    #[test]
    fn test_speed_report_rates() {
        let report = SpeedReport {
            bytes: 10 * MIB,
            elapsed: Duration::from_secs(2),
        };
        assert!((report.megabytes_per_sec() - 5.0).abs() < 1e-9);
        assert!((report.megabits_per_sec() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_report_zero_elapsed_is_finite() {
        let report = SpeedReport {
            bytes: MIB,
            elapsed: Duration::ZERO,
        };
        assert!(report.megabytes_per_sec().is_finite());
    }

    #[test]
    fn test_write_test_file_size() {
        let file = write_test_file(2).unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 2 * MIB);
    }

    #[test]
    fn test_temp_file_sized_then_removed_on_success() {
        let (dir, _) = configured_dir();
        let (invoker, observed) = observing_invoker(|| Ok(Outcome::ok("")));
        let session = Session::new(dir.path(), &invoker);

        let report = session.speed_test(1).unwrap();
        assert_eq!(report.bytes, MIB);

        let (local, size) = observed.borrow().clone().unwrap();
        assert!(size >= MIB);
        assert!(!local.exists());

        let commands = invoker.commands();
        let programs: Vec<_> = commands.iter().map(|c| c.program).collect();
        assert_eq!(programs, vec![Program::Ssh, Program::Scp, Program::Ssh]);
        assert_eq!(commands[0].args.last().map(String::as_str), Some("mkdir -p ~/fpga_work"));
        let target = commands[1].args.last().unwrap();
        assert!(target.starts_with("pi@192.168.1.100:~/fpga_work/.ssh_push_speed_test_"));
        assert!(commands[2].args.last().unwrap().starts_with("rm -f ~/fpga_work/.ssh_push_speed_test_"));
    }

    #[test]
    fn test_temp_file_removed_on_failure() {
        let (dir, _) = configured_dir();
        let (invoker, observed) = observing_invoker(|| Ok(Outcome::failed("lost connection")));
        let session = Session::new(dir.path(), &invoker);

        let err = session.speed_test(1).unwrap_err();
        assert!(matches!(err, OpError::ConnectionFailed { .. }));

        let (local, size) = observed.borrow().clone().unwrap();
        assert!(size >= MIB);
        assert!(!local.exists());
    }

    #[test]
    fn test_timeout_is_distinct_and_cleans_up() {
        let (dir, _) = configured_dir();
        let (invoker, observed) = observing_invoker(|| Ok(Outcome::timeout()));
        let session = Session::new(dir.path(), &invoker);

        let err = session.speed_test(1).unwrap_err();
        assert!(matches!(err, OpError::Timeout { secs: 300, .. }));

        let (local, _) = observed.borrow().clone().unwrap();
        assert!(!local.exists());
    }

    #[test]
    fn test_missing_scp_skips_remote_cleanup() {
        let (dir, _) = configured_dir();
        let (invoker, observed) =
            observing_invoker(|| Err(InvokeError::NotFound { program: Program::Scp }));
        let session = Session::new(dir.path(), &invoker);

        let err = session.speed_test(1).unwrap_err();
        assert_eq!(err.exit_code(), 5);
        let programs: Vec<_> = invoker.commands().iter().map(|c| c.program).collect();
        assert_eq!(programs, vec![Program::Ssh, Program::Scp]);

        let (local, _) = observed.borrow().clone().unwrap();
        assert!(!local.exists());
    }

    #[test]
    fn test_remote_cleanup_failure_keeps_measurement() {
        let (dir, _) = configured_dir();
        let invoker = StubInvoker::new(|cmd| {
            let is_cleanup = cmd.args.last().map_or(false, |a| a.starts_with("rm -f"));
            if is_cleanup {
                Ok(Outcome::failed("rm: permission denied"))
            } else {
                Ok(Outcome::ok(""))
            }
        });
        let session = Session::new(dir.path(), &invoker);

        assert!(session.speed_test(1).is_ok());
    }

    #[test]
    fn test_remote_dir_created_before_transfer() {
        let (dir, _) = configured_dir();
        let invoker = StubInvoker::new(|cmd| match cmd.program {
            Program::Ssh => Ok(Outcome::failed("mkdir: cannot create directory: Permission denied")),
            _ => Ok(Outcome::ok("")),
        });
        let session = Session::new(dir.path(), &invoker);

        let err = session.speed_test(1).unwrap_err();
        assert!(matches!(err, OpError::ConnectionFailed { action: "creating remote directory", .. }));

        let calls = invoker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.args.last().map(String::as_str), Some("mkdir -p ~/fpga_work"));
        assert_eq!(calls[0].1, Duration::from_secs(10));
    }
}
