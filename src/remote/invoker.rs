//! Running external commands with a bounded wait.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use super::command::{Program, RemoteCommand};
use super::InvokeError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Whether the child's stdio is captured or shared with the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Pipe stdout/stderr and return them in the outcome
    Capture,
    /// Inherit the terminal, needed for password prompts and live progress
    Inherit,
}

/// Result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Process exited with status zero
    pub success: bool,
    /// Captured stdout (empty when inherited)
    pub stdout: String,
    /// Captured stderr (empty when inherited)
    pub stderr: String,
    /// Process was killed after exceeding its timeout
    pub timed_out: bool,
}

impl Outcome {
    /// Successful outcome with the given stdout.
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Non-zero exit with the given stderr.
    #[cfg(test)]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Killed after the deadline.
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

/// Executes remote commands.
pub trait RemoteInvoker {
    /// Run `command`, waiting at most `timeout`.
    fn run(&self, command: &RemoteCommand, timeout: Duration, capture: CaptureMode)
        -> Result<Outcome, InvokeError>;
}

impl<T: RemoteInvoker + ?Sized> RemoteInvoker for &T {
    fn run(&self, command: &RemoteCommand, timeout: Duration, capture: CaptureMode)
        -> Result<Outcome, InvokeError> {
        (**self).run(command, timeout, capture)
    }
}

/// Invoker backed by real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteInvoker for ProcessInvoker {
    fn run(&self, command: &RemoteCommand, timeout: Duration, capture: CaptureMode)
        -> Result<Outcome, InvokeError> {
        debug!("Executing ({:?}, timeout {}s): {}", capture, timeout.as_secs(), command);

        let mut cmd = Command::new(command.program.binary());
        cmd.args(&command.args);

        match capture {
            CaptureMode::Capture => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            CaptureMode::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
        }

        execute(cmd, command.program, timeout, capture)
    }
}

/// Spawn `cmd` in its own process group and collect its outcome within
/// `timeout`.
fn execute(mut cmd: Command, program: Program, timeout: Duration, capture: CaptureMode)
    -> Result<Outcome, InvokeError> {
    // ssh-copy-id and scp start ssh themselves; a timeout must reach them too
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;

    // Restored when dropped, after the child has been reaped.
    #[cfg(unix)]
    let _foreground = match capture {
        CaptureMode::Inherit => terminal::Foreground::hand_to(&child),
        CaptureMode::Capture => None,
    };
    #[cfg(not(unix))]
    let _ = capture;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let (success, timed_out) = wait_with_deadline(&mut child, timeout, program)?;

    // A killed child may leave descendants holding the pipes open, so the
    // readers are detached instead of joined.
    let outcome = if timed_out {
        Outcome::timeout()
    } else {
        Outcome {
            success,
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            timed_out,
        }
    };

    debug!("{} finished: success={} timed_out={}", program, outcome.success, outcome.timed_out);
    Ok(outcome)
}

fn spawn_error(program: Program, source: std::io::Error) -> InvokeError {
    if source.kind() == ErrorKind::NotFound {
        InvokeError::NotFound { program }
    } else {
        InvokeError::Spawn { program, source }
    }
}

/// Poll the child until it exits or the deadline passes.
///
/// Returns `(success, timed_out)`. A timed out child is killed and reaped.
fn wait_with_deadline(child: &mut Child, timeout: Duration, program: Program)
    -> Result<(bool, bool), InvokeError> {
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status.success(), false)),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_process_tree(child);
                    debug!("{} killed after {}s", program, timeout.as_secs());
                    return Ok((false, true));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_tree(child);
                return Err(InvokeError::Wait { program, source: e });
            }
        }
    }
}

/// Kill the child along with everything in its process group, then reap it.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: the child leads the process group created at spawn
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Terminal job control for children that share our terminal.
///
/// A child in its own process group is a background job, so it would stop
/// on the first password prompt unless it owns the terminal's foreground.
#[cfg(unix)]
mod terminal {
    use std::io::IsTerminal;
    use std::process::Child;

    /// Foreground ownership handed to a child; taken back on drop.
    pub(super) struct Foreground;

    impl Foreground {
        pub(super) fn hand_to(child: &Child) -> Option<Self> {
            if !std::io::stdin().is_terminal() {
                return None;
            }
            let pgid = libc::pid_t::try_from(child.id()).ok()?;

            // SAFETY: plain syscalls on stdin and a process group created at spawn
            unsafe {
                if libc::tcgetpgrp(libc::STDIN_FILENO) != libc::getpgrp() {
                    return None;
                }
                if libc::tcsetpgrp(libc::STDIN_FILENO, pgid) != 0 {
                    return None;
                }
                // It may already have stopped on terminal input
                libc::kill(-pgid, libc::SIGCONT);
            }
            Some(Foreground)
        }
    }

    impl Drop for Foreground {
        fn drop(&mut self) {
            // SAFETY: SIGTTOU is ignored only while the terminal is reclaimed
            unsafe {
                let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
                libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
                libc::signal(libc::SIGTTOU, previous);
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Invoker answering from a closure and recording every call.
#[cfg(test)]
pub struct StubInvoker {
    handler: Box<dyn Fn(&RemoteCommand) -> Result<Outcome, InvokeError>>,
    calls: std::cell::RefCell<Vec<(RemoteCommand, Duration, CaptureMode)>>,
}

#[cfg(test)]
impl StubInvoker {
    pub fn new(handler: impl Fn(&RemoteCommand) -> Result<Outcome, InvokeError> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: std::cell::RefCell::new(Vec::new()),
        }
    }

    /// Answer every call with a clone of `outcome`.
    pub fn always(outcome: Outcome) -> Self {
        Self::new(move |_| Ok(outcome.clone()))
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.calls.borrow().iter().map(|(c, _, _)| c.clone()).collect()
    }

    /// Full call records, including timeout and capture mode.
    pub fn calls(&self) -> Vec<(RemoteCommand, Duration, CaptureMode)> {
        self.calls.borrow().clone()
    }
}

#[cfg(test)]
impl RemoteInvoker for StubInvoker {
    fn run(&self, command: &RemoteCommand, timeout: Duration, capture: CaptureMode)
        -> Result<Outcome, InvokeError> {
        self.calls.borrow_mut().push((command.clone(), timeout, capture));
        (self.handler)(command)
    }
}
