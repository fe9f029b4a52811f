//! Argument vectors for the external SSH tooling.
//!
//! Everything here is pure: commands are assembled but never run, so the
//! exact flags can be checked without a network.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Configuration;

/// External program a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    /// Remote command execution
    Ssh,
    /// File transfer
    Scp,
    /// Local key pair generation
    KeyGen,
    /// Public key installation on the remote host
    CopyId,
}

impl Program {
    /// Executable name looked up on PATH.
    pub fn binary(&self) -> &'static str {
        match self {
            Program::Ssh => "ssh",
            Program::Scp => "scp",
            Program::KeyGen => "ssh-keygen",
            Program::CopyId => "ssh-copy-id",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// A fully assembled invocation of one external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: Program,
    pub args: Vec<String>,
}

impl RemoteCommand {
    fn new(program: Program, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Value following `flag`, if the flag is present.
    #[cfg(test)]
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Render as a line that can be pasted into a shell.
    pub fn display(&self) -> String {
        let mut line = self.program.binary().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Quote an argument for display in a POSIX shell.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=~+,%".contains(c));

    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Quote a remote path for the remote shell, leaving a leading `~/`
/// unquoted so the remote side still expands it.
pub fn remote_shell_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// Identity-file arguments for key authentication, empty otherwise.
fn auth_args(config: &Configuration) -> Vec<String> {
    match config.identity_file() {
        Some(key) => vec!["-i".to_string(), key.to_string_lossy().to_string()],
        None => Vec::new(),
    }
}

/// `ssh` invocation running `remote_command` on the configured host.
pub fn ssh(config: &Configuration, remote_command: &str) -> RemoteCommand {
    let mut args = auth_args(config);
    args.push("-p".to_string());
    args.push(config.port.to_string());
    args.push(config.hostname.clone());
    args.push(remote_command.to_string());

    RemoteCommand::new(Program::Ssh, args)
}

/// `scp` invocation copying `sources` to `destination` on the remote host.
pub fn scp(config: &Configuration, sources: &[PathBuf], destination: &str, verbose: bool) -> RemoteCommand {
    let mut args = auth_args(config);
    // scp spells the port flag in upper case
    args.push("-P".to_string());
    args.push(config.port.to_string());
    if verbose {
        args.push("-v".to_string());
    }
    args.extend(sources.iter().map(|s| s.to_string_lossy().to_string()));
    args.push(format!("{}:{}", config.hostname, destination));

    RemoteCommand::new(Program::Scp, args)
}

/// Remote working directory as a directory target (`<remote_dir>/`).
pub fn remote_dir_target(config: &Configuration) -> String {
    format!("{}/", config.remote_dir.trim_end_matches('/'))
}

/// Path of `name` inside the remote working directory.
pub fn remote_path(config: &Configuration, name: &str) -> String {
    format!("{}{}", remote_dir_target(config), name.trim_start_matches('/'))
}

/// Create the remote working directory if needed.
pub fn mkdir_remote_dir(config: &Configuration) -> RemoteCommand {
    ssh(config, &format!("mkdir -p {}", remote_shell_path(&config.remote_dir)))
}

/// List the remote working directory.
pub fn list_remote_dir(config: &Configuration) -> RemoteCommand {
    ssh(config, &format!("ls -la {}", remote_shell_path(&config.remote_dir)))
}

/// Remove a single remote file, ignoring absence.
pub fn remove_remote_file(config: &Configuration, remote_file: &str) -> RemoteCommand {
    ssh(config, &format!("rm -f {}", remote_shell_path(remote_file)))
}

/// RSA 4096 key pair with an empty passphrase at `key_path`.
pub fn keygen(key_path: &Path) -> RemoteCommand {
    let args = vec![
        "-t".to_string(),
        "rsa".to_string(),
        "-b".to_string(),
        "4096".to_string(),
        "-N".to_string(),
        String::new(),
        "-f".to_string(),
        key_path.to_string_lossy().to_string(),
        "-q".to_string(),
    ];
    RemoteCommand::new(Program::KeyGen, args)
}

/// Install `public_key` into the remote host's authorized keys.
pub fn copy_id(config: &Configuration, public_key: &Path) -> RemoteCommand {
    let args = vec![
        "-i".to_string(),
        public_key.to_string_lossy().to_string(),
        "-p".to_string(),
        config.port.to_string(),
        config.hostname.clone(),
    ];
    RemoteCommand::new(Program::CopyId, args)
}
