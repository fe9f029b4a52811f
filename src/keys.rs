//! Key pair provisioning for key-based authentication.
//!
//! Provisioning walks a small state machine:
//!
//! ```text
//! CheckExisting -> ReuseExisting | GenerateNew -> CopyToRemote -> Done
//!                                  GenerateNew | CopyToRemote -> Failed
//! ```
//!
//! Every failure ends in printed manual instructions; nothing here aborts
//! the surrounding setup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Configuration;
use crate::prompt::Prompter;
use crate::remote::{command, CaptureMode, Outcome, RemoteCommand, RemoteInvoker, Timeouts};

/// Where provisioning currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    CheckExisting,
    ReuseExisting,
    GenerateNew { remove_old: bool },
    CopyToRemote,
    Done(KeyOutcome),
    Failed(KeyFailure),
}

/// How a completed provisioning run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Public key was installed on the remote host
    Installed,
    /// Key exists locally but the user skipped installing it
    LocalOnly,
}

/// Step at which provisioning failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStage {
    Generate,
    CopyToRemote,
}

/// A failed provisioning run, with the command to finish it by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub stage: KeyStage,
    pub reason: String,
    pub manual_command: String,
}

/// Public key path belonging to a private key.
pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

/// Drives key generation and installation for one configuration.
pub struct KeyProvisioner<'a, I, P> {
    config: &'a Configuration,
    private_key: PathBuf,
    invoker: I,
    prompter: &'a mut P,
    timeouts: Timeouts,
}

impl<'a, I: RemoteInvoker, P: Prompter> KeyProvisioner<'a, I, P> {
    pub fn new(
        config: &'a Configuration,
        private_key: PathBuf,
        invoker: I,
        prompter: &'a mut P,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            config,
            private_key,
            invoker,
            prompter,
            timeouts,
        }
    }

    /// Run the state machine to completion.
    ///
    /// Returns the terminal state, which is either `Done` or `Failed`.
    pub fn provision(&mut self) -> KeyState {
        let mut state = KeyState::CheckExisting;

        loop {
            debug!("Key provisioning state: {:?}", state);
            let next = match &state {
                KeyState::CheckExisting => self.check_existing(),
                KeyState::ReuseExisting => {
                    println!("Using existing key {}", self.private_key.display());
                    KeyState::CopyToRemote
                }
                KeyState::GenerateNew { remove_old } => self.generate(*remove_old),
                KeyState::CopyToRemote => self.copy_to_remote(),
                KeyState::Done(_) | KeyState::Failed(_) => break,
            };
            state = next;
        }

        if let KeyState::Failed(ref failure) = state {
            print_failure(failure, &self.private_key);
        }
        state
    }

    fn check_existing(&mut self) -> KeyState {
        if !self.private_key.exists() {
            return KeyState::GenerateNew { remove_old: false };
        }

        println!("Found existing SSH key: {}", self.private_key.display());
        match self.prompter.confirm("Use the existing key?", true) {
            Ok(true) => KeyState::ReuseExisting,
            Ok(false) => KeyState::GenerateNew { remove_old: true },
            Err(e) => self.generate_failure(format!("could not read answer: {}", e)),
        }
    }

    fn generate(&mut self, remove_old: bool) -> KeyState {
        if remove_old {
            if let Err(e) = self.remove_old_keys() {
                return self.generate_failure(format!("could not remove old key: {}", e));
            }
        }

        if let Some(parent) = self.private_key.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                return self.generate_failure(format!("could not create {}: {}", parent.display(), e));
            }
        }

        println!("Generating RSA 4096 key pair at {}...", self.private_key.display());
        let cmd = command::keygen(&self.private_key);
        match self.invoker.run(&cmd, self.timeouts.keygen, CaptureMode::Capture) {
            Ok(outcome) if outcome.success => {
                println!("✓ Key pair generated");
                KeyState::CopyToRemote
            }
            Ok(outcome) => self.generate_failure(describe_failure(&outcome, self.timeouts.keygen.as_secs())),
            Err(e) => self.generate_failure(e.to_string()),
        }
    }

    /// Delete the old private and public key files. No backup is kept.
    fn remove_old_keys(&self) -> io::Result<()> {
        for path in [self.private_key.clone(), public_key_path(&self.private_key)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn copy_to_remote(&mut self) -> KeyState {
        let question = format!("Copy the public key to {} now?", self.config.hostname);
        match self.prompter.confirm(&question, true) {
            Ok(true) => {}
            Ok(false) => return KeyState::Done(KeyOutcome::LocalOnly),
            Err(e) => return self.copy_failure(format!("could not read answer: {}", e)),
        }

        println!("Copying public key to {} (you may be asked for a password)...", self.config.hostname);
        // ssh-copy-id prompts on the terminal, so stdio must stay attached
        let cmd = self.copy_command();
        match self.invoker.run(&cmd, self.timeouts.copy_id, CaptureMode::Inherit) {
            Ok(outcome) if outcome.success => {
                println!("✓ Public key installed on {}", self.config.hostname);
                KeyState::Done(KeyOutcome::Installed)
            }
            Ok(outcome) => self.copy_failure(describe_failure(&outcome, self.timeouts.copy_id.as_secs())),
            Err(e) => self.copy_failure(e.to_string()),
        }
    }

    fn copy_command(&self) -> RemoteCommand {
        command::copy_id(self.config, &public_key_path(&self.private_key))
    }

    fn generate_failure(&self, reason: String) -> KeyState {
        warn!("Key generation failed: {}", reason);
        KeyState::Failed(KeyFailure {
            stage: KeyStage::Generate,
            reason,
            manual_command: command::keygen(&self.private_key).display(),
        })
    }

    fn copy_failure(&self, reason: String) -> KeyState {
        warn!("Key installation failed: {}", reason);
        KeyState::Failed(KeyFailure {
            stage: KeyStage::CopyToRemote,
            reason,
            manual_command: self.copy_command().display(),
        })
    }
}

fn describe_failure(outcome: &Outcome, timeout_secs: u64) -> String {
    if outcome.timed_out {
        format!("timed out after {}s", timeout_secs)
    } else if outcome.stderr.trim().is_empty() {
        "exited with an error".to_string()
    } else {
        outcome.stderr.trim().to_string()
    }
}

fn print_failure(failure: &KeyFailure, private_key: &Path) {
    match failure.stage {
        KeyStage::Generate => {
            println!("✗ SSH key generation failed: {}", failure.reason);
            println!("  Generate a key manually with:");
            println!("    {}", failure.manual_command);
        }
        KeyStage::CopyToRemote => {
            println!("✗ Copying the public key failed: {}", failure.reason);
            println!("  Copy it manually with:");
            println!("    {}", failure.manual_command);
            println!(
                "  or append {} to ~/.ssh/authorized_keys on the remote host.",
                public_key_path(private_key).display()
            );
        }
    }
    println!("  Password authentication will be used until the key is installed.");
}
