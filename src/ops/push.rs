//! Pushing files to the remote working directory.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::remote::{command, CaptureMode, RemoteInvoker};

use super::{OpError, Session};

/// Non-hidden regular files directly inside `dir`, sorted by name.
///
/// Subdirectories are not descended into. Symlinks count when they point
/// at a regular file.
pub fn enumerate_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

impl<I: RemoteInvoker> Session<I> {
    /// Copy `files` into the remote working directory with one transfer.
    pub fn push(&self, files: &[PathBuf]) -> Result<(), OpError> {
        let config = self.require_config()?;

        let sources: Vec<PathBuf> = files
            .iter()
            .filter_map(|file| {
                let path = self.workdir.join(file);
                if path.is_file() {
                    Some(path)
                } else if path.exists() {
                    warn!("Not a regular file, skipping: {}", file.display());
                    None
                } else {
                    warn!("File not found: {}", file.display());
                    None
                }
            })
            .collect();

        if sources.is_empty() {
            return Err(OpError::NoFiles);
        }

        let mkdir = command::mkdir_remote_dir(&config);
        self.run_remote(
            "creating remote directory",
            &mkdir,
            self.timeouts.housekeeping,
            CaptureMode::Capture,
        )?;

        let destination = command::remote_dir_target(&config);
        let scp = command::scp(&config, &sources, &destination, self.verbose);
        if self.verbose {
            info!("Executing: {}", scp);
        }

        let capture = if self.verbose {
            CaptureMode::Inherit
        } else {
            CaptureMode::Capture
        };
        self.run_remote("file transfer", &scp, self.timeouts.push, capture)?;

        for source in &sources {
            let name = source.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            println!("✓ Pushed: {}", name);
        }
        println!(
            "Push complete: {}/{} files transferred to {}:{}",
            sources.len(),
            files.len(),
            config.hostname,
            destination
        );
        Ok(())
    }

    /// Push every non-hidden file in the project directory.
    pub fn push_all(&self) -> Result<(), OpError> {
        self.require_config()?;

        let files = enumerate_files(&self.workdir);
        if files.is_empty() {
            println!("No files found in {} (hidden files are skipped).", self.workdir.display());
            return Err(OpError::NoFiles);
        }

        println!("Found {} non-hidden files to push.", files.len());
        self.push(&files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, Configuration};
    use crate::ops::tests::configured_dir;
    use crate::remote::{Outcome, Program, StubInvoker};
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn names(paths: &[PathBuf]) -> BTreeSet<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_enumerate_skips_hidden_and_subdirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join(".hidden"), "h").unwrap();
        fs::write(dir.path().join("b.v"), "b").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("nested.v"), "n").unwrap();

        let files = enumerate_files(dir.path());

        let expected: BTreeSet<String> = ["a.txt", "b.v"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names(&files), expected);
    }

    #[test]
    fn test_enumerate_is_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["z.v", "m.v", "a.v"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let files = enumerate_files(dir.path());
        let ordered: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(ordered, vec!["a.v", "m.v", "z.v"]);
    }

    #[test]
    fn test_push_single_transfer_for_all_files() {
        let (dir, _) = configured_dir();
        fs::write(dir.path().join("top.v"), "module top;").unwrap();
        fs::write(dir.path().join("pins.pcf"), "set_io").unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        session
            .push(&[PathBuf::from("top.v"), PathBuf::from("pins.pcf")])
            .unwrap();

        let commands = invoker.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].program, Program::Ssh);
        assert_eq!(commands[0].args.last().map(String::as_str), Some("mkdir -p ~/fpga_work"));

        let scp = &commands[1];
        assert_eq!(scp.program, Program::Scp);
        assert_eq!(scp.flag_value("-P"), Some("2222"));
        assert_eq!(scp.args.last().map(String::as_str), Some("pi@192.168.1.100:~/fpga_work/"));
        assert!(scp.args.iter().any(|a| a.ends_with("top.v")));
        assert!(scp.args.iter().any(|a| a.ends_with("pins.pcf")));
    }

    #[test]
    fn test_push_skips_missing_files() {
        let (dir, _) = configured_dir();
        fs::write(dir.path().join("top.v"), "module top;").unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        session
            .push(&[PathBuf::from("top.v"), PathBuf::from("missing.v")])
            .unwrap();

        let commands = invoker.commands();
        let scp = &commands[1];
        assert!(!scp.args.iter().any(|a| a.ends_with("missing.v")));
    }

    #[test]
    fn test_push_nothing_existing_is_no_files() {
        let (dir, _) = configured_dir();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        assert!(matches!(session.push(&[PathBuf::from("ghost.v")]), Err(OpError::NoFiles)));
        assert!(matches!(session.push(&[]), Err(OpError::NoFiles)));
        assert!(invoker.commands().is_empty());
    }

    #[test]
    fn test_push_verbose_inherits_stdio() {
        let (dir, _) = configured_dir();
        fs::write(dir.path().join("top.v"), "module top;").unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker).with_verbose(true);

        session.push(&[PathBuf::from("top.v")]).unwrap();

        let calls = invoker.calls();
        let (scp, timeout, capture) = &calls[1];
        assert!(scp.args.contains(&"-v".to_string()));
        assert_eq!(*capture, CaptureMode::Inherit);
        assert_eq!(timeout.as_secs(), 60);
    }

    #[test]
    fn test_push_transfer_failure() {
        let (dir, _) = configured_dir();
        fs::write(dir.path().join("top.v"), "module top;").unwrap();
        let session = Session::new(
            dir.path(),
            StubInvoker::new(|cmd| match cmd.program {
                Program::Scp => Ok(Outcome::failed("scp: ~/fpga_work/: Permission denied")),
                _ => Ok(Outcome::ok("")),
            }),
        );

        let err = session.push(&[PathBuf::from("top.v")]).unwrap_err();
        assert!(matches!(err, OpError::ConnectionFailed { action: "file transfer", .. }));
    }

    #[test]
    fn test_push_all_empty_dir_does_not_transfer() {
        let dir = TempDir::new().unwrap();
        ConfigStore::in_dir(dir.path())
            .save(&Configuration::new("host"))
            .unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        // Only the hidden config file is present.
        assert!(matches!(session.push_all(), Err(OpError::NoFiles)));
        assert!(invoker.commands().is_empty());
    }

    #[test]
    fn test_push_all_sends_visible_files() {
        let (dir, _) = configured_dir();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.v"), "b").unwrap();
        fs::write(dir.path().join(".secret"), "s").unwrap();
        let invoker = StubInvoker::always(Outcome::ok(""));
        let session = Session::new(dir.path(), &invoker);

        session.push_all().unwrap();

        let commands = invoker.commands();
        let scp = &commands[1];
        let sources = &scp.args[scp.args.len() - 3..scp.args.len() - 1];
        assert!(sources[0].ends_with("a.txt"));
        assert!(sources[1].ends_with("b.v"));
        assert!(!scp.args.iter().any(|a| a.ends_with(".secret")));
    }
}
