mod config;
mod keys;
mod ops;
mod prompt;
mod remote;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use ops::{OpError, Session, DEFAULT_SPEED_TEST_MB};
use prompt::StdinPrompter;
use remote::ProcessInvoker;

#[derive(Parser, Debug)]
#[command(name = "ssh-push")]
#[command(version)]
#[command(about = "SSH File Push Tool - push files to a remote device", long_about = None)]
#[command(after_help = "Examples:
  ssh-push -s                  Setup SSH configuration
  ssh-push -e                  Edit existing configuration
  ssh-push blinky.v            Push single file
  ssh-push file1.v file2.v     Push multiple files
  ssh-push --all               Push all non-hidden files
  ssh-push -l                  List remote files
  ssh-push -t                  Test SSH connection
  ssh-push -S --size 50        Measure transfer speed with a 50 MB file
  ssh-push -c                  Show configuration
  ssh-push -v blinky.v         Push with verbose output")]
#[command(group(
    ArgGroup::new("action")
        .args(["setup", "edit", "config", "test", "list", "speed_test", "all"])
        .multiple(false)
))]
struct Args {
    /// Files to push to the remote host
    #[arg(value_name = "FILE", conflicts_with = "action")]
    files: Vec<PathBuf>,

    /// Setup SSH configuration
    #[arg(short, long)]
    setup: bool,

    /// Edit existing SSH configuration
    #[arg(short, long)]
    edit: bool,

    /// Show current configuration
    #[arg(short, long)]
    config: bool,

    /// Test SSH connection
    #[arg(short, long)]
    test: bool,

    /// List files in remote working directory
    #[arg(short, long)]
    list: bool,

    /// Measure transfer speed to the remote host
    #[arg(short = 'S', long, visible_alias = "speed")]
    speed_test: bool,

    /// Size of the speed test file in MB
    #[arg(long, value_name = "MB", default_value_t = DEFAULT_SPEED_TEST_MB,
          value_parser = clap::value_parser!(u64).range(1..=10_240), requires = "speed_test")]
    size: u64,

    /// Push all non-hidden files in current directory
    #[arg(short, long)]
    all: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Build the log filter; `RUST_LOG` takes precedence over `--verbose`.
fn create_env_filter(verbose: bool) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("ssh_push=debug")
    } else {
        EnvFilter::new("ssh_push=warn")
    }
}

fn init_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: Args) -> Result<Result<(), OpError>> {
    let workdir = std::env::current_dir().context("Could not determine the current directory")?;
    let session = Session::new(workdir, ProcessInvoker::new()).with_verbose(args.verbose);

    let result = if args.setup {
        session.setup(&mut StdinPrompter::new())
    } else if args.edit {
        session.edit(&mut StdinPrompter::new())
    } else if args.config {
        session.show()
    } else if args.test {
        session.test()
    } else if args.list {
        session.list()
    } else if args.speed_test {
        session.speed_test(args.size).map(|_| ())
    } else if args.all {
        session.push_all()
    } else if !args.files.is_empty() {
        session.push(&args.files)
    } else {
        Args::command().print_help().context("Failed to print help")?;
        println!();
        Ok(())
    };

    Ok(result)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            eprintln!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_files() {
        let args = Args::try_parse_from(["ssh-push", "-v", "a.v", "b.v"]).unwrap();
        assert_eq!(args.files, vec![PathBuf::from("a.v"), PathBuf::from("b.v")]);
        assert!(args.verbose);
    }

    #[test]
    fn test_actions_are_exclusive() {
        assert!(Args::try_parse_from(["ssh-push", "--setup", "--test"]).is_err());
        assert!(Args::try_parse_from(["ssh-push", "--list", "a.v"]).is_err());
        assert!(Args::try_parse_from(["ssh-push", "-a", "-c"]).is_err());
    }

    #[test]
    fn test_speed_test_flags() {
        let args = Args::try_parse_from(["ssh-push", "--speed"]).unwrap();
        assert!(args.speed_test);
        assert_eq!(args.size, DEFAULT_SPEED_TEST_MB);

        let args = Args::try_parse_from(["ssh-push", "-S", "--size", "1"]).unwrap();
        assert_eq!(args.size, 1);

        assert!(Args::try_parse_from(["ssh-push", "--size", "5"]).is_err());
        assert!(Args::try_parse_from(["ssh-push", "-S", "--size", "0"]).is_err());
    }

    #[test]
    fn test_usage_errors_do_not_share_operation_codes() {
        let err = Args::try_parse_from(["ssh-push", "--bogus"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_ne!(i32::from(OpError::ConfigMissing.exit_code()), err.exit_code());
    }

    #[test]
    fn test_no_arguments_is_valid() {
        let args = Args::try_parse_from(["ssh-push"]).unwrap();
        assert!(args.files.is_empty());
        assert!(!args.setup && !args.all);
    }

    #[test]
    fn test_create_env_filter() {
        // RUST_LOG overrides the flag, so only check the flag-driven levels
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(create_env_filter(false).to_string(), "ssh_push=warn");
        assert_eq!(create_env_filter(true).to_string(), "ssh_push=debug");
    }
}
