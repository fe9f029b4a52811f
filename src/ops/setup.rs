//! Creating, editing and showing the configuration.

use std::io::{self, Write};

use tracing::warn;

use crate::config::{AuthMethod, ConfigState, Configuration, DEFAULT_KEY_PATH, DEFAULT_PORT, DEFAULT_REMOTE_DIR};
use crate::keys::{KeyProvisioner, KeyState};
use crate::prompt::Prompter;
use crate::remote::RemoteInvoker;

use super::{OpError, Session};

/// What to do when setup finds a configuration already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistingChoice {
    Edit,
    Overwrite,
    Cancel,
}

fn parse_existing_choice(input: &str) -> Option<ExistingChoice> {
    match input {
        "1" => Some(ExistingChoice::Edit),
        "2" => Some(ExistingChoice::Overwrite),
        "3" => Some(ExistingChoice::Cancel),
        _ => None,
    }
}

/// Parse a port answer, keeping `fallback` for empty or non-numeric input.
fn parse_port(input: &str, fallback: u16) -> u16 {
    match input.parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => fallback,
    }
}

fn parse_auth_choice(input: &str) -> Option<AuthMethod> {
    match input {
        "1" => Some(AuthMethod::Key),
        "2" => Some(AuthMethod::Password),
        _ => None,
    }
}

/// Question text: new values show their default, edits their current value.
fn question(label: &str, value: &str, editing: bool) -> String {
    if editing {
        format!("{} [{}]: ", label, value)
    } else {
        format!("{} (default: {}): ", label, value)
    }
}

/// Ask for every field. With `current`, an empty answer keeps its value.
fn prompt_config<P: Prompter>(prompter: &mut P, current: Option<&Configuration>) -> io::Result<Configuration> {
    let editing = current.is_some();

    let hostname = loop {
        let answer = match current {
            Some(c) => prompter.ask(&format!("Remote hostname/IP [{}]: ", c.hostname))?,
            None => prompter.ask("Remote hostname/IP (e.g., pi@192.168.1.100): ")?,
        };
        if !answer.is_empty() {
            break answer;
        }
        if let Some(c) = current {
            break c.hostname.clone();
        }
        println!("Hostname cannot be empty.");
    };

    let current_port = current.map_or(DEFAULT_PORT, |c| c.port);
    let answer = prompter.ask(&question("SSH port", &current_port.to_string(), editing))?;
    let port = parse_port(&answer, current_port);
    if !answer.is_empty() && port.to_string() != answer {
        println!("Invalid port '{}', using {}.", answer, port);
    }

    let current_dir = current.map_or(DEFAULT_REMOTE_DIR, |c| c.remote_dir.as_str());
    let answer = prompter.ask(&question("Remote working directory", current_dir, editing))?;
    let remote_dir = if answer.is_empty() {
        current_dir.to_string()
    } else {
        answer
    };

    println!("\nAuthentication method:");
    println!("1. SSH key (recommended)");
    println!("2. Password");
    let current_auth = current.map(|c| c.auth_method);
    let auth_method = loop {
        let answer = match current_auth {
            Some(auth) => prompter.ask(&format!("Choose authentication method (1 or 2) [{}]: ", auth))?,
            None => prompter.ask("Choose authentication method (1 or 2): ")?,
        };
        if let Some(auth) = parse_auth_choice(&answer) {
            break auth;
        }
        if let (true, Some(auth)) = (answer.is_empty(), current_auth) {
            break auth;
        }
        println!("Please enter 1 or 2.");
    };

    let key_path = match auth_method {
        AuthMethod::Key => {
            let current_key = current
                .and_then(|c| c.key_path.as_deref())
                .unwrap_or(DEFAULT_KEY_PATH);
            let answer = prompter.ask(&question("SSH key path", current_key, editing))?;
            Some(if answer.is_empty() { current_key.to_string() } else { answer })
        }
        AuthMethod::Password => None,
    };

    Ok(Configuration {
        hostname,
        port,
        remote_dir,
        auth_method,
        key_path,
    }
    .normalized())
}

fn write_config<W: Write>(out: &mut W, config: &Configuration) -> io::Result<()> {
    for (key, value) in config.fields() {
        writeln!(out, "  {}: {}", key, value)?;
    }
    Ok(())
}

fn print_config(config: &Configuration) {
    if let Err(e) = write_config(&mut io::stdout().lock(), config) {
        warn!("Failed to print configuration: {}", e);
    }
}

impl<I: RemoteInvoker> Session<I> {
    /// Interactively create a configuration and save it.
    pub fn setup<P: Prompter>(&self, prompter: &mut P) -> Result<(), OpError> {
        match self.store.inspect() {
            ConfigState::Loaded(existing) => {
                println!("SSH configuration already exists!");
                println!("Current configuration:");
                print_config(&existing);
                println!("\nOptions:");
                println!("1. Edit existing configuration");
                println!("2. Create new configuration (overwrite)");
                println!("3. Cancel");

                let choice = loop {
                    let answer = prompter.ask("Choose option (1-3): ").map_err(OpError::Input)?;
                    match parse_existing_choice(&answer) {
                        Some(choice) => break choice,
                        None => println!("Please enter 1, 2, or 3."),
                    }
                };

                match choice {
                    ExistingChoice::Edit => return self.edit_config(&existing, prompter),
                    ExistingChoice::Overwrite => println!("\nCreating new configuration..."),
                    ExistingChoice::Cancel => {
                        println!("Setup cancelled.");
                        return Ok(());
                    }
                }
            }
            ConfigState::Corrupt(e) => {
                println!("Existing configuration could not be read ({}); it will be replaced.", e);
            }
            ConfigState::Missing => {}
        }

        println!("SSH Configuration Setup");
        println!("{}", "=".repeat(25));
        let config = prompt_config(prompter, None).map_err(OpError::Input)?;
        self.finish(config, prompter)
    }

    /// Show the current configuration and let the user change it.
    pub fn edit<P: Prompter>(&self, prompter: &mut P) -> Result<(), OpError> {
        let existing = self.require_config()?;

        println!("Current configuration:");
        print_config(&existing);
        println!();

        let proceed = prompter
            .confirm("Edit this configuration?", true)
            .map_err(OpError::Input)?;
        if !proceed {
            println!("Edit cancelled.");
            return Ok(());
        }

        self.edit_config(&existing, prompter)
    }

    fn edit_config<P: Prompter>(&self, existing: &Configuration, prompter: &mut P) -> Result<(), OpError> {
        println!("Edit SSH Configuration");
        println!("{}", "=".repeat(25));
        println!("Current values shown in [brackets]. Press Enter to keep current value.");

        let config = prompt_config(prompter, Some(existing)).map_err(OpError::Input)?;
        self.finish(config, prompter)
    }

    /// Optional key provisioning, then save, then a non-fatal connection check.
    fn finish<P: Prompter>(&self, config: Configuration, prompter: &mut P) -> Result<(), OpError> {
        if let Some(private_key) = config.identity_file() {
            let wanted = prompter
                .confirm("\nSet up SSH key authentication now?", true)
                .unwrap_or_else(|e| {
                    warn!("Skipping key setup: {}", e);
                    false
                });

            if wanted {
                let state = KeyProvisioner::new(&config, private_key, &self.invoker, &mut *prompter, self.timeouts)
                    .provision();
                if let KeyState::Failed(failure) = state {
                    warn!("Key provisioning did not complete: {}", failure.reason);
                }
            }
        }

        self.store.save(&config)?;
        println!("✓ Configuration saved to {}", self.store.path().display());

        println!("\nTesting SSH connection...");
        match self.check_connection(&config) {
            Ok(()) => println!("✓ SSH connection successful!"),
            Err(e) => {
                println!("✗ {}", e);
                println!("The configuration was saved; fix the connection and run --test.");
            }
        }
        Ok(())
    }

    /// Print the configuration, or explain why there is none.
    pub fn show(&self) -> Result<(), OpError> {
        self.write_show(&mut io::stdout().lock())
            .map_err(|e| OpError::io("failed to print configuration", e))
    }

    fn write_show<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self.store.inspect() {
            ConfigState::Loaded(config) => {
                writeln!(out, "Current SSH Configuration:")?;
                writeln!(out, "{}", "=".repeat(30))?;
                write_config(out, &config)?;
            }
            ConfigState::Missing => {
                writeln!(out, "No SSH configuration found.")?;
                writeln!(out, "Run with --setup to create configuration.")?;
            }
            ConfigState::Corrupt(e) => {
                writeln!(out, "SSH configuration at {} could not be read:", self.store.path().display())?;
                writeln!(out, "  {}", e)?;
                writeln!(out, "Run with --setup to recreate it.")?;
            }
        }
        Ok(())
    }
}
