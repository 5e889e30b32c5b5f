// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, BufRead, IsTerminal};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use vitrine::config::{config_path, AuthConfig};
use vitrine::utils::format_duration_secs;
use vitrine::{
    AdminAuth, ConfigError, LoginFailure, SessionStatus, SessionWatch, WatchEvent,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Success - operation completed successfully
    pub const SUCCESS: i32 = 0;
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - invalid input data format
    pub const DATA_ERR: i32 = 65;
    /// Temporary failure - locked out, try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Permission denied - bad credentials or no session
    pub const NO_PERM: i32 = 77;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// vitrine - admin sign-in for the landing-page back office.
#[derive(Parser)]
#[command(name = "vitrine")]
#[command(version = VERSION)]
#[command(about = "Admin sign-in, session status and session watch for the vitrine back office.")]
#[command(long_about = "vitrine - admin authentication\n\n\
    Sign in:             vitrine login\n\
    Check session:       vitrine status (or: vitrine s)\n\
    Keep session alive:  vitrine watch\n\
    Sign out:            vitrine logout\n\
    Configure:           vitrine config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: only warnings and errors in the log output
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: detailed output for debugging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as the operator
    ///
    /// Examples:
    ///   vitrine login
    ///   vitrine login --user admin
    ///   printf '%s\n' "$SECRET" | vitrine login --user admin --password-stdin
    Login {
        /// Operator identifier (prompted when omitted)
        #[arg(short, long)]
        user: Option<String>,
        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Show session and lockout state
    #[command(alias = "s")]
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign out and clear the session
    Logout,

    /// Keep checking the session until it ends or Ctrl+C
    ///
    /// Renews the session when it nears expiry.
    Watch {
        /// Seconds between checks (defaults to check_interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (secret masked)
    Show,
    /// Print the config file path
    Path,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "[✗]".red(), e);
            if e.downcast_ref::<ConfigError>().is_some() {
                eprintln!(
                    "    Edit {} or set VITRINE_ADMIN_SECRET / VITRINE_ADMIN_SALT.",
                    config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| "~/.vitrine/config.json".to_string())
                );
                CONFIG
            } else {
                ERROR
            }
        }
    };

    std::process::exit(code);
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Login { user, password_stdin } => {
            let config = AuthConfig::load()?;
            login(&config, user, password_stdin)
        }
        Commands::Status { json } => {
            let config = AuthConfig::load()?;
            show_status(&config, json)
        }
        Commands::Logout => {
            let config = AuthConfig::load()?;
            let auth = AdminAuth::from_config(&config)?;
            auth.logout().context("Failed to clear the session")?;
            println!("{} Signed out", "[✓]".green());
            Ok(SUCCESS)
        }
        Commands::Watch { interval } => {
            let config = AuthConfig::load()?;
            let period = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.check_interval());
            if period.is_zero() {
                bail!(ConfigError::new("interval", "must be greater than 0"));
            }
            let auth = Arc::new(AdminAuth::from_config(&config)?);
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(watch(auth, period))
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => show_config(),
            ConfigCommands::Path => {
                println!("{}", config_path()?.display());
                Ok(SUCCESS)
            }
        },
    }
}

fn login(config: &AuthConfig, user: Option<String>, password_stdin: bool) -> Result<i32> {
    let user = match user {
        Some(user) => user,
        None => inquire::Text::new("Username:")
            .prompt()
            .context("Failed to read username")?,
    };
    // usernames are compared exactly; only surrounding whitespace is dropped
    let user = user.trim().to_string();

    let secret = if password_stdin {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else if io::stdin().is_terminal() {
        inquire::Password::new("Password:")
            .without_confirmation()
            .prompt()
            .context("Failed to read password")?
    } else {
        eprintln!(
            "{} stdin is not a terminal; pass --password-stdin to read the password from it",
            "[!]".yellow()
        );
        return Ok(DATA_ERR);
    };

    let auth = AdminAuth::from_config(config)?;
    let outcome = auth.login(&user, &secret);

    if outcome.ok {
        println!(
            "{} Signed in. Session valid for {}",
            "[✓]".green(),
            format_duration_secs(config.session_duration_secs)
        );
        return Ok(SUCCESS);
    }

    let message = outcome.message().unwrap_or_default();
    match outcome.kind {
        Some(LoginFailure::Invalid) => {
            eprintln!("{} {}", "[✗]".red(), message);
            Ok(NO_PERM)
        }
        Some(LoginFailure::Locked) => {
            eprintln!("{} {}", "[!]".yellow(), message);
            Ok(TEMP_FAIL)
        }
        Some(LoginFailure::Unavailable) | None => {
            eprintln!("{} {}", "[✗]".red(), message);
            Ok(ERROR)
        }
    }
}

fn show_status(config: &AuthConfig, json: bool) -> Result<i32> {
    let auth = AdminAuth::from_config(config)?;
    let status = auth.status().context("Failed to read auth state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(SUCCESS);
    }

    println!();
    println!("{}", "=== vitrine admin session ===".bold());
    println!();

    match status.session {
        SessionStatus::Valid => {
            let remaining = status.session_remaining_secs.unwrap_or(0).max(0) as u64;
            println!("  Session:   {}", "active".green());
            println!("  Remaining: {}", format_duration_secs(remaining));
        }
        SessionStatus::Expired => println!("  Session:   {}", "expired".yellow()),
        SessionStatus::Missing => println!("  Session:   {}", "signed out".dimmed()),
    }
    if let Some(expires_at) = status.session_expires_at {
        println!("  Expires:   {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    println!(
        "  Failed sign-ins: {} of {}",
        status.failure_count, config.max_login_attempts
    );
    if let Some(secs) = status.locked_for_secs {
        println!(
            "  {} Sign-in blocked for {}",
            "[!]".yellow(),
            format_duration_secs(secs)
        );
    }
    println!();

    Ok(SUCCESS)
}

async fn watch(auth: Arc<AdminAuth>, period: Duration) -> Result<i32> {
    let (handle, mut events) = SessionWatch::spawn(auth, period);
    println!(
        "{} Watching session every {} (Ctrl+C to stop)",
        "[i]".cyan(),
        format_duration_secs(period.as_secs().max(1))
    );

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{} Stopped watching; session left as is", "[i]".cyan());
                break SUCCESS;
            }
            event = events.recv() => match event {
                Some(WatchEvent::Renewed { expires_at }) => {
                    println!(
                        "{} Session renewed until {}",
                        "[✓]".green(),
                        expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                Some(WatchEvent::LoggedOut { reason }) => {
                    eprintln!("{} {}. Please sign in again.", "[!]".yellow(), reason);
                    break NO_PERM;
                }
                None => break ERROR,
            }
        }
    };

    handle.cancel().await;
    Ok(code)
}

fn show_config() -> Result<i32> {
    let path = config_path()?;
    let mut config = AuthConfig::load_from(&path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());

    println!("{}", config.to_masked_json()?);
    match config.validate() {
        Ok(()) => Ok(SUCCESS),
        Err(e) => {
            eprintln!("{} {}", "[!]".yellow(), e);
            Ok(CONFIG)
        }
    }
}
