//! CLI argument parsing and dispatch

pub mod args;

use tracing_subscriber::EnvFilter;

use crate::commands;
use crate::status::ExitStatus;
use args::{Cli, Command, ConfigureCommand, ConsoleCommand};

/// Initialize logging for the invocation.
///
/// The credential-process subcommand is special: SDKs parse its stdout, so
/// logging goes to the debug log file when enabled and is suppressed
/// otherwise.
pub fn init_logging(cli: &Cli) {
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Command::CredentialProcess(args) = &cli.command {
        if commands::credential_process::debug_enabled(args) {
            if let Some(path) = commands::credential_process::log_file_path() {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Ok(file) = std::fs::File::create(&path) {
                    tracing_subscriber::fmt()
                        .with_env_filter(EnvFilter::new("debug"))
                        .with_writer(file)
                        .with_ansi(false)
                        .init();
                    return;
                }
            }
        }
        // No log output on the credential-process path otherwise
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Dispatch the parsed command, mapping errors to exit codes.
pub async fn run(cli: Cli) -> ExitStatus {
    let result = match &cli.command {
        Command::Login(args) => commands::login::run(args).await,
        Command::Logout(args) => commands::logout::run(args).await,
        Command::CredentialProcess(args) => commands::credential_process::run(args).await,
        Command::Configure { command } => match command {
            ConfigureCommand::Profile(args) => commands::configure::run(args).await,
            ConfigureCommand::PopulateProfiles(args) => {
                commands::populate_profiles::run(args).await
            }
        },
        Command::Console { command } => match command {
            ConsoleCommand::Launch(args) => commands::console::launch(args).await,
            ConsoleCommand::GetConfigToken(args) => commands::console::get_config_token(args).await,
            ConsoleCommand::LaunchFromConfig(args) => {
                commands::console::launch_from_config(args).await
            }
        },
        Command::Roles(args) => commands::roles::run(args).await,
        Command::Assignments(args) => commands::assignments::run(args).await,
        Command::Template(args) => commands::template::run(args).await,
    };

    match result {
        Ok(()) => ExitStatus::Success,
        Err(e) => {
            eprintln!("{}", e);
            tracing::debug!(error = ?e, "Command failed");
            e.exit_status()
        }
    }
}
