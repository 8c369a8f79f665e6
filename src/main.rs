use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use alertwire::app::{build_worker, run_once, run_service};
use alertwire::dispatch::DispatchError;
use alertwire::error::AppError;
use alertwire::logging::{init_logging, LoggingConfig};
use alertwire::settings::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "alertwire")]
#[command(version)]
#[command(about = "Delivers Elasticsearch alerts to Telegram exactly once")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a TOML configuration file
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read alerts but do not send messages or write the ledger
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Run the scheduler (and HTTP server, if enabled) until interrupted (default)
    Run,
    /// Run a single dispatch pass and print its report as JSON
    Once,
    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}

/// Process exit codes
mod exit_codes {
    use std::process::ExitCode;

    /// A dispatch pass failed
    pub fn failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// Configuration could not be loaded or is invalid (EX_CONFIG)
    pub fn config_error() -> ExitCode {
        ExitCode::from(78)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(exit_codes::config_error());
        }
    };
    if let Err(e) = config.validate(!cli.dry_run) {
        eprintln!("Error: {}", e);
        return Ok(exit_codes::config_error());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config.redacted())?);
            eprintln!("Configuration is valid.");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Once => {
            let worker = Arc::new(build_worker(&config, cli.dry_run)?);
            match run_once(worker).await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(DispatchError::Cancelled(report)) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    eprintln!("Error: dispatch pass was cancelled");
                    Ok(exit_codes::failed())
                }
                Err(e) => {
                    let e = AppError::from(e);
                    tracing::error!(code = %e.kind(), error = %e, "dispatch pass failed");
                    eprintln!("Error: {}", e.message());
                    Ok(exit_codes::failed())
                }
            }
        }
        Commands::Run => {
            let worker = Arc::new(build_worker(&config, cli.dry_run)?);
            let summary = run_service(worker, &config).await?;
            tracing::info!(
                ticks = summary.ticks,
                completed = summary.completed,
                failed = summary.failed,
                "alertwire stopped"
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
