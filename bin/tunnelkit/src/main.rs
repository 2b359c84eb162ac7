//! tunnelkit -- command-line front end for the tunnel configuration compiler.
//!
//! Loads JSON tunnel descriptions, resolves peer endpoints, and prints or
//! applies the resulting UAPI payload and network settings.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;

use cli::{Cli, Commands};
use tunnelkit_observability::{init_logging, FileLoggingConfig, LogFormat, LoggingConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Pretty on a terminal, JSON when stderr is piped
    let format = cli.log_format.unwrap_or_else(|| {
        if std::io::stderr().is_terminal() {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    });

    let log_config = LoggingConfig {
        level: cli.effective_log_level(),
        format,
        file: cli.log_dir.clone().map(FileLoggingConfig::new),
        ..Default::default()
    };

    // Hold the guard for the application lifetime
    let _guard = match init_logging(&log_config).context("Failed to initialize logging") {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
    {
        Ok(rt) => match rt.block_on(run(cli)) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Uapi {
            config,
            endpoints_only,
        } => commands::compile::uapi(config, *endpoints_only).await,
        Commands::Settings { config } => commands::compile::settings(config).await,
        Commands::Apply { config, socket } => commands::compile::apply(config, socket).await,
        Commands::Freshness {
            runtime,
            max_age_secs,
        } => commands::freshness::freshness(runtime, *max_age_secs).await,
        Commands::Genkey => commands::keys::genkey(),
        Commands::Pubkey { private_key } => commands::keys::pubkey(private_key),
    }
}
