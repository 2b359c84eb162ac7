use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunnelkit_observability::{LogFormat, LogLevel};

/// Default recency window for `freshness`
pub(crate) const DEFAULT_MAX_HANDSHAKE_AGE_SECS: u64 = 180;

/// WireGuard / AmneziaWG tunnel configuration compiler
#[derive(Parser)]
#[command(name = "tunnelkit")]
#[command(version, about = "Compile tunnel descriptions into UAPI payloads and network settings")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Log level; overrides -v
    #[arg(long, global = true, env = "TUNNELKIT_LOG_LEVEL")]
    pub(crate) log_level: Option<LogLevel>,

    /// Console log format: pretty, json or compact
    #[arg(long, global = true, env = "TUNNELKIT_LOG_FORMAT")]
    pub(crate) log_format: Option<LogFormat>,

    /// Also write JSON logs, rotated daily, into this directory
    #[arg(long, global = true, env = "TUNNELKIT_LOG_DIR")]
    pub(crate) log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

impl Cli {
    /// Level from `--log-level`, else from the `-v` count. Quiet by default so
    /// stdout carries only command output.
    pub(crate) fn effective_log_level(&self) -> LogLevel {
        self.log_level.unwrap_or(match self.verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        })
    }
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Resolve endpoints and print the UAPI `set` payload
    Uapi {
        /// Tunnel description (JSON)
        config: PathBuf,

        /// Only emit public_key/endpoint pairs
        #[arg(long)]
        endpoints_only: bool,
    },

    /// Resolve endpoints and print the derived network settings as JSON
    Settings {
        /// Tunnel description (JSON)
        config: PathBuf,
    },

    /// Evaluate handshake freshness from a UAPI `get` dump
    Freshness {
        /// File holding the `get` response, or `-` for stdin
        runtime: PathBuf,

        /// Handshakes older than this are reported as stale in the peer listing
        #[arg(long, default_value_t = DEFAULT_MAX_HANDSHAKE_AGE_SECS)]
        max_age_secs: u64,
    },

    /// Generate a private key (base64)
    Genkey,

    /// Derive the public key for a base64 private key
    Pubkey {
        private_key: String,
    },

    /// Resolve, compile and push the configuration to a running backend
    Apply {
        /// Tunnel description (JSON)
        config: PathBuf,

        /// Backend UAPI socket
        #[arg(long)]
        socket: PathBuf,
    },
}
