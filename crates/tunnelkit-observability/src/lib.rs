//! TunnelKit Observability - structured logging
//!
//! Console logging in pretty, JSON or compact form, with an optional
//! rolling JSON log file.
//!
//! # Quick Start
//!
//! ```no_run
//! use tunnelkit_observability::{init_logging, LoggingConfig};
//!
//! let _guard = init_logging(&LoggingConfig::default()).expect("Failed to init logging");
//! tracing::info!("Application started");
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::{ObservabilityError, Result};
pub use logging::{init_logging, LogGuard};
