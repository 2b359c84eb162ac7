//! Error types for tunnel configuration operations

use thiserror::Error;

/// Errors that can occur while building, validating, or applying a tunnel configuration
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Invalid address range (CIDR) notation
    #[error("Invalid address range: {0}")]
    InvalidAddressRange(String),

    /// Invalid endpoint notation
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Configuration is well-formed but semantically invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;
