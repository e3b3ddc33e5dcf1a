//! Server Errors
//!
//! Error types for the GemKey responder.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Server is already running
    #[error("Server is already running")]
    AlreadyRunning,

    /// Failed to bind to address
    #[error("Failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake error on a single connection
    #[error("Protocol error: {0}")]
    Protocol(#[from] gemkey_protocol::ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
