//! Error types for gemkey-crypto

use thiserror::Error;

/// Errors that can occur in gemkey-crypto operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid symmetric key length
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// Invalid IV length
    #[error("Invalid IV length: expected {expected}, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    /// Encoded point has the wrong size
    #[error("Invalid point length: expected {expected}, got {got}")]
    InvalidPointLength { expected: usize, got: usize },

    /// Coordinates do not describe a point on the curve
    #[error("Invalid point: coordinates are not on the curve")]
    InvalidPoint,

    /// Private scalar is zero or not below the group order
    #[error("Invalid private scalar")]
    InvalidScalar,

    /// Shared secret too short to derive a key from
    #[error("Shared secret too short: need {need} bytes, got {got}")]
    SecretTooShort { need: usize, got: usize },

    /// Hex decoding failed
    #[error("Hex decoding failed: {0}")]
    Hex(String),

    /// Random number generation failed
    #[error("Random number generation failed")]
    RngError,
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::Hex(e.to_string())
    }
}

/// Result type for gemkey-crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
