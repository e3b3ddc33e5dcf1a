//! Protocol Error Types

use thiserror::Error;

use crate::constants::MessageTag;

/// Protocol errors
///
/// Every variant ends the connection. None of them is reported to the peer.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Peer closed the stream before a new record started
    #[error("End of stream")]
    EndOfStream,

    /// Stream ended inside a record
    #[error("Incomplete record: needed {needed} bytes, got {got}")]
    IncompleteRecord { needed: usize, got: usize },

    /// Value does not fit a single record
    #[error("Encoding error: value of {len} bytes exceeds {max}")]
    Encoding { len: usize, max: usize },

    /// Record tag does not match the current handshake step
    #[error("Unexpected tag 0x{got:02x} (expected {expected})")]
    UnexpectedTag { expected: MessageTag, got: u8 },

    /// Record value has the wrong shape for its tag
    #[error("Malformed {tag} value: {reason}")]
    MalformedValue { tag: MessageTag, reason: String },

    /// Identity store has no entry for the client
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Decrypted key material is not a point on the curve
    #[error("Invalid point")]
    InvalidPoint,

    /// Verifier rejected the authentication value
    #[error("Authentication verification failed")]
    AuthVerificationFailed,

    /// Read or overall deadline expired
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Aborted by server shutdown
    #[error("Handshake cancelled")]
    Cancelled,

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Crypto error from gemkey-crypto
    #[error("Crypto error: {0}")]
    Crypto(gemkey_crypto::CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Peer hung up cleanly between records
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ProtocolError::EndOfStream)
    }

    /// Short label for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::EndOfStream => "end_of_stream",
            ProtocolError::IncompleteRecord { .. } => "incomplete_record",
            ProtocolError::Encoding { .. } => "encoding",
            ProtocolError::UnexpectedTag { .. } => "unexpected_tag",
            ProtocolError::MalformedValue { .. } => "malformed_value",
            ProtocolError::UnknownClient(_) => "unknown_client",
            ProtocolError::InvalidPoint => "invalid_point",
            ProtocolError::AuthVerificationFailed => "auth_failed",
            ProtocolError::HandshakeTimeout => "timeout",
            ProtocolError::Cancelled => "cancelled",
            ProtocolError::InvalidState(_) => "invalid_state",
            ProtocolError::Crypto(_) => "crypto",
            ProtocolError::Io(_) => "io",
        }
    }
}

impl From<gemkey_crypto::CryptoError> for ProtocolError {
    fn from(e: gemkey_crypto::CryptoError) -> Self {
        match e {
            gemkey_crypto::CryptoError::InvalidPoint => ProtocolError::InvalidPoint,
            other => ProtocolError::Crypto(other),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
