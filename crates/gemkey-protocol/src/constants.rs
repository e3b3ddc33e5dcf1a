//! Protocol Constants
//!
//! Message tags, value sizes, and protocol parameters.

use gemkey_crypto::{IV_SIZE, POINT_SIZE};

/// TLV header size in bytes (tag + length)
pub const TLV_HEADER_SIZE: usize = 2;

/// Largest value a single TLV record can carry
pub const MAX_VALUE_LEN: usize = u8::MAX as usize;

/// Value size of the blinded ephemeral-key messages (iv || point)
pub const EPHEMERAL_VALUE_LEN: usize = IV_SIZE + POINT_SIZE;

/// Largest plaintext that fits a session-key message (iv || ciphertext)
pub const MAX_SEALED_PAYLOAD: usize = MAX_VALUE_LEN - IV_SIZE;

/// Overall handshake deadline in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Per-read timeout in milliseconds
pub const READ_TIMEOUT_MS: u64 = 10_000;

/// Default payload returned in the GEM message
pub const DEFAULT_GEM: &[u8] =
    b"639363031663434646362663763386666663236653361336332663639366131363331";

/// Message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    /// Client identifier
    Idc = 0x01,
    /// Client ephemeral public key, blinded under w
    EwAg = 0x02,
    /// Server ephemeral public key, blinded under w
    EwBg = 0x03,
    /// Client authentication value under K
    Auth = 0x04,
    /// Client request under K
    Req = 0x05,
    /// Server response under K
    Gem = 0x06,
}

impl MessageTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageTag::Idc),
            0x02 => Some(MessageTag::EwAg),
            0x03 => Some(MessageTag::EwBg),
            0x04 => Some(MessageTag::Auth),
            0x05 => Some(MessageTag::Req),
            0x06 => Some(MessageTag::Gem),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Wire name of the tag
    pub fn name(self) -> &'static str {
        match self {
            MessageTag::Idc => "IDC",
            MessageTag::EwAg => "EW_AG",
            MessageTag::EwBg => "EW_BG",
            MessageTag::Auth => "AUTH",
            MessageTag::Req => "REQ",
            MessageTag::Gem => "GEM",
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_values() {
        assert_eq!(MessageTag::Idc.to_u8(), 1);
        assert_eq!(MessageTag::Gem.to_u8(), 6);
        assert_eq!(MessageTag::from_u8(0), None);
        assert_eq!(MessageTag::from_u8(7), None);
    }

    #[test]
    fn test_tag_roundtrip() {
        for tag in [
            MessageTag::Idc,
            MessageTag::EwAg,
            MessageTag::EwBg,
            MessageTag::Auth,
            MessageTag::Req,
            MessageTag::Gem,
        ] {
            assert_eq!(MessageTag::from_u8(tag.to_u8()), Some(tag));
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(EPHEMERAL_VALUE_LEN, 80);
        assert_eq!(MAX_SEALED_PAYLOAD, 239);
        assert!(DEFAULT_GEM.len() <= MAX_SEALED_PAYLOAD);
    }
}
