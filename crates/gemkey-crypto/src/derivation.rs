//! Blinding and Session Key Derivation
//!
//! Both keys are plain truncations to the first 16 bytes:
//!
//! ```text
//! w = x(long_term_public)[0..16]
//! K = x(ecdh(ephemeral_secret, peer_ephemeral_public))[0..16]
//! ```
//!
//! This is not a KDF. It is kept because peers on the wire compute exactly
//! this; a deployment free of that constraint should feed the shared secret
//! through HKDF with a transcript-bound info string instead.

use p256::PublicKey;

use crate::cipher::{SymmetricKey, KEY_SIZE};
use crate::errors::{CryptoError, CryptoResult};
use crate::key_agreement::{x_coordinate, DhSharedSecret, COORDINATE_SIZE};

/// Blinding key from a long-term public x-coordinate
pub fn derive_blinding_key(long_term_x: &[u8; COORDINATE_SIZE]) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&long_term_x[..KEY_SIZE]);
    SymmetricKey::from_bytes(key)
}

/// Blinding key for a known long-term public key
pub fn blinding_key_for(long_term_public: &PublicKey) -> SymmetricKey {
    derive_blinding_key(&x_coordinate(long_term_public))
}

/// Session key from raw shared-secret bytes
pub fn derive_session_key(shared_secret: &[u8]) -> CryptoResult<SymmetricKey> {
    if shared_secret.len() < KEY_SIZE {
        return Err(CryptoError::SecretTooShort {
            need: KEY_SIZE,
            got: shared_secret.len(),
        });
    }
    SymmetricKey::from_slice(&shared_secret[..KEY_SIZE])
}

/// Session key from an ECDH result
pub fn session_key_from(shared: &DhSharedSecret) -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&shared.as_bytes()[..KEY_SIZE]);
    SymmetricKey::from_bytes(key)
}
