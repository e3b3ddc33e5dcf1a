//! AES-128-CTR Stream Transform
//!
//! Counter-mode keystream over AES-128. The whole 16-byte IV is the initial
//! counter block, incremented as one 128-bit big-endian integer.
//!
//! CTR is an involution: applying the transform twice with the same key and
//! IV yields the input again, so encryption and decryption share one code
//! path. There is no integrity tag; tampered ciphertext decrypts to garbage
//! without error.

use aes::Aes128;
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{CryptoError, CryptoResult};

/// AES-128 key size
pub const KEY_SIZE: usize = 16;

/// IV (initial counter block) size
pub const IV_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// A 128-bit symmetric key, wiped from memory on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice of exactly `KEY_SIZE` bytes
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// XOR `data` with the AES-128-CTR keystream for `(key, iv)`.
///
/// Length-preserving. Used for both directions.
pub fn transform(key: &SymmetricKey, iv: &[u8; IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    transform_in_place(key, iv, &mut buf);
    buf
}

/// In-place variant of [`transform`]
pub fn transform_in_place(key: &SymmetricKey, iv: &[u8; IV_SIZE], buf: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    );
    cipher.apply_keystream(buf);
}

/// Generate a random IV
pub fn generate_iv() -> CryptoResult<[u8; IV_SIZE]> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng()
        .try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::RngError)?;
    Ok(iv)
}

/// Keyed CTR cipher producing `iv || ciphertext` messages
pub struct CtrCipher {
    key: SymmetricKey,
}

impl CtrCipher {
    /// Create a cipher bound to `key`
    pub fn new(key: &SymmetricKey) -> Self {
        Self { key: key.clone() }
    }

    /// Encrypt under a fresh random IV
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<SealedMessage> {
        let iv = generate_iv()?;
        Ok(self.seal_with_iv(plaintext, iv))
    }

    /// Encrypt under a caller-chosen IV (must not repeat for this key)
    pub fn seal_with_iv(&self, plaintext: &[u8], iv: [u8; IV_SIZE]) -> SealedMessage {
        SealedMessage {
            iv,
            ciphertext: transform(&self.key, &iv, plaintext),
        }
    }

    /// Decrypt a sealed message
    pub fn open(&self, message: &SealedMessage) -> Vec<u8> {
        transform(&self.key, &message.iv, &message.ciphertext)
    }
}

/// IV-prefixed ciphertext as carried in protocol values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Initial counter block
    pub iv: [u8; IV_SIZE],
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    /// Serialize to bytes (iv || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IV_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Split `iv || ciphertext`; an empty ciphertext is allowed
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < IV_SIZE {
            return Err(CryptoError::InvalidIvLength {
                expected: IV_SIZE,
                got: bytes.len(),
            });
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);

        Ok(Self {
            iv,
            ciphertext: bytes[IV_SIZE..].to_vec(),
        })
    }

    /// Total serialized size
    pub fn size(&self) -> usize {
        IV_SIZE + self.ciphertext.len()
    }
}
