//! P-256 Key Agreement
//!
//! Elliptic Curve Diffie-Hellman over NIST P-256 (secp256r1).
//!
//! Public points travel as 64 raw bytes: the x and y coordinates, each
//! big-endian and left-padded to 32 bytes. Decoding always checks that the
//! pair lies on the curve; there is no unchecked constructor.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, FieldBytes, PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{CryptoError, CryptoResult};

/// Size of one affine coordinate in bytes
pub const COORDINATE_SIZE: usize = 32;

/// Size of an encoded public point (x || y)
pub const POINT_SIZE: usize = 2 * COORDINATE_SIZE;

/// Size of a private scalar in bytes
pub const SCALAR_SIZE: usize = 32;

/// Size of the ECDH shared secret (x-coordinate)
pub const SHARED_SECRET_SIZE: usize = 32;

/// SEC1 tag for an uncompressed point
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// P-256 key pair
///
/// The private scalar is zeroized when the pair is dropped.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Create from a big-endian private scalar
    pub fn from_scalar_bytes(bytes: &[u8; SCALAR_SIZE]) -> CryptoResult<Self> {
        let secret = SecretKey::from_bytes(FieldBytes::from_slice(bytes))
            .map_err(|_| CryptoError::InvalidScalar)?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Create from a hex-encoded private scalar
    pub fn from_scalar_hex(scalar_hex: &str) -> CryptoResult<Self> {
        let mut decoded = hex::decode(scalar_hex.trim())?;
        let result = <[u8; SCALAR_SIZE]>::try_from(decoded.as_slice())
            .map_err(|_| CryptoError::InvalidScalar)
            .and_then(|bytes| Self::from_scalar_bytes(&bytes));
        decoded.zeroize();
        result
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Get the public key as 64 bytes (x || y)
    pub fn public_point_bytes(&self) -> [u8; POINT_SIZE] {
        encode_point(&self.public)
    }

    /// Perform Diffie-Hellman with the peer's public key
    pub fn agree(&self, their_public: &PublicKey) -> DhSharedSecret {
        agree(&self.secret, their_public)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(encode_point(&self.public)))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Encode a public point as x || y, each coordinate 32 bytes big-endian
pub fn encode_point(point: &PublicKey) -> [u8; POINT_SIZE] {
    // Uncompressed SEC1 is 0x04 || x || y and a PublicKey is never the identity.
    let encoded = point.to_encoded_point(false);
    let mut out = [0u8; POINT_SIZE];
    out.copy_from_slice(&encoded.as_bytes()[1..]);
    out
}

/// Decode 64 bytes (x || y) into a validated curve point
pub fn decode_point(bytes: &[u8]) -> CryptoResult<PublicKey> {
    if bytes.len() != POINT_SIZE {
        return Err(CryptoError::InvalidPointLength {
            expected: POINT_SIZE,
            got: bytes.len(),
        });
    }

    let mut tagged = [0u8; POINT_SIZE + 1];
    tagged[0] = SEC1_UNCOMPRESSED_TAG;
    tagged[1..].copy_from_slice(bytes);

    PublicKey::from_sec1_bytes(&tagged).map_err(|_| CryptoError::InvalidPoint)
}

/// Decode a hex string holding a 64-byte x || y point
pub fn decode_point_hex(point_hex: &str) -> CryptoResult<PublicKey> {
    let bytes = hex::decode(point_hex.trim())?;
    decode_point(&bytes)
}

/// The big-endian 32-byte x-coordinate of a point
pub fn x_coordinate(point: &PublicKey) -> [u8; COORDINATE_SIZE] {
    let mut x = [0u8; COORDINATE_SIZE];
    x.copy_from_slice(&encode_point(point)[..COORDINATE_SIZE]);
    x
}

/// ECDH: x-coordinate of `secret * their_public`, big-endian
pub fn agree(secret: &SecretKey, their_public: &PublicKey) -> DhSharedSecret {
    let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), their_public.as_affine());
    let mut bytes = [0u8; SHARED_SECRET_SIZE];
    bytes.copy_from_slice(shared.raw_secret_bytes());
    DhSharedSecret(bytes)
}

/// Raw ECDH output, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhSharedSecret([u8; SHARED_SECRET_SIZE]);

impl DhSharedSecret {
    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DhSharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhSharedSecret([REDACTED])")
    }
}
