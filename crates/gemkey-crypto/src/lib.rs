//! # GemKey Crypto
//!
//! Cryptographic building blocks for the GemKey handshake.
//!
//! ## Components
//!
//! - **Cipher**: AES-128-CTR keystream transform with per-message IVs
//! - **Key Agreement**: P-256 ECDH with validated 64-byte point encoding
//! - **Derivation**: blinding key `w` and session key `K` by truncation
//!
//! ## Security
//!
//! - No message carries an integrity tag; CTR ciphertext is malleable
//! - `w` is recoverable from the client's public key and only hides
//!   ephemeral points from passive observers
//! - Key material is zeroized on drop

pub mod cipher;
pub mod key_agreement;
pub mod derivation;
pub mod errors;

pub use cipher::*;
pub use key_agreement::*;
pub use derivation::*;
pub use errors::*;

/// Re-exported curve types used across the public API
pub use p256::{PublicKey, SecretKey};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cipher::*;
    pub use crate::key_agreement::*;
    pub use crate::derivation::*;
    pub use crate::errors::*;
    pub use p256::PublicKey;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blinded_ephemeral_exchange() {
        // Server knows the client's long-term key in advance
        let long_term = KeyPair::generate();
        let w = blinding_key_for(long_term.public_key());

        // Client blinds its ephemeral point under w
        let client_eph = KeyPair::generate();
        let blinded = CtrCipher::new(&w)
            .seal(&client_eph.public_point_bytes())
            .unwrap();

        // Server unblinds and validates it
        let recovered = decode_point(&CtrCipher::new(&w).open(&blinded)).unwrap();
        assert_eq!(&recovered, client_eph.public_key());

        // Both ends land on the same K
        let server_eph = KeyPair::generate();
        let k_server = session_key_from(&server_eph.agree(&recovered));
        let k_client = session_key_from(&client_eph.agree(server_eph.public_key()));
        assert_eq!(k_server, k_client);

        let sealed = CtrCipher::new(&k_client).seal(b"ping").unwrap();
        assert_eq!(CtrCipher::new(&k_server).open(&sealed), b"ping");
    }
}
