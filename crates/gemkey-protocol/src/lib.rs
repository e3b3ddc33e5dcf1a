//! # GemKey Protocol
//!
//! Wire framing and handshake state machines for GemKey: a six-message
//! exchange that turns a pre-provisioned client identity into a fresh
//! P-256 session key, then carries one request/response pair under it.
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                 Server
//!   |                                      |
//!   |------- IDC (client id) ------------->|
//!   |------- EW_AG (blinded ephemeral) --->|
//!   |<------ EW_BG (blinded ephemeral) ----|
//!   |                                      |
//!   |====== session key K established =====|
//!   |                                      |
//!   |------- AUTH (enc_K) ---------------->|
//!   |------- REQ (enc_K) ----------------->|
//!   |<------ GEM (enc_K) ------------------|
//! ```
//!
//! Messages are unauthenticated AES-128-CTR; see `gemkey_crypto` for the
//! caveats that come with that.

pub mod constants;
pub mod tlv;
pub mod identity;
pub mod handshake;
pub mod initiator;
pub mod errors;

pub use constants::*;
pub use tlv::*;
pub use identity::*;
pub use handshake::*;
pub use initiator::*;
pub use errors::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::constants::*;
    pub use crate::tlv::*;
    pub use crate::identity::*;
    pub use crate::handshake::*;
    pub use crate::initiator::*;
    pub use crate::errors::*;
}
