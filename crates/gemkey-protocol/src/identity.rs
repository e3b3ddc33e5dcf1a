//! Handshake Collaborators
//!
//! The responder consults three outside parties:
//!
//! - an [`IdentityStore`] mapping client ids to long-term public keys,
//! - an [`AuthVerifier`] judging the decrypted AUTH value,
//! - a [`RequestHandler`] turning the decrypted request into a response.
//!
//! All three are synchronous and shared read-only between connections.

use std::collections::HashMap;
use std::sync::Arc;

use gemkey_crypto::{decode_point_hex, CryptoResult, KeyPair, PublicKey};

use crate::constants::DEFAULT_GEM;

/// Lookup of pre-provisioned client identities
pub trait IdentityStore: Send + Sync {
    /// Long-term public key for `client_id`, if known
    fn lookup(&self, client_id: &[u8]) -> Option<PublicKey>;
}

/// Check of the client's authentication value
pub trait AuthVerifier: Send + Sync {
    /// Whether `auth_value` proves possession of `long_term`
    fn verify(&self, long_term: &PublicKey, auth_value: &[u8]) -> bool;
}

/// Application logic behind the single request/response pair
pub trait RequestHandler: Send + Sync {
    /// Produce the response for a decrypted request
    fn handle(&self, request: &[u8]) -> Vec<u8>;
}

impl<F> AuthVerifier for F
where
    F: Fn(&PublicKey, &[u8]) -> bool + Send + Sync,
{
    fn verify(&self, long_term: &PublicKey, auth_value: &[u8]) -> bool {
        self(long_term, auth_value)
    }
}

impl<F> RequestHandler for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn handle(&self, request: &[u8]) -> Vec<u8> {
        self(request)
    }
}

/// In-memory identity store
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityStore {
    clients: HashMap<Vec<u8>, PublicKey>,
}

impl StaticIdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a client
    pub fn insert(&mut self, client_id: impl Into<Vec<u8>>, long_term: PublicKey) {
        self.clients.insert(client_id.into(), long_term);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_client(mut self, client_id: impl Into<Vec<u8>>, long_term: PublicKey) -> Self {
        self.insert(client_id, long_term);
        self
    }

    /// Add a client from a hex-encoded 64-byte point
    pub fn insert_point_hex(&mut self, client_id: impl Into<Vec<u8>>, point_hex: &str) -> CryptoResult<()> {
        let point = decode_point_hex(point_hex)?;
        self.insert(client_id, point);
        Ok(())
    }

    /// Add a client from its private scalar (test rigs only)
    pub fn insert_scalar_hex(&mut self, client_id: impl Into<Vec<u8>>, scalar_hex: &str) -> CryptoResult<()> {
        let pair = KeyPair::from_scalar_hex(scalar_hex)?;
        self.insert(client_id, *pair.public_key());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl IdentityStore for StaticIdentityStore {
    fn lookup(&self, client_id: &[u8]) -> Option<PublicKey> {
        self.clients.get(client_id).copied()
    }
}

/// Accepts every authentication value.
///
/// The value is decrypted and inspected but not checked against the
/// long-term key. Plug in a real verifier for anything beyond testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl AuthVerifier for AcceptAllVerifier {
    fn verify(&self, _long_term: &PublicKey, _auth_value: &[u8]) -> bool {
        true
    }
}

/// Returns the same payload for every request
#[derive(Debug, Clone)]
pub struct StaticResponder {
    response: Vec<u8>,
}

impl StaticResponder {
    pub fn new(response: impl Into<Vec<u8>>) -> Self {
        Self {
            response: response.into(),
        }
    }

    pub fn response(&self) -> &[u8] {
        &self.response
    }
}

impl Default for StaticResponder {
    fn default() -> Self {
        Self::new(DEFAULT_GEM)
    }
}

impl RequestHandler for StaticResponder {
    fn handle(&self, _request: &[u8]) -> Vec<u8> {
        self.response.clone()
    }
}

/// The collaborator set handed to every responder
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityStore>,
    pub verifier: Arc<dyn AuthVerifier>,
    pub handler: Arc<dyn RequestHandler>,
}

impl Collaborators {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        verifier: Arc<dyn AuthVerifier>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            identities,
            verifier,
            handler,
        }
    }

    /// Known identities with accept-all auth and the fixed gem response
    pub fn with_identities(identities: impl IdentityStore + 'static) -> Self {
        Self::new(
            Arc::new(identities),
            Arc::new(AcceptAllVerifier),
            Arc::new(StaticResponder::default()),
        )
    }

    pub fn verifier(mut self, verifier: impl AuthVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn handler(mut self, handler: impl RequestHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
