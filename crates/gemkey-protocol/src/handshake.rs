//! Responder Handshake
//!
//! Server side of the six-message exchange.
//!
//! ## Handshake Flow
//!
//! ```text
//! Client                                          Server
//!   |                                               |
//!   |--- IDC   (client id) ------------------------>|  w = x(long_term)[..16]
//!   |--- EW_AG (iv, enc_w(A)) --------------------->|
//!   |<-- EW_BG (iv, enc_w(B)) ----------------------|  K = x(b * A)[..16]
//!   |--- AUTH  (iv, enc_K(auth)) ------------------>|  verify(long_term, auth)
//!   |--- REQ   (iv, enc_K(request)) --------------->|
//!   |<-- GEM   (iv, enc_K(response)) ---------------|
//! ```
//!
//! The state machine is sans-IO: [`ResponderHandshake::process`] consumes one
//! inbound record and returns the records to send back. Any error moves it to
//! `Failed` for good. Key material is dropped (and zeroized) as soon as the
//! handshake reaches `Done` or `Failed`.

use gemkey_crypto::{
    blinding_key_for, decode_point, encode_point, session_key_from, CtrCipher, KeyPair,
    PublicKey, SealedMessage, SymmetricKey, IV_SIZE,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::constants::{MessageTag, EPHEMERAL_VALUE_LEN, MAX_SEALED_PAYLOAD};
use crate::errors::{ProtocolError, ProtocolResult};
use crate::identity::Collaborators;
use crate::tlv::TlvRecord;

/// Responder states, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitIdentity,
    AwaitClientEphemeral,
    SendServerEphemeral,
    AwaitAuth,
    AwaitRequest,
    SendResponse,
    Done,
    Failed,
}

impl HandshakeState {
    /// Tag accepted in this state, if it waits for input
    pub fn expected_tag(self) -> Option<MessageTag> {
        match self {
            HandshakeState::AwaitIdentity => Some(MessageTag::Idc),
            HandshakeState::AwaitClientEphemeral => Some(MessageTag::EwAg),
            HandshakeState::AwaitAuth => Some(MessageTag::Auth),
            HandshakeState::AwaitRequest => Some(MessageTag::Req),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Done | HandshakeState::Failed)
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakeState::AwaitIdentity => "AWAIT_IDENTITY",
            HandshakeState::AwaitClientEphemeral => "AWAIT_CLIENT_EPHEMERAL",
            HandshakeState::SendServerEphemeral => "SEND_SERVER_EPHEMERAL",
            HandshakeState::AwaitAuth => "AWAIT_AUTH",
            HandshakeState::AwaitRequest => "AWAIT_REQUEST",
            HandshakeState::SendResponse => "SEND_RESPONSE",
            HandshakeState::Done => "DONE",
            HandshakeState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Per-connection responder state machine
pub struct ResponderHandshake {
    collaborators: Collaborators,
    state: HandshakeState,
    client_id: Option<Vec<u8>>,
    long_term: Option<PublicKey>,
    /// w
    blinding_key: Option<SymmetricKey>,
    peer_ephemeral: Option<PublicKey>,
    /// K
    session_key: Option<SymmetricKey>,
    /// State in which the handshake failed
    failed_at: Option<HandshakeState>,
}

impl ResponderHandshake {
    /// Create a responder waiting for the client identity
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            state: HandshakeState::AwaitIdentity,
            client_id: None,
            long_term: None,
            blinding_key: None,
            peer_ephemeral: None,
            session_key: None,
            failed_at: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// State the handshake was in when it failed
    pub fn failed_at(&self) -> Option<HandshakeState> {
        self.failed_at
    }

    /// Client id received in IDC, if any
    pub fn client_id(&self) -> Option<&[u8]> {
        self.client_id.as_deref()
    }

    /// Whether the session key has been derived
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Feed one inbound record; returns the records to send in order
    pub fn process(&mut self, record: TlvRecord) -> ProtocolResult<Vec<TlvRecord>> {
        if self.state.is_terminal() {
            return Err(ProtocolError::InvalidState(format!(
                "record received in terminal state {}",
                self.state
            )));
        }

        match self.step(record) {
            Ok(outgoing) => Ok(outgoing),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Abort the handshake (peer gone, timeout, shutdown)
    pub fn fail(&mut self) {
        if self.state == HandshakeState::Failed {
            return;
        }
        if self.state != HandshakeState::Done {
            self.failed_at = Some(self.state);
        }
        self.state = HandshakeState::Failed;
        self.wipe();
    }

    fn step(&mut self, record: TlvRecord) -> ProtocolResult<Vec<TlvRecord>> {
        let expected = self.state.expected_tag().ok_or_else(|| {
            ProtocolError::InvalidState(format!("no input expected in {}", self.state))
        })?;

        if record.tag != expected.to_u8() {
            return Err(ProtocolError::UnexpectedTag {
                expected,
                got: record.tag,
            });
        }

        match self.state {
            HandshakeState::AwaitIdentity => {
                self.on_identity(record.value)?;
                self.state = HandshakeState::AwaitClientEphemeral;
                Ok(Vec::new())
            }
            HandshakeState::AwaitClientEphemeral => {
                self.on_client_ephemeral(&record.value)?;
                self.state = HandshakeState::SendServerEphemeral;
                let reply = self.send_server_ephemeral()?;
                self.state = HandshakeState::AwaitAuth;
                Ok(vec![reply])
            }
            HandshakeState::AwaitAuth => {
                self.on_auth(&record.value)?;
                self.state = HandshakeState::AwaitRequest;
                Ok(Vec::new())
            }
            HandshakeState::AwaitRequest => {
                let response = self.on_request(&record.value)?;
                self.state = HandshakeState::SendResponse;
                let reply = self.send_response(&response)?;
                self.state = HandshakeState::Done;
                self.wipe();
                Ok(vec![reply])
            }
            other => Err(ProtocolError::InvalidState(format!(
                "no input expected in {}",
                other
            ))),
        }
    }

    fn on_identity(&mut self, client_id: Vec<u8>) -> ProtocolResult<()> {
        let display_id = String::from_utf8_lossy(&client_id).into_owned();
        let long_term = self
            .collaborators
            .identities
            .lookup(&client_id)
            .ok_or_else(|| ProtocolError::UnknownClient(display_id.clone()))?;

        debug!("Identified client {}", display_id);

        self.blinding_key = Some(blinding_key_for(&long_term));
        self.long_term = Some(long_term);
        self.client_id = Some(client_id);
        Ok(())
    }

    fn on_client_ephemeral(&mut self, value: &[u8]) -> ProtocolResult<()> {
        if value.len() != EPHEMERAL_VALUE_LEN {
            return Err(ProtocolError::MalformedValue {
                tag: MessageTag::EwAg,
                reason: format!("expected {} bytes, got {}", EPHEMERAL_VALUE_LEN, value.len()),
            });
        }

        let w = self.require_blinding_key()?;
        let sealed = SealedMessage::from_bytes(value)?;
        let point_bytes = CtrCipher::new(w).open(&sealed);
        let peer = decode_point(&point_bytes)?;

        debug!("Client ephemeral key accepted");
        self.peer_ephemeral = Some(peer);
        Ok(())
    }

    fn send_server_ephemeral(&mut self) -> ProtocolResult<TlvRecord> {
        let peer = self
            .peer_ephemeral
            .ok_or_else(|| ProtocolError::InvalidState("client ephemeral missing".into()))?;

        // Dropped at the end of this function; only K outlives it.
        let ephemeral = KeyPair::generate();

        let sealed = CtrCipher::new(self.require_blinding_key()?)
            .seal(&encode_point(ephemeral.public_key()))?;
        let reply = TlvRecord::message(MessageTag::EwBg, sealed.to_bytes())?;

        self.session_key = Some(session_key_from(&ephemeral.agree(&peer)));
        debug!("Session key derived");
        Ok(reply)
    }

    fn on_auth(&mut self, value: &[u8]) -> ProtocolResult<()> {
        let auth_value = self.open_sealed(MessageTag::Auth, value)?;
        let long_term = self
            .long_term
            .ok_or_else(|| ProtocolError::InvalidState("long-term key missing".into()))?;

        debug!("Received authentication value ({} bytes)", auth_value.len());

        if !self.collaborators.verifier.verify(&long_term, &auth_value) {
            return Err(ProtocolError::AuthVerificationFailed);
        }
        Ok(())
    }

    fn on_request(&mut self, value: &[u8]) -> ProtocolResult<Vec<u8>> {
        let request = self.open_sealed(MessageTag::Req, value)?;
        debug!("Received request ({} bytes)", request.len());
        Ok(self.collaborators.handler.handle(&request))
    }

    fn send_response(&mut self, response: &[u8]) -> ProtocolResult<TlvRecord> {
        if response.len() > MAX_SEALED_PAYLOAD {
            return Err(ProtocolError::Encoding {
                len: IV_SIZE + response.len(),
                max: IV_SIZE + MAX_SEALED_PAYLOAD,
            });
        }

        let sealed = CtrCipher::new(self.require_session_key()?).seal(response)?;
        TlvRecord::message(MessageTag::Gem, sealed.to_bytes())
    }

    /// Decrypt a K-sealed value; the plaintext is wiped when dropped
    fn open_sealed(&self, tag: MessageTag, value: &[u8]) -> ProtocolResult<Zeroizing<Vec<u8>>> {
        if value.len() < IV_SIZE {
            return Err(ProtocolError::MalformedValue {
                tag,
                reason: format!("value shorter than the {}-byte IV", IV_SIZE),
            });
        }
        let sealed = SealedMessage::from_bytes(value)?;
        Ok(Zeroizing::new(
            CtrCipher::new(self.require_session_key()?).open(&sealed),
        ))
    }

    fn require_blinding_key(&self) -> ProtocolResult<&SymmetricKey> {
        self.blinding_key
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("blinding key missing".into()))
    }

    fn require_session_key(&self) -> ProtocolResult<&SymmetricKey> {
        self.session_key
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("session key missing".into()))
    }

    fn wipe(&mut self) {
        self.blinding_key = None;
        self.session_key = None;
        self.peer_ephemeral = None;
    }
}

impl std::fmt::Debug for ResponderHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderHandshake")
            .field("state", &self.state)
            .field(
                "client_id",
                &self.client_id.as_deref().map(String::from_utf8_lossy),
            )
            .field("has_session_key", &self.session_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityStore;
    use crate::initiator::InitiatorHandshake;

    fn setup() -> (KeyPair, Collaborators) {
        let long_term = KeyPair::generate();
        let store = StaticIdentityStore::new().with_client("client1", *long_term.public_key());
        (long_term, Collaborators::with_identities(store))
    }

    fn initiator(long_term: &KeyPair) -> InitiatorHandshake {
        InitiatorHandshake::new(b"client1".to_vec(), *long_term.public_key())
    }

    #[test]
    fn test_full_exchange() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators.handler(|req: &[u8]| {
            let mut out = b"pong:".to_vec();
            out.extend_from_slice(req);
            out
        }));
        let mut client = initiator(&long_term);

        assert!(server.process(client.identity_record().unwrap()).unwrap().is_empty());
        assert_eq!(server.state(), HandshakeState::AwaitClientEphemeral);

        let replies = server.process(client.ephemeral_record().unwrap()).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].tag, MessageTag::EwBg.to_u8());
        assert_eq!(replies[0].value.len(), EPHEMERAL_VALUE_LEN);
        assert_eq!(server.state(), HandshakeState::AwaitAuth);
        assert!(server.has_session_key());

        client.process_server_ephemeral(&replies[0]).unwrap();

        assert!(server.process(client.auth_record(b"sig").unwrap()).unwrap().is_empty());
        assert_eq!(server.state(), HandshakeState::AwaitRequest);

        let replies = server.process(client.request_record(b"ping").unwrap()).unwrap();
        assert_eq!(server.state(), HandshakeState::Done);
        assert!(!server.has_session_key());

        let response = client.open_response(&replies[0]).unwrap();
        assert_eq!(response, b"pong:ping");
    }

    #[test]
    fn test_opened_plaintext_is_zeroizing() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();
        let replies = server.process(client.ephemeral_record().unwrap()).unwrap();
        client.process_server_ephemeral(&replies[0]).unwrap();

        let auth = client.auth_record(b"secret auth").unwrap();
        let opened: Zeroizing<Vec<u8>> = server.open_sealed(MessageTag::Auth, &auth.value).unwrap();
        assert_eq!(opened.as_slice(), b"secret auth");
    }

    #[test]
    fn test_unknown_client_fails() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        let mut client = InitiatorHandshake::new(b"mallory".to_vec(), *long_term.public_key());

        let result = server.process(client.identity_record().unwrap());
        assert!(matches!(result, Err(ProtocolError::UnknownClient(id)) if id == "mallory"));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(server.failed_at(), Some(HandshakeState::AwaitIdentity));
    }

    #[test]
    fn test_request_before_ephemeral_fails() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();

        let req = TlvRecord::message(MessageTag::Req, vec![0u8; 20]).unwrap();
        let result = server.process(req);
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedTag {
                expected: MessageTag::EwAg,
                got: 0x05
            })
        ));
        assert_eq!(server.failed_at(), Some(HandshakeState::AwaitClientEphemeral));
    }

    #[test]
    fn test_off_curve_ephemeral_fails_before_key_derivation() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();

        // Correctly blinded under w, but (1, 1) is not on P-256
        let mut bogus = [0u8; 64];
        bogus[31] = 1;
        bogus[63] = 1;
        let w = blinding_key_for(long_term.public_key());
        let sealed = CtrCipher::new(&w).seal(&bogus).unwrap();
        let record = TlvRecord::message(MessageTag::EwAg, sealed.to_bytes()).unwrap();

        let result = server.process(record);
        assert!(matches!(result, Err(ProtocolError::InvalidPoint)));
        assert!(!server.has_session_key());
        assert_eq!(server.failed_at(), Some(HandshakeState::AwaitClientEphemeral));
    }

    #[test]
    fn test_short_ephemeral_value_fails() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();
        let record = TlvRecord::message(MessageTag::EwAg, vec![0u8; 40]).unwrap();

        assert!(matches!(
            server.process(record),
            Err(ProtocolError::MalformedValue { tag: MessageTag::EwAg, .. })
        ));
    }

    #[test]
    fn test_rejected_auth_fails() {
        let (long_term, collaborators) = setup();
        let mut server = ResponderHandshake::new(
            collaborators.verifier(|_: &PublicKey, auth: &[u8]| auth == b"good"),
        );
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();
        let replies = server.process(client.ephemeral_record().unwrap()).unwrap();
        client.process_server_ephemeral(&replies[0]).unwrap();

        let result = server.process(client.auth_record(b"bad").unwrap());
        assert!(matches!(result, Err(ProtocolError::AuthVerificationFailed)));
        assert_eq!(server.failed_at(), Some(HandshakeState::AwaitAuth));
    }

    #[test]
    fn test_oversized_response_fails() {
        let (long_term, collaborators) = setup();
        let mut server =
            ResponderHandshake::new(collaborators.handler(|_: &[u8]| vec![0u8; 240]));
        let mut client = initiator(&long_term);

        server.process(client.identity_record().unwrap()).unwrap();
        let replies = server.process(client.ephemeral_record().unwrap()).unwrap();
        client.process_server_ephemeral(&replies[0]).unwrap();
        server.process(client.auth_record(b"sig").unwrap()).unwrap();

        let result = server.process(client.request_record(b"ping").unwrap());
        assert!(matches!(result, Err(ProtocolError::Encoding { .. })));
        assert_eq!(server.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_terminal_state_rejects_input() {
        let (_, collaborators) = setup();
        let mut server = ResponderHandshake::new(collaborators);
        server.fail();

        let record = TlvRecord::message(MessageTag::Idc, b"client1".to_vec()).unwrap();
        assert!(matches!(
            server.process(record),
            Err(ProtocolError::InvalidState(_))
        ));
    }

    #[test]
    fn test_state_expectations() {
        assert_eq!(HandshakeState::AwaitIdentity.expected_tag(), Some(MessageTag::Idc));
        assert_eq!(HandshakeState::SendServerEphemeral.expected_tag(), None);
        assert!(HandshakeState::Done.is_terminal());
        assert!(HandshakeState::Failed.is_terminal());
        assert!(!HandshakeState::AwaitAuth.is_terminal());
        assert_eq!(HandshakeState::AwaitAuth.to_string(), "AWAIT_AUTH");
    }
}
