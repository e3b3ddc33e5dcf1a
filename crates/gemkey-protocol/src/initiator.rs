//! Initiator Handshake
//!
//! Client side of the exchange. The client knows its own long-term public
//! key, so it derives the same blinding key `w` the server looked up.

use gemkey_crypto::{
    blinding_key_for, decode_point, session_key_from, CtrCipher, KeyPair, PublicKey,
    SealedMessage, SymmetricKey,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::constants::{MessageTag, EPHEMERAL_VALUE_LEN, MAX_SEALED_PAYLOAD};
use crate::errors::{ProtocolError, ProtocolResult};
use crate::tlv::{read_record, write_record, TlvRecord};

/// Initiator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Initial,
    IdentitySent,
    EphemeralSent,
    KeyEstablished,
    AuthSent,
    RequestSent,
    Complete,
    Failed,
}

/// Client-side handshake state machine
pub struct InitiatorHandshake {
    client_id: Vec<u8>,
    blinding_key: SymmetricKey,
    ephemeral: Option<KeyPair>,
    session_key: Option<SymmetricKey>,
    state: InitiatorState,
}

impl InitiatorHandshake {
    /// Create an initiator with a fresh ephemeral key
    pub fn new(client_id: Vec<u8>, long_term_public: PublicKey) -> Self {
        Self::with_ephemeral(client_id, long_term_public, KeyPair::generate())
    }

    /// Create an initiator with a caller-supplied ephemeral key
    pub fn with_ephemeral(client_id: Vec<u8>, long_term_public: PublicKey, ephemeral: KeyPair) -> Self {
        Self {
            client_id,
            blinding_key: blinding_key_for(&long_term_public),
            ephemeral: Some(ephemeral),
            session_key: None,
            state: InitiatorState::Initial,
        }
    }

    /// Get current state
    pub fn state(&self) -> InitiatorState {
        self.state
    }

    /// Session key, once the server's ephemeral key has been processed
    pub fn session_key(&self) -> Option<&SymmetricKey> {
        self.session_key.as_ref()
    }

    /// IDC record
    pub fn identity_record(&mut self) -> ProtocolResult<TlvRecord> {
        self.expect(InitiatorState::Initial)?;
        let record = TlvRecord::message(MessageTag::Idc, self.client_id.clone())?;
        self.state = InitiatorState::IdentitySent;
        Ok(record)
    }

    /// EW_AG record: own ephemeral point blinded under w
    pub fn ephemeral_record(&mut self) -> ProtocolResult<TlvRecord> {
        self.expect(InitiatorState::IdentitySent)?;
        let ephemeral = self
            .ephemeral
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("ephemeral key consumed".into()))?;

        let sealed = CtrCipher::new(&self.blinding_key).seal(&ephemeral.public_point_bytes())?;
        let record = TlvRecord::message(MessageTag::EwAg, sealed.to_bytes())?;
        self.state = InitiatorState::EphemeralSent;
        Ok(record)
    }

    /// Consume EW_BG and derive K
    pub fn process_server_ephemeral(&mut self, record: &TlvRecord) -> ProtocolResult<()> {
        self.expect(InitiatorState::EphemeralSent)?;
        let result = self.derive_session_key(record);
        self.settle(result, InitiatorState::KeyEstablished)
    }

    /// AUTH record carrying `auth_value` under K
    pub fn auth_record(&mut self, auth_value: &[u8]) -> ProtocolResult<TlvRecord> {
        self.expect(InitiatorState::KeyEstablished)?;
        let record = self.seal_record(MessageTag::Auth, auth_value)?;
        self.state = InitiatorState::AuthSent;
        Ok(record)
    }

    /// REQ record carrying `request` under K
    pub fn request_record(&mut self, request: &[u8]) -> ProtocolResult<TlvRecord> {
        self.expect(InitiatorState::AuthSent)?;
        let record = self.seal_record(MessageTag::Req, request)?;
        self.state = InitiatorState::RequestSent;
        Ok(record)
    }

    /// Decrypt the GEM response
    pub fn open_response(&mut self, record: &TlvRecord) -> ProtocolResult<Vec<u8>> {
        self.expect(InitiatorState::RequestSent)?;
        let result = self.open_record(MessageTag::Gem, record);
        let state = if result.is_ok() {
            InitiatorState::Complete
        } else {
            InitiatorState::Failed
        };
        self.state = state;
        self.session_key = None;
        result
    }

    /// Drive the whole exchange over `stream`; returns the decrypted response
    pub async fn run<S>(mut self, stream: &mut S, auth_value: &[u8], request: &[u8]) -> ProtocolResult<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_record(stream, &self.identity_record()?).await?;
        write_record(stream, &self.ephemeral_record()?).await?;

        let server_ephemeral = read_record(stream).await?;
        self.process_server_ephemeral(&server_ephemeral)?;

        write_record(stream, &self.auth_record(auth_value)?).await?;
        write_record(stream, &self.request_record(request)?).await?;

        let gem = read_record(stream).await?;
        self.open_response(&gem)
    }

    fn derive_session_key(&mut self, record: &TlvRecord) -> ProtocolResult<()> {
        check_tag(MessageTag::EwBg, record)?;
        if record.value.len() != EPHEMERAL_VALUE_LEN {
            return Err(ProtocolError::MalformedValue {
                tag: MessageTag::EwBg,
                reason: format!(
                    "expected {} bytes, got {}",
                    EPHEMERAL_VALUE_LEN,
                    record.value.len()
                ),
            });
        }

        let sealed = SealedMessage::from_bytes(&record.value)?;
        let server_public = decode_point(&CtrCipher::new(&self.blinding_key).open(&sealed))?;

        let ephemeral = self
            .ephemeral
            .take()
            .ok_or_else(|| ProtocolError::InvalidState("ephemeral key consumed".into()))?;
        self.session_key = Some(session_key_from(&ephemeral.agree(&server_public)));
        Ok(())
    }

    fn seal_record(&self, tag: MessageTag, payload: &[u8]) -> ProtocolResult<TlvRecord> {
        if payload.len() > MAX_SEALED_PAYLOAD {
            return Err(ProtocolError::Encoding {
                len: payload.len(),
                max: MAX_SEALED_PAYLOAD,
            });
        }
        let sealed = CtrCipher::new(self.require_session_key()?).seal(payload)?;
        TlvRecord::message(tag, sealed.to_bytes())
    }

    fn open_record(&self, tag: MessageTag, record: &TlvRecord) -> ProtocolResult<Vec<u8>> {
        check_tag(tag, record)?;
        let sealed = SealedMessage::from_bytes(&record.value)?;
        Ok(CtrCipher::new(self.require_session_key()?).open(&sealed))
    }

    fn require_session_key(&self) -> ProtocolResult<&SymmetricKey> {
        self.session_key
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState("session key not established".into()))
    }

    fn expect(&self, state: InitiatorState) -> ProtocolResult<()> {
        if self.state != state {
            return Err(ProtocolError::InvalidState(format!(
                "initiator in {:?}, expected {:?}",
                self.state, state
            )));
        }
        Ok(())
    }

    fn settle(&mut self, result: ProtocolResult<()>, next: InitiatorState) -> ProtocolResult<()> {
        self.state = if result.is_ok() { next } else { InitiatorState::Failed };
        result
    }
}

impl std::fmt::Debug for InitiatorHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorHandshake")
            .field("client_id", &String::from_utf8_lossy(&self.client_id))
            .field("state", &self.state)
            .finish()
    }
}

fn check_tag(expected: MessageTag, record: &TlvRecord) -> ProtocolResult<()> {
    if record.tag != expected.to_u8() {
        return Err(ProtocolError::UnexpectedTag {
            expected,
            got: record.tag,
        });
    }
    Ok(())
}
