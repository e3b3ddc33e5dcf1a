//! Connection Driver
//!
//! Runs one [`ResponderHandshake`] over one stream. Every read is bounded by
//! the read timeout and the whole exchange by the handshake deadline; a
//! shutdown signal aborts the exchange wherever it is. The stream is always
//! shut down afterwards, whatever the outcome.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use gemkey_protocol::{
    read_record, write_record, Collaborators, HandshakeState, ProtocolError, ProtocolResult,
    ResponderHandshake,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ServerConfig};

/// Per-connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address
    pub remote_addr: SocketAddr,
    /// Connection time
    pub connected_at: Instant,
    /// Last record time
    pub last_activity: Instant,
    /// Records received
    pub records_received: u64,
    /// Records sent
    pub records_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            remote_addr,
            connected_at: now,
            last_activity: now,
            records_received: 0,
            records_sent: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Record a received record
    pub fn record_received(&mut self, bytes: usize) {
        self.records_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = Instant::now();
    }

    /// Record a sent record
    pub fn record_sent(&mut self, bytes: usize) {
        self.records_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Get connection duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Outcome of one connection
#[derive(Debug)]
pub struct ConnectionReport {
    pub info: ConnectionInfo,
    /// Client id from IDC, lossily decoded
    pub client_id: Option<String>,
    /// Final handshake state (`Done` or `Failed`)
    pub state: HandshakeState,
    /// State the handshake failed in
    pub failed_at: Option<HandshakeState>,
    /// Why the handshake ended early
    pub error: Option<ProtocolError>,
}

impl ConnectionReport {
    pub fn is_completed(&self) -> bool {
        self.state == HandshakeState::Done
    }
}

/// Drives responder handshakes with shared collaborators and timeouts
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    collaborators: Collaborators,
    read_timeout: Duration,
    handshake_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(collaborators: Collaborators, read_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            collaborators,
            read_timeout,
            handshake_timeout,
        }
    }

    /// Handler for the configured clients, response and timeouts
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.collaborators()?,
            config.read_timeout(),
            config.handshake_timeout(),
        ))
    }

    /// Run one handshake to completion, failure, timeout or cancellation
    pub async fn handle<S>(
        &self,
        stream: &mut S,
        peer: SocketAddr,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionReport
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut responder = ResponderHandshake::new(self.collaborators.clone());
        let mut info = ConnectionInfo::new(peer);
        let deadline = deadline_after(self.handshake_timeout);

        let result = tokio::select! {
            biased;
            outcome = tokio::time::timeout_at(deadline, self.exchange(stream, &mut responder, &mut info)) => {
                outcome.unwrap_or(Err(ProtocolError::HandshakeTimeout))
            }
            _ = cancelled(shutdown) => Err(ProtocolError::Cancelled),
        };

        if result.is_err() {
            responder.fail();
        }

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", peer, e);
        }

        let client_id = responder
            .client_id()
            .map(|id| String::from_utf8_lossy(id).into_owned());

        match &result {
            Ok(()) => info!(
                "Handshake with {} ({}) complete in {:?}",
                peer,
                client_id.as_deref().unwrap_or("?"),
                info.duration()
            ),
            Err(e) if e.is_clean_close() => debug!(
                "Peer {} closed the connection in {}",
                peer,
                responder.failed_at().unwrap_or(responder.state())
            ),
            Err(e) => warn!(
                kind = e.kind(),
                "Handshake with {} failed in {}: {}",
                peer,
                responder.failed_at().unwrap_or(responder.state()),
                e
            ),
        }

        ConnectionReport {
            info,
            client_id,
            state: responder.state(),
            failed_at: responder.failed_at(),
            error: result.err(),
        }
    }

    async fn exchange<S>(
        &self,
        stream: &mut S,
        responder: &mut ResponderHandshake,
        info: &mut ConnectionInfo,
    ) -> ProtocolResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while !responder.state().is_terminal() {
            let record = tokio::time::timeout(self.read_timeout, read_record(stream))
                .await
                .map_err(|_| ProtocolError::HandshakeTimeout)??;
            info.record_received(record.wire_len());

            debug!(
                "Received tag {:#04x} ({} bytes) from {} in {}",
                record.tag,
                record.value.len(),
                info.remote_addr,
                responder.state()
            );

            for reply in responder.process(record)? {
                let written = write_record(stream, &reply).await?;
                info.record_sent(written);
            }
        }
        Ok(())
    }
}

/// `now + timeout`, or roughly thirty years out when that overflows
fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Resolves once the shutdown flag is set; never if the sender is gone
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemkey_crypto::KeyPair;
    use gemkey_protocol::{
        InitiatorHandshake, MessageTag, StaticIdentityStore, TlvRecord, DEFAULT_GEM,
    };
    use tokio::io::duplex;

    const CLIENT_SCALAR_HEX: &str =
        "1c43912e2471e4cb11ff8d4cee2523f153714a8c241e61fdcfa2224b82fbad5d";

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn handler(read_timeout: Duration, handshake_timeout: Duration) -> ConnectionHandler {
        let mut store = StaticIdentityStore::new();
        store.insert_scalar_hex("client1", CLIENT_SCALAR_HEX).unwrap();
        ConnectionHandler::new(
            Collaborators::with_identities(store),
            read_timeout,
            handshake_timeout,
        )
    }

    #[test]
    fn test_connection_info() {
        let mut info = ConnectionInfo::new(peer());

        assert_eq!(info.records_received, 0);
        assert_eq!(info.bytes_received, 0);

        info.record_received(82);
        assert_eq!(info.records_received, 1);
        assert_eq!(info.bytes_received, 82);

        info.record_sent(50);
        assert_eq!(info.records_sent, 1);
        assert_eq!(info.bytes_sent, 50);
    }

    #[tokio::test]
    async fn test_handle_complete_handshake() {
        let handler = handler(Duration::from_secs(5), Duration::from_secs(5));
        let (_tx, mut shutdown) = watch::channel(false);
        let (mut client_end, mut server_end) = duplex(4096);

        let long_term = KeyPair::from_scalar_hex(CLIENT_SCALAR_HEX).unwrap();
        let client = tokio::spawn(async move {
            InitiatorHandshake::new(b"client1".to_vec(), *long_term.public_key())
                .run(&mut client_end, b"auth", b"ping")
                .await
        });

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(report.is_completed());
        assert!(report.error.is_none());
        assert_eq!(report.client_id.as_deref(), Some("client1"));
        assert_eq!(report.info.records_received, 4);
        assert_eq!(report.info.records_sent, 2);

        assert_eq!(client.await.unwrap().unwrap(), DEFAULT_GEM);
    }

    #[tokio::test]
    async fn test_handle_clean_close() {
        let handler = handler(Duration::from_secs(5), Duration::from_secs(5));
        let (_tx, mut shutdown) = watch::channel(false);
        let (client_end, mut server_end) = duplex(64);
        drop(client_end);

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert_eq!(report.state, HandshakeState::Failed);
        assert_eq!(report.failed_at, Some(HandshakeState::AwaitIdentity));
        assert!(report.error.unwrap().is_clean_close());
    }

    #[tokio::test]
    async fn test_handle_read_timeout() {
        let handler = handler(Duration::from_millis(50), Duration::from_secs(5));
        let (_tx, mut shutdown) = watch::channel(false);
        let (_client_end, mut server_end) = duplex(64);

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(matches!(report.error, Some(ProtocolError::HandshakeTimeout)));
        assert_eq!(report.failed_at, Some(HandshakeState::AwaitIdentity));
    }

    #[tokio::test]
    async fn test_handle_overall_deadline() {
        let handler = handler(Duration::from_secs(5), Duration::from_millis(100));
        let (_tx, mut shutdown) = watch::channel(false);
        let (mut client_end, mut server_end) = duplex(64);

        let idc = TlvRecord::message(MessageTag::Idc, b"client1".to_vec()).unwrap();
        write_record(&mut client_end, &idc).await.unwrap();

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(matches!(report.error, Some(ProtocolError::HandshakeTimeout)));
        assert_eq!(report.failed_at, Some(HandshakeState::AwaitClientEphemeral));
        assert_eq!(report.client_id.as_deref(), Some("client1"));
    }

    #[test]
    fn test_deadline_after_saturates() {
        let far = deadline_after(Duration::MAX);
        assert!(far > tokio::time::Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(deadline_after(Duration::from_secs(1)) <= tokio::time::Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_handle_unbounded_deadline() {
        let handler = handler(Duration::from_secs(5), Duration::from_secs(u64::MAX));
        let (_tx, mut shutdown) = watch::channel(false);
        let (mut client_end, mut server_end) = duplex(4096);

        let long_term = KeyPair::from_scalar_hex(CLIENT_SCALAR_HEX).unwrap();
        let client = tokio::spawn(async move {
            InitiatorHandshake::new(b"client1".to_vec(), *long_term.public_key())
                .run(&mut client_end, b"", b"ping")
                .await
        });

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(report.is_completed());
        assert_eq!(client.await.unwrap().unwrap(), DEFAULT_GEM);
    }

    #[tokio::test]
    async fn test_handle_cancelled() {
        let handler = handler(Duration::from_secs(5), Duration::from_secs(5));
        let (tx, mut shutdown) = watch::channel(false);
        let (_client_end, mut server_end) = duplex(64);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(true);
        });

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(matches!(report.error, Some(ProtocolError::Cancelled)));
        assert_eq!(report.state, HandshakeState::Failed);
    }

    #[tokio::test]
    async fn test_handle_request_before_ephemeral() {
        let handler = handler(Duration::from_secs(5), Duration::from_secs(5));
        let (_tx, mut shutdown) = watch::channel(false);
        let (mut client_end, mut server_end) = duplex(256);

        let idc = TlvRecord::message(MessageTag::Idc, b"client1".to_vec()).unwrap();
        let req = TlvRecord::message(MessageTag::Req, vec![0u8; 20]).unwrap();
        write_record(&mut client_end, &idc).await.unwrap();
        write_record(&mut client_end, &req).await.unwrap();

        let report = handler.handle(&mut server_end, peer(), &mut shutdown).await;
        assert!(matches!(
            report.error,
            Some(ProtocolError::UnexpectedTag { expected: MessageTag::EwAg, got: 0x05 })
        ));
        assert_eq!(report.info.records_sent, 0);

        // Nothing but EOF comes back
        assert!(matches!(
            read_record(&mut client_end).await,
            Err(ProtocolError::EndOfStream)
        ));
    }
}
