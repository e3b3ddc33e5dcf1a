//! TCP Listener
//!
//! Binds the responder's listening socket with socket2, then hands it to tokio.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::errors::{ServerError, ServerResult};

/// Listen backlog
const BACKLOG: i32 = 1024;

/// TCP listener for the GemKey responder
pub struct GemListener {
    /// The underlying tokio listener
    listener: TcpListener,
    /// Local address
    local_addr: SocketAddr,
}

impl GemListener {
    /// Bind to the configured address
    pub async fn bind(config: &ServerConfig) -> ServerResult<Self> {
        let addr = config.socket_addr()?;
        Self::bind_addr(addr)
    }

    /// Bind to an explicit address (port 0 picks a free port)
    pub fn bind_addr(addr: SocketAddr) -> ServerResult<Self> {
        let bind_failed = |e: std::io::Error| ServerError::BindFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_failed)?;

        socket.set_reuse_address(true).ok();
        socket.set_nonblocking(true).map_err(bind_failed)?;

        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.listen(BACKLOG).map_err(bind_failed)?;

        // Convert to tokio listener
        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;

        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next connection
    pub async fn accept(&self) -> ServerResult<(TcpStream, SocketAddr)> {
        self.listener.accept().await.map_err(ServerError::Io)
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl std::fmt::Debug for GemListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
