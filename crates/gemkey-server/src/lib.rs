//! # GemKey Server
//!
//! TCP responder for the GemKey handshake.
//!
//! ## Features
//!
//! - One task per accepted connection, one handshake per connection
//! - Per-read timeout and overall handshake deadline
//! - Concurrent connection cap; excess connections are closed on accept
//! - Graceful shutdown that cancels in-flight handshakes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     GemServer                        │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────────┐              │
//! │  │ GemListener │──▶│ ConnectionHandler│ (per task)   │
//! │  │ (socket2)   │   │  timeouts/cancel │              │
//! │  └─────────────┘   └────────┬─────────┘              │
//! │                             ▼                        │
//! │                  ┌────────────────────┐              │
//! │                  │ ResponderHandshake │              │
//! │                  │ + Collaborators    │              │
//! │                  └────────────────────┘              │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod listener;
pub mod connection;
pub mod errors;

pub use config::*;
pub use listener::*;
pub use connection::*;
pub use errors::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::listener::*;
    pub use crate::connection::*;
    pub use crate::errors::*;
}

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use gemkey_protocol::Collaborators;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// GemKey responder server
pub struct GemServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared per-connection driver
    handler: ConnectionHandler,
    /// Running state
    running: AtomicBool,
    /// Shutdown broadcast to the accept loop and in-flight handshakes
    shutdown: watch::Sender<bool>,
    /// Concurrent connection cap
    limiter: Arc<Semaphore>,
    counters: Arc<StatsCounters>,
}

impl GemServer {
    /// Create a server from configuration
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let handler = ConnectionHandler::from_config(&config)?;
        Ok(Self::with_handler(config, handler))
    }

    /// Create a server with custom collaborators
    pub fn with_collaborators(config: ServerConfig, collaborators: Collaborators) -> Self {
        let handler = ConnectionHandler::new(
            collaborators,
            config.read_timeout(),
            config.handshake_timeout(),
        );
        Self::with_handler(config, handler)
    }

    fn with_handler(config: ServerConfig, handler: ConnectionHandler) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            limiter: Arc::new(Semaphore::new(config.max_clients)),
            config,
            handler,
            running: AtomicBool::new(false),
            shutdown,
            counters: Arc::new(StatsCounters::default()),
        }
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Check if server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the configured listening socket
    pub async fn bind(&self) -> ServerResult<GemListener> {
        GemListener::bind(&self.config).await
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> ServerResult<()> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }

        info!(
            "Starting GemKey server on {}:{}",
            self.config.bind_address, self.config.bind_port
        );

        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener
    ///
    /// Returns after [`stop`](Self::stop), once every in-flight handshake
    /// has finished or been cancelled.
    pub async fn serve(&self, listener: GemListener) -> ServerResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::AlreadyRunning);
        }
        info!("Listening on {}, ready for connections", listener.local_addr());

        let mut stop = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = connection::cancelled(&mut stop) => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(&mut tasks, stream, peer),
                    Err(e) => warn!("Error accepting connection: {}", e),
                },
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight handshakes", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("GemKey server stopped");
        Ok(())
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        let permit = match Arc::clone(&self.limiter).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Connection limit ({}) reached, closing {}",
                    self.config.max_clients, peer
                );
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        debug!("Accepted connection from {}", peer);
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);

        let handler = self.handler.clone();
        let counters = Arc::clone(&self.counters);
        let mut shutdown = self.shutdown.subscribe();

        tasks.spawn(async move {
            let _permit = permit;
            let mut tally = Tally::new(counters);
            let mut stream = stream;
            let report = handler.handle(&mut stream, peer, &mut shutdown).await;
            tally.completed = report.is_completed();
        });
    }

    /// Stop the server and cancel in-flight handshakes
    ///
    /// A stopped server stays stopped; build a new one to serve again.
    pub fn stop(&self) {
        info!("Stopping GemKey server");
        self.shutdown.send_replace(true);
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    active: AtomicUsize,
}

impl StatsCounters {
    fn finish(&self, completed: bool) {
        if completed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServerStats {
        ServerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Settles one accepted connection in the counters when dropped
///
/// A task that unwinds before `completed` is set counts as failed.
struct Tally {
    counters: Arc<StatsCounters>,
    completed: bool,
}

impl Tally {
    fn new(counters: Arc<StatsCounters>) -> Self {
        Self {
            counters,
            completed: false,
        }
    }
}

impl Drop for Tally {
    fn drop(&mut self) {
        self.counters.finish(self.completed);
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!("Connection task panicked: {}", e);
        } else {
            debug!("Connection task ended early: {}", e);
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections handed to a handshake task
    pub accepted: u64,
    /// Handshakes that reached `Done`
    pub completed: u64,
    /// Handshakes that ended in `Failed`
    pub failed: u64,
    /// Connections closed at the connection cap
    pub rejected: u64,
    /// Handshakes in flight
    pub active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_server_creation() {
        let server = GemServer::new(ServerConfig::default()).unwrap();
        assert!(!server.is_running());
        assert_eq!(server.stats(), ServerStats::default());
    }

    #[test]
    fn test_server_rejects_bad_client_key() {
        let config = ServerConfig {
            clients: vec![ClientEntry::with_public_key("bad", "zz")],
            ..Default::default()
        };
        assert!(matches!(GemServer::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_tally_settles_on_unwind() {
        let counters = Arc::new(StatsCounters::default());
        counters.active.fetch_add(2, Ordering::Relaxed);

        let done = Tally::new(Arc::clone(&counters));
        let finished = tokio::spawn(async move {
            let mut tally = done;
            tally.completed = true;
        });
        finished.await.unwrap();

        let unwound = Tally::new(Arc::clone(&counters));
        let panicked = tokio::spawn(async move {
            let _tally = unwound;
            panic!("collaborator failure");
        });
        let joined = panicked.await;
        assert!(joined.as_ref().is_err_and(|e| e.is_panic()));
        reap(joined);

        let stats = counters.snapshot();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_stop_ends_serve() {
        let server = Arc::new(GemServer::new(test_config()).unwrap());
        let listener = server.bind().await.unwrap();

        let running = Arc::clone(&server);
        let serve = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(server.is_running());

        server.stop();
        serve.await.unwrap().unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_serve_twice_is_rejected() {
        let server = Arc::new(GemServer::new(test_config()).unwrap());
        let first = server.bind().await.unwrap();
        let second = server.bind().await.unwrap();

        let running = Arc::clone(&server);
        let serve = tokio::spawn(async move { running.serve(first).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            server.serve(second).await,
            Err(ServerError::AlreadyRunning)
        ));

        server.stop();
        serve.await.unwrap().unwrap();
    }
}
