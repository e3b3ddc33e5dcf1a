//! Server Configuration
//!
//! Configuration types and defaults for the GemKey responder.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use gemkey_protocol::{
    Collaborators, StaticIdentityStore, StaticResponder, DEFAULT_GEM, HANDSHAKE_TIMEOUT_SECS,
    MAX_SEALED_PAYLOAD, READ_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};

/// Public key of the built-in `client1` identity (`x || y`)
pub const DEFAULT_CLIENT_POINT_HEX: &str = "ad613938bdda994986b676098055ba23669c2ecec63f6c456e7cb5631043d3ac\
                                            1e9e0173a21863de60fc80f40d57019c6128eec56bd628081798215d0b46ec7e";

/// Upper bound for either timeout (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// A provisioned client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    /// Identifier sent in IDC
    pub id: String,

    /// Long-term public key, hex `x || y`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Long-term private scalar, hex (test rigs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl ClientEntry {
    /// Client known by its public key
    pub fn with_public_key(id: impl Into<String>, point_hex: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: Some(point_hex.into()),
            private_key: None,
        }
    }

    /// Client known by its private scalar
    pub fn with_private_key(id: impl Into<String>, scalar_hex: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: None,
            private_key: Some(scalar_hex.into()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,

    /// Bind port
    pub bind_port: u16,

    /// Maximum number of concurrent connections
    pub max_clients: usize,

    /// Per-read timeout in milliseconds
    pub read_timeout_ms: u64,

    /// Overall handshake deadline in seconds
    pub handshake_timeout_secs: u64,

    /// Payload returned in GEM
    pub response: String,

    /// Log level
    pub log_level: String,

    /// Provisioned clients
    pub clients: Vec<ClientEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 9999,
            max_clients: 256,
            read_timeout_ms: READ_TIMEOUT_MS,
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
            response: String::from_utf8_lossy(DEFAULT_GEM).into_owned(),
            log_level: "info".to_string(),
            clients: vec![ClientEntry::with_public_key("client1", DEFAULT_CLIENT_POINT_HEX)],
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get the bind socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.bind_port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "invalid bind address {}:{}",
                    self.bind_address, self.bind_port
                ))
            })
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Build the identity store from the client list
    pub fn identity_store(&self) -> Result<StaticIdentityStore, ConfigError> {
        let mut store = StaticIdentityStore::new();
        for client in &self.clients {
            let result = match (&client.public_key, &client.private_key) {
                (Some(point_hex), _) => store.insert_point_hex(client.id.as_str(), point_hex),
                (None, Some(scalar_hex)) => store.insert_scalar_hex(client.id.as_str(), scalar_hex),
                (None, None) => {
                    return Err(ConfigError::InvalidValue(format!(
                        "client {} has no key",
                        client.id
                    )))
                }
            };
            result.map_err(|e| ConfigError::InvalidValue(format!("client {}: {}", client.id, e)))?;
        }
        Ok(store)
    }

    /// Collaborators for every connection: the client list, accept-all
    /// auth and the configured response
    pub fn collaborators(&self) -> Result<Collaborators, ConfigError> {
        let identities = self.identity_store()?;
        Ok(Collaborators::with_identities(identities)
            .handler(StaticResponder::new(self.response.as_bytes())))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_port == 0 {
            return Err(ConfigError::InvalidValue("bind_port cannot be 0".into()));
        }

        if self.max_clients == 0 {
            return Err(ConfigError::InvalidValue("max_clients cannot be 0".into()));
        }

        if self.read_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("read_timeout_ms cannot be 0".into()));
        }

        if self.read_timeout_ms > MAX_TIMEOUT_SECS * 1_000 {
            return Err(ConfigError::InvalidValue(format!(
                "read_timeout_ms must be at most {}",
                MAX_TIMEOUT_SECS * 1_000
            )));
        }

        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "handshake_timeout_secs cannot be 0".into(),
            ));
        }

        if self.handshake_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "handshake_timeout_secs must be at most {}",
                MAX_TIMEOUT_SECS
            )));
        }

        if self.response.len() > MAX_SEALED_PAYLOAD {
            return Err(ConfigError::InvalidValue(format!(
                "response must be at most {} bytes",
                MAX_SEALED_PAYLOAD
            )));
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if !seen.insert(client.id.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate client id {}",
                    client.id
                )));
            }
        }

        self.socket_addr()?;
        self.identity_store()?;
        Ok(())
    }
}

/// Configuration builder
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set bind port
    pub fn bind_port(mut self, port: u16) -> Self {
        self.config.bind_port = port;
        self
    }

    /// Set maximum concurrent connections
    pub fn max_clients(mut self, max: usize) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Set per-read timeout
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set overall handshake deadline
    pub fn handshake_timeout(mut self, secs: u64) -> Self {
        self.config.handshake_timeout_secs = secs;
        self
    }

    /// Set the GEM payload
    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.config.response = response.into();
        self
    }

    /// Replace the client list
    pub fn clients(mut self, clients: Vec<ClientEntry>) -> Self {
        self.config.clients = clients;
        self
    }

    /// Add a client
    pub fn client(mut self, client: ClientEntry) -> Self {
        self.config.clients.push(client);
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
