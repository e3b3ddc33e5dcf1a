//! GemKey Server Binary
//!
//! Command-line interface for running the GemKey responder.
//!
//! ## Usage
//!
//! ```bash
//! gemkey-server --port 9999 --max-clients 256
//! gemkey-server --config gemkey.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gemkey_server::{ConfigError, GemServer, ServerConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// GemKey Server - blinded P-256 handshake responder
#[derive(Parser, Debug)]
#[command(name = "gemkey-server")]
#[command(version)]
#[command(about = "GemKey handshake responder", long_about = None)]
struct Args {
    /// Bind address
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    address: String,

    /// Bind port
    #[arg(short = 'p', long, default_value_t = 9999)]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long, default_value_t = 256)]
    max_clients: usize,

    /// Per-read timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    read_timeout_ms: u64,

    /// Configuration file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Generate sample configuration file
    #[arg(long)]
    generate_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(path) = &args.generate_config {
        let config = ServerConfig::default();
        config.save_to_file(path)?;
        println!("Generated sample configuration at: {}", path.display());
        return Ok(());
    }

    let config = resolve_config(&args)?;

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(parse_level(&config.log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    if let Some(config_path) = &args.config {
        info!("Loaded configuration from: {}", config_path.display());
    }
    info!("GemKey server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Bind: {}:{}", config.bind_address, config.bind_port);
    info!("  Max clients: {}", config.max_clients);
    info!("  Read timeout: {:?}", config.read_timeout());
    info!("  Handshake timeout: {:?}", config.handshake_timeout());
    info!("  Provisioned clients: {}", config.clients.len());

    let server = Arc::new(GemServer::new(config)?);

    // Handle Ctrl+C
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_server.stop();
    });

    match server.start().await {
        Ok(()) => {
            let stats = server.stats();
            info!(
                "Server stopped gracefully ({} accepted, {} completed, {} failed, {} rejected)",
                stats.accepted, stats.completed, stats.failed, stats.rejected
            );
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}

/// Config file if given, otherwise the command-line settings. An explicit
/// `--log-level` wins over the file.
fn resolve_config(args: &Args) -> Result<ServerConfig, ConfigError> {
    match &args.config {
        Some(config_path) => {
            let mut config = ServerConfig::load_from_file(config_path)?;
            if let Some(level) = &args.log_level {
                config.log_level = level.clone();
            }
            config.validate()?;
            Ok(config)
        }
        None => ServerConfig::builder()
            .bind_address(&args.address)
            .bind_port(args.port)
            .max_clients(args.max_clients)
            .read_timeout_ms(args.read_timeout_ms)
            .log_level(args.log_level.as_deref().unwrap_or("info"))
            .build(),
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
