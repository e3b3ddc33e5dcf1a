//! GemKey Demo Client
//!
//! Runs one initiator handshake against a GemKey server and prints the
//! decrypted response.
//!
//! ```bash
//! gemkey-client --server 127.0.0.1:9999 --id client1 \
//!     --private-key 1c43912e2471e4cb11ff8d4cee2523f153714a8c241e61fdcfa2224b82fbad5d
//!
//! # public key to paste into the server's `clients` list
//! gemkey-client --private-key <hex> --show-public-key
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use gemkey_crypto::KeyPair;
use gemkey_protocol::InitiatorHandshake;
use tokio::net::TcpStream;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "gemkey-client")]
#[command(version)]
#[command(about = "GemKey demo initiator", long_about = None)]
struct Args {
    /// Server address
    #[arg(short = 's', long, default_value = "127.0.0.1:9999")]
    server: SocketAddr,

    /// Client id sent in IDC
    #[arg(short = 'i', long, default_value = "client1")]
    id: String,

    /// Long-term private scalar, hex
    #[arg(short = 'k', long)]
    private_key: String,

    /// Authentication value
    #[arg(long, default_value = "")]
    auth: String,

    /// Request payload
    #[arg(short = 'r', long, default_value = "ping")]
    request: String,

    /// Overall timeout in seconds
    #[arg(short = 't', long, default_value_t = 30)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Print the public key (hex x || y) for the server's client list and exit
    #[arg(long)]
    show_public_key: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = args.log_level.parse::<Level>().unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let long_term = KeyPair::from_scalar_hex(args.private_key.trim())?;
    if args.show_public_key {
        println!("{}", hex::encode(long_term.public_point_bytes()));
        return Ok(());
    }

    let handshake = InitiatorHandshake::new(args.id.clone().into_bytes(), *long_term.public_key());

    info!("Connecting to {} as {}", args.server, args.id);
    let mut stream = TcpStream::connect(args.server).await?;

    let response = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        handshake.run(&mut stream, args.auth.as_bytes(), args.request.as_bytes()),
    )
    .await??;

    debug!("Received {} response bytes", response.len());
    println!("{}", String::from_utf8_lossy(&response));
    Ok(())
}
