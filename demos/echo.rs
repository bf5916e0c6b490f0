//! Echo server.
//!
//! Accepts TCP connections and writes every chunk it reads straight back.
//! The server announces itself in an in-process registry and stops on Ctrl+C.
//!
//! Usage: cargo run --example echo -- [--debug] [--addr 127.0.0.1:12345]
//!
//! Try it with: nc 127.0.0.1 12345

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use duplex_socket::{
    BytesCodec, CancellationToken, Connection, Endpoint, Error, MemoryRegistry, Registrar,
    Result, SERVICE_PREFIX, Server,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ADDR: &str = "127.0.0.1:12345";
const IDENTITY: &str = "echo-1";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    addr: String,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let addr = args
            .iter()
            .position(|a| a == "--addr")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            addr,
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "duplex_socket=debug,echo=debug"
    } else {
        "duplex_socket=info,echo=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Runs one echo connection to completion.
async fn echo(stream: TcpStream, shutdown: CancellationToken) {
    let connection = Connection::builder()
        .codec(BytesCodec)
        .heartbeat(Duration::from_secs(30))
        .on_message(|message, writer| {
            writer.write(message)?;
            Ok(())
        })
        .on_error(|err: &Error| {
            if err.is_timeout() {
                info!("peer idle for too long");
            } else {
                debug!(error = %err, "socket error");
            }
            true
        })
        .build(stream);

    let connection = match connection {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "failed to set up connection");
            return;
        }
    };

    let id = connection.id();
    let peer = connection.remote_addr();
    info!(%id, %peer, "client connected");

    match connection.run(shutdown).await {
        Ok(()) => info!(%id, "client disconnected"),
        Err(e) => info!(%id, error = %e, "client dropped"),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let server = Arc::new(Server::bind(args.addr.as_str()).await?);
    let registry = MemoryRegistry::new();
    registry
        .register(&Endpoint::new(IDENTITY, server.local_addr()))
        .await?;

    let found = registry.discover(SERVICE_PREFIX).await?;
    info!(identity = %found.identity, addr = %found.addr, "echo server ready");

    let shutdown = CancellationToken::new();

    let serve = tokio::spawn({
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        async move {
            server
                .serve(move |stream: TcpStream| echo(stream, shutdown.child_token()))
                .await
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
    }

    info!("shutting down");
    server.close();
    shutdown.cancel();
    registry.deregister(IDENTITY).await?;

    match serve.await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "accept loop panicked");
            Ok(())
        }
    }
}
