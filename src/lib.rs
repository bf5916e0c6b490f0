//! Duplex Socket - Full-duplex TCP connection engine.
//!
//! This library wraps a TCP socket in a [`Connection`] that reads and writes
//! concurrently, converts between wire bytes and messages through a
//! pluggable [`Codec`], and shuts down exactly once no matter which side of
//! the pipeline fails first.
//!
//! # Architecture
//!
//! Each connection is driven by two tasks sharing one cancellation scope:
//!
//! - **Read pump**: socket → pooled buffer → [`Codec::decode`] → `on_message`
//! - **Write pump**: bounded outbound queue → socket, in FIFO order
//!
//! Key design principles:
//!
//! - Writes never block: a full queue returns [`Error::Backpressure`]
//! - Every read and write carries a deadline of twice the heartbeat interval
//! - The first fatal error wins; the sibling pump stops quietly
//! - The socket is closed once, after both pumps have stopped
//!
//! # Quick Start
//!
//! ```no_run
//! use duplex_socket::{BytesCodec, CancellationToken, Connection, Result, Server};
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::bind("127.0.0.1:12345").await?;
//!
//!     server
//!         .serve(|stream: TcpStream| async move {
//!             let connection = Connection::builder()
//!                 .codec(BytesCodec)
//!                 .on_message(|message, writer| {
//!                     writer.write(message)?;
//!                     Ok(())
//!                 })
//!                 .build(stream);
//!
//!             if let Ok(connection) = connection {
//!                 let _ = connection.run(CancellationToken::new()).await;
//!             }
//!         })
//!         .await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | [`Codec`] trait and stock codecs |
//! | [`config`] | [`ConnectionBuilder`] and [`ConnectionOptions`] |
//! | [`discovery`] | [`Registrar`] trait and [`MemoryRegistry`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`pool`] | Reusable read buffers |
//! | [`transport`] | [`Connection`] engine and [`Server`] accept loop |

// ============================================================================
// Modules
// ============================================================================

/// Wire codecs.
///
/// Implement [`Codec`] to plug a protocol into the engine.
pub mod codec;

/// Connection configuration.
///
/// Use [`Connection::builder()`] to create a configured connection.
pub mod config;

/// Service discovery.
pub mod discovery;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Reusable read buffers shared across connections.
pub mod pool;

/// TCP transport layer.
///
/// Connection engine and listener.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Codec types
pub use codec::{BytesCodec, Codec, Utf8Codec};

// Configuration types
pub use config::{ConnectionBuilder, ConnectionOptions};

// Discovery types
pub use discovery::{Endpoint, MemoryRegistry, Registrar, SERVICE_PREFIX};

// Error types
pub use error::{BoxError, Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Buffer pool
pub use pool::BufferPool;

// Transport types
pub use transport::{Connection, Handler, Server, Writer};

// Cancellation scope accepted by `Connection::run`
pub use tokio_util::sync::CancellationToken;
