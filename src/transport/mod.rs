//! TCP transport layer.
//!
//! This module owns the sockets: the per-connection engine and the accept
//! loop that feeds it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  accept   ┌──────────────┐  build + run  ┌──────────────────┐
//! │   Server     │──────────►│   Handler    │──────────────►│   Connection     │
//! │ (listener)   │  socket   │ (user code)  │               │ read + write pump│
//! └──────────────┘           └──────────────┘               └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Server::bind` - Open the listening socket
//! 2. `Server::serve` - Hand each accepted socket to the handler
//! 3. `Connection::builder` - Wrap the socket with a codec and callbacks
//! 4. `Connection::run` - Pump data until error, shutdown or cancellation
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Full-duplex connection engine |
//! | `server` | Listener and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Full-duplex connection engine.
pub mod connection;

/// Listener and accept loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, Writer};
pub use server::{Handler, Server};
