//! Error types for the connection engine.
//!
//! This module defines every error the crate can surface, from
//! configuration validation through socket I/O to service discovery.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use duplex_socket::{Error, Result};
//!
//! fn send(conn: &Connection<BytesCodec>, payload: Bytes) -> Result<()> {
//!     match conn.write(payload) {
//!         Err(Error::Backpressure { .. }) => Ok(()), // caller drops
//!         other => other,
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Bind`] |
//! | Socket I/O | [`Error::Read`], [`Error::Write`] |
//! | Codec | [`Error::Decode`], [`Error::Encode`] |
//! | Callbacks | [`Error::Handler`], [`Error::ConnectRejected`] |
//! | Lifecycle | [`Error::Backpressure`], [`Error::ConnectionClosed`], [`Error::AlreadyRunning`] |
//! | Discovery | [`Error::EndpointNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

/// Boxed error returned by codecs and user callbacks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a connection is built without a required capability
    /// or with an invalid setting. No tasks are started.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Listener could not be opened.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: IoError,
    },

    // ========================================================================
    // Socket I/O Errors
    // ========================================================================
    /// Socket read failed.
    ///
    /// Covers peer EOF and read deadline expiry.
    #[error("Read error: {source}")]
    Read {
        /// Underlying socket error.
        #[source]
        source: IoError,
    },

    /// Socket write failed.
    ///
    /// Covers write deadline expiry.
    #[error("Write error: {source}")]
    Write {
        /// Underlying socket error.
        #[source]
        source: IoError,
    },

    // ========================================================================
    // Codec Errors
    // ========================================================================
    /// Inbound bytes could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description from the codec.
        message: String,
    },

    /// Outbound message could not be encoded.
    #[error("Encode error: {message}")]
    Encode {
        /// Description from the codec.
        message: String,
    },

    // ========================================================================
    // Callback Errors
    // ========================================================================
    /// Message handler reported a failure.
    #[error("Handler error: {message}")]
    Handler {
        /// Description from the handler.
        message: String,
    },

    /// The connect hook refused the socket.
    #[error("Connection rejected: {message}")]
    ConnectRejected {
        /// Description from the hook.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Outbound queue is full.
    ///
    /// Returned synchronously to the writer. Already queued frames are kept.
    #[error("Outbound queue full (capacity {capacity})")]
    Backpressure {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Connection or listener has been shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// `run` was called on a connection that already started.
    #[error("Connection is already running")]
    AlreadyRunning,

    // ========================================================================
    // Discovery Errors
    // ========================================================================
    /// No registered endpoint matches the prefix.
    #[error("No endpoint registered under: {prefix}")]
    EndpointNotFound {
        /// Prefix that was looked up.
        prefix: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error outside the read/write pumps (e.g. socket address queries).
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    #[inline]
    pub fn bind(addr: impl Into<String>, source: IoError) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Creates a read error.
    #[inline]
    pub fn read(source: IoError) -> Self {
        Self::Read { source }
    }

    /// Creates a write error.
    #[inline]
    pub fn write(source: IoError) -> Self {
        Self::Write { source }
    }

    /// Creates a read deadline error.
    #[inline]
    pub fn read_timeout(timeout: Duration) -> Self {
        Self::read(IoError::new(
            ErrorKind::TimedOut,
            format!("no data received within {}ms", millis(timeout)),
        ))
    }

    /// Creates a write deadline error.
    #[inline]
    pub fn write_timeout(timeout: Duration) -> Self {
        Self::write(IoError::new(
            ErrorKind::TimedOut,
            format!("write not completed within {}ms", millis(timeout)),
        ))
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an encode error.
    #[inline]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a connect rejection error.
    #[inline]
    pub fn connect_rejected(message: impl Into<String>) -> Self {
        Self::ConnectRejected {
            message: message.into(),
        }
    }

    /// Creates a backpressure error.
    #[inline]
    pub fn backpressure(capacity: usize) -> Self {
        Self::Backpressure { capacity }
    }

    /// Creates an endpoint not found error.
    #[inline]
    pub fn endpoint_not_found(prefix: impl Into<String>) -> Self {
        Self::EndpointNotFound {
            prefix: prefix.into(),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
#[inline]
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is an I/O deadline expiry.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Read { source } | Self::Write { source } if source.kind() == ErrorKind::TimedOut
        )
    }

    /// Returns `true` if this is a socket read or write error.
    #[inline]
    #[must_use]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }

    /// Returns `true` if this error terminates a connection.
    ///
    /// Backpressure is the only error a writer can simply retry.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Backpressure { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::decode("invalid utf-8");
        assert_eq!(err.to_string(), "Decode error: invalid utf-8");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("codec is required");
        assert_eq!(err.to_string(), "Configuration error: codec is required");
    }

    #[test]
    fn test_backpressure_display() {
        let err = Error::backpressure(32);
        assert_eq!(err.to_string(), "Outbound queue full (capacity 32)");
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::read_timeout(Duration::from_secs(60)).is_timeout());
        assert!(Error::write_timeout(Duration::from_secs(60)).is_timeout());

        let eof = Error::read(IoError::from(ErrorKind::UnexpectedEof));
        assert!(!eof.is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_timeout_message_reports_millis() {
        let err = Error::write_timeout(Duration::from_millis(200));
        assert_eq!(err.to_string(), "Write error: write not completed within 200ms");
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let err = Error::read_timeout(Duration::MAX);
        assert!(err.to_string().contains(&format!("within {}ms", u64::MAX)));
    }

    #[test]
    fn test_is_io_error() {
        assert!(Error::read(IoError::from(ErrorKind::ConnectionReset)).is_io_error());
        assert!(Error::write(IoError::from(ErrorKind::BrokenPipe)).is_io_error());
        assert!(!Error::decode("bad").is_io_error());
    }

    #[test]
    fn test_is_fatal() {
        assert!(!Error::backpressure(1).is_fatal());
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(Error::handler("boom").is_fatal());
    }

    #[test]
    fn test_bind_error_keeps_source() {
        let err = Error::bind("127.0.0.1:1", IoError::from(ErrorKind::AddrInUse));
        assert!(err.to_string().starts_with("Failed to bind 127.0.0.1:1"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotConnected, "socket not connected");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_io_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
