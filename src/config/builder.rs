//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and creating
//! [`Connection`](crate::Connection) instances.
//!
//! # Example
//!
//! ```no_run
//! use duplex_socket::{Connection, Utf8Codec};
//! use tokio::net::TcpStream;
//!
//! # async fn example() -> duplex_socket::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:12345").await?;
//!
//! let connection = Connection::builder()
//!     .codec(Utf8Codec)
//!     .on_message(|text: String, writer| {
//!         writer.write(text.to_uppercase())?;
//!         Ok(())
//!     })
//!     .build(stream)?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::codec::Codec;
use crate::error::{BoxError, Error, Result};
use crate::pool::BufferPool;
use crate::transport::{Connection, Writer};

use super::options::{
    ConnectionOptions, DEFAULT_HEARTBEAT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOUND_CAPACITY,
    OnConnect, OnError, OnMessage,
};

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder. The codec and the
/// message callback are required; everything else has a default.
pub struct ConnectionBuilder<C: Codec> {
    codec: Option<C>,
    on_message: Option<OnMessage<C>>,
    on_error: Option<OnError>,
    on_connect: Option<OnConnect>,
    outbound_capacity: usize,
    max_frame_size: usize,
    heartbeat: Duration,
    buffer_pool: Option<BufferPool>,
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl<C: Codec> ConnectionBuilder<C> {
    /// Creates a builder with default settings and no codec or callbacks.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            codec: None,
            on_message: None,
            on_error: None,
            on_connect: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            heartbeat: DEFAULT_HEARTBEAT,
            buffer_pool: None,
        }
    }

    /// Sets the wire codec.
    #[inline]
    #[must_use]
    pub fn codec(mut self, codec: C) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Sets the inbound message callback.
    #[inline]
    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(C::Message, &Writer<C>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Sets the socket error callback.
    #[inline]
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Sets the hook run against the raw socket before the pumps start.
    #[inline]
    #[must_use]
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TcpStream) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Sets the outbound queue capacity, in frames.
    #[inline]
    #[must_use]
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the maximum number of undecoded bytes buffered at once.
    ///
    /// A codec that still has no complete message once this many bytes are
    /// pending fails the connection with [`Error::Decode`].
    #[inline]
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the heartbeat interval. I/O idle for twice this long fails.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Uses a private buffer pool instead of the process-wide one.
    #[inline]
    #[must_use]
    pub fn buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Validates the configuration and freezes it.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the codec or message callback is missing
    /// - [`Error::Config`] if the outbound capacity or max frame size is zero
    pub fn options(self) -> Result<ConnectionOptions<C>> {
        let codec = self.codec.ok_or_else(|| {
            Error::config(
                "Codec is required. Use .codec() to set it.\n\
                 Example: Connection::builder().codec(BytesCodec)",
            )
        })?;

        let on_message = self.on_message.ok_or_else(|| {
            Error::config(
                "Message callback is required. Use .on_message() to set it; \
                 without it inbound data has no consumer.",
            )
        })?;

        if self.outbound_capacity == 0 {
            return Err(Error::config("Outbound capacity must be at least 1"));
        }

        if self.max_frame_size == 0 {
            return Err(Error::config("Max frame size must be at least 1 byte"));
        }

        if self.heartbeat.is_zero() {
            return Err(Error::config("Heartbeat interval must be non-zero"));
        }

        Ok(ConnectionOptions {
            codec,
            on_message,
            on_error: self.on_error,
            on_connect: self.on_connect,
            outbound_capacity: self.outbound_capacity,
            max_frame_size: self.max_frame_size,
            heartbeat: self.heartbeat,
            buffer_pool: self.buffer_pool.unwrap_or_else(BufferPool::shared),
        })
    }

    /// Validates the configuration and wraps the socket in a [`Connection`].
    ///
    /// No tasks are started until [`Connection::run`] is awaited.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] as described in [`options`](Self::options)
    /// - [`Error::Io`] if the socket's addresses cannot be read
    pub fn build(self, stream: TcpStream) -> Result<Connection<C>> {
        let options = self.options()?;
        Connection::new(stream, options)
    }
}

impl<C: Codec> Default for ConnectionBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
