//! Validated connection settings.
//!
//! [`ConnectionOptions`] is produced by
//! [`ConnectionBuilder::options`](super::ConnectionBuilder::options) and is
//! never mutated afterwards.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::codec::Codec;
use crate::error::{BoxError, Error};
use crate::pool::BufferPool;
use crate::transport::Writer;

// ============================================================================
// Constants
// ============================================================================

/// Default outbound queue capacity, in frames.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Default upper bound on a single read, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

// ============================================================================
// Callback Types
// ============================================================================

/// Inbound message callback.
///
/// Receives each decoded message in arrival order together with a
/// [`Writer`] for replying. Returning an error terminates the connection.
pub type OnMessage<C> =
    Arc<dyn Fn(<C as Codec>::Message, &Writer<C>) -> Result<(), BoxError> + Send + Sync>;

/// Socket error callback.
///
/// Called once with the read or write error that ends the connection.
/// The return value says whether the callback wants the connection torn
/// down; the engine terminates either way.
pub type OnError = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Connect hook, run before the pumps start. An error rejects the socket.
pub type OnConnect = Arc<dyn Fn(&TcpStream) -> Result<(), BoxError> + Send + Sync>;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Immutable configuration snapshot of one connection.
pub struct ConnectionOptions<C: Codec> {
    pub(crate) codec: C,
    pub(crate) on_message: OnMessage<C>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_connect: Option<OnConnect>,
    pub(crate) outbound_capacity: usize,
    pub(crate) max_frame_size: usize,
    pub(crate) heartbeat: Duration,
    pub(crate) buffer_pool: BufferPool,
}

impl<C: Codec> ConnectionOptions<C> {
    /// Returns the codec.
    #[inline]
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns the outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Returns the maximum number of undecoded bytes buffered at once.
    #[inline]
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Returns the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Returns the I/O deadline applied to every read and write.
    ///
    /// Two missed heartbeat windows mean the peer is considered dead.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat.saturating_mul(2)
    }

    /// Returns the pool read buffers are borrowed from.
    #[inline]
    #[must_use]
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    /// Returns `true` if an error callback is installed.
    #[inline]
    #[must_use]
    pub fn has_error_callback(&self) -> bool {
        self.on_error.is_some()
    }

    /// Returns `true` if a connect hook is installed.
    #[inline]
    #[must_use]
    pub fn has_connect_hook(&self) -> bool {
        self.on_connect.is_some()
    }
}

impl<C: Codec + fmt::Debug> fmt::Debug for ConnectionOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("codec", &self.codec)
            .field("on_error", &self.on_error.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("outbound_capacity", &self.outbound_capacity)
            .field("max_frame_size", &self.max_frame_size)
            .field("heartbeat", &self.heartbeat)
            .field("buffer_pool", &self.buffer_pool)
            .finish()
    }
}
