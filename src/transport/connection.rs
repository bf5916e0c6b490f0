//! Full-duplex connection engine.
//!
//! A [`Connection`] owns one TCP socket and drives it with two tasks that
//! share a single cancellation scope:
//!
//! ```text
//!            ┌──────────── read pump ────────────┐
//! socket ──► │ pooled buffer → decode → on_message│
//!            └────────────────────────────────────┘
//!            ┌──────────── write pump ───────────┐
//! socket ◄── │ outbound queue (bounded FIFO)      │ ◄── write() / Writer::write()
//!            └────────────────────────────────────┘
//! ```
//!
//! # Termination
//!
//! The first of read error, write error, decode error, encode error, handler
//! error, local shutdown or external cancellation ends the connection. The
//! first fatal error is recorded and returned from [`Connection::run`];
//! anything the sibling pump hits afterwards is swallowed. Once the scope is
//! cancelled no further socket I/O is attempted, and the socket is closed
//! exactly once when both pumps have stopped.
//!
//! # Deadlines
//!
//! The read deadline is twice the heartbeat interval and moves forward only
//! when bytes arrive. Every physical write gets its own deadline of the same
//! length. There is no ping/pong; an idle peer simply surfaces as a
//! timed-out read.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinError;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::config::{ConnectionBuilder, ConnectionOptions};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

// ============================================================================
// Constants
// ============================================================================

/// Stand-in deadline for heartbeats too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ============================================================================
// Shared State
// ============================================================================

/// State shared by the connection, its writers and both pumps.
struct Shared<C: Codec> {
    id: ConnectionId,
    peer: SocketAddr,
    options: ConnectionOptions<C>,
    outbound_tx: mpsc::Sender<Bytes>,
    scope: CancellationToken,
    /// Set by whichever path claims the right to report the terminal error.
    terminating: AtomicBool,
    /// First fatal error, returned from `run`.
    failure: Mutex<Option<Error>>,
}

impl<C: Codec> Shared<C> {
    fn write(&self, message: &C::Message) -> Result<()> {
        if self.scope.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }

        let frame = match self.options.codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                let message = e.to_string();
                self.fail(Error::encode(message.clone()));
                return Err(Error::encode(message));
            }
        };

        let len = frame.len();
        match self.outbound_tx.try_send(frame) {
            // Shutdown raced the enqueue; the write pump may never see the frame.
            Ok(()) if self.scope.is_cancelled() => Err(Error::ConnectionClosed),
            Ok(()) => {
                trace!(id = %self.id, bytes = len, "frame queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                trace!(id = %self.id, "outbound queue full");
                Err(Error::backpressure(self.options.outbound_capacity))
            }
            Err(TrySendError::Closed(_)) => Err(Error::ConnectionClosed),
        }
    }

    /// Claims the terminal slot. Fails once shutdown is underway.
    fn claim(&self) -> bool {
        !self.scope.is_cancelled() && !self.terminating.swap(true, Ordering::AcqRel)
    }

    fn record(&self, err: Error) {
        debug!(id = %self.id, peer = %self.peer, error = %err, "connection failed");
        *self.failure.lock() = Some(err);
        self.scope.cancel();
    }

    /// Terminates the connection on an unconditionally fatal error.
    fn fail(&self, err: Error) {
        if self.claim() {
            self.record(err);
        } else {
            trace!(id = %self.id, error = %err, "error after shutdown ignored");
        }
    }

    /// Terminates the connection on a socket error, consulting `on_error`.
    fn io_failure(&self, err: Error) {
        if !self.claim() {
            trace!(id = %self.id, error = %err, "socket error after shutdown ignored");
            return;
        }

        let terminate = self.options.on_error.as_ref().is_none_or(|callback| callback(&err));
        if !terminate {
            debug!(id = %self.id, error = %err, "error callback asked to continue; terminating anyway");
        }

        self.record(err);
    }

    /// Records a pump panic unless a fatal error is already known.
    fn panicked(&self, pump: &str, err: &JoinError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            warn!(id = %self.id, pump, error = %err, "pump task panicked");
            *failure = Some(Error::handler(format!("{pump} pump panicked")));
        }
    }

    fn shutdown(&self) {
        if !self.scope.is_cancelled() {
            debug!(id = %self.id, "shutdown requested");
        }
        self.scope.cancel();
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Cloneable handle onto a connection's outbound path.
///
/// Passed to the message callback so handlers can reply, and obtainable from
/// [`Connection::writer`] for use on other tasks.
pub struct Writer<C: Codec> {
    shared: Arc<Shared<C>>,
}

impl<C: Codec> Clone for Writer<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Codec> Writer<C> {
    /// Encodes a message and queues it without blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::Backpressure`] if the outbound queue is full
    /// - [`Error::ConnectionClosed`] if the connection has shut down, including
    ///   a shutdown that lands while the frame is being queued; such a frame
    ///   may or may not reach the socket
    /// - [`Error::Encode`] if the codec rejects the message; this also
    ///   terminates the connection
    #[inline]
    pub fn write(&self, message: C::Message) -> Result<()> {
        self.shared.write(&message)
    }

    /// Requests shutdown of the connection. Idempotent.
    #[inline]
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Returns `true` once the connection has shut down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.scope.is_cancelled()
    }

    /// Returns the connection's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.peer
    }
}

impl<C: Codec> fmt::Debug for Writer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A TCP connection driven by a read pump and a write pump.
///
/// Build one with [`Connection::builder()`], then await
/// [`run`](Self::run). Writes may be issued before `run`; they are flushed
/// once the write pump starts.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. Wrap it in an `Arc` to write from other
/// tasks while `run` is pending, or hand out [`Writer`]s.
pub struct Connection<C: Codec> {
    shared: Arc<Shared<C>>,
    local: SocketAddr,
    /// Socket parked until `run` takes it.
    stream: Mutex<Option<TcpStream>>,
    /// Queue consumer parked until `run` takes it.
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    started: AtomicBool,
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl<C: Codec> Connection<C> {
    /// Creates a new connection builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder<C> {
        ConnectionBuilder::new()
    }

    /// Wraps a socket using already validated options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket's addresses cannot be read.
    pub fn new(stream: TcpStream, options: ConnectionOptions<C>) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_capacity);
        let id = ConnectionId::next();

        debug!(%id, %peer, %local, "connection created");

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                peer,
                options,
                outbound_tx,
                scope: CancellationToken::new(),
                terminating: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
            local,
            stream: Mutex::new(Some(stream)),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            started: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl<C: Codec> Connection<C> {
    /// Returns the connection's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Returns the local address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Returns the configuration snapshot.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions<C> {
        &self.shared.options
    }

    /// Returns a new handle onto the outbound path.
    #[inline]
    #[must_use]
    pub fn writer(&self) -> Writer<C> {
        Writer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the number of frames waiting in the outbound queue.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        let tx = &self.shared.outbound_tx;
        tx.max_capacity() - tx.capacity()
    }

    /// Returns `true` once the connection has shut down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.scope.is_cancelled()
    }

    /// Encodes a message and queues it without blocking.
    ///
    /// # Errors
    ///
    /// See [`Writer::write`].
    #[inline]
    pub fn write(&self, message: C::Message) -> Result<()> {
        self.shared.write(&message)
    }

    /// Shuts the connection down. Idempotent.
    ///
    /// A running connection's pumps stop and `run` closes the socket. A
    /// connection that was never run closes its socket here.
    pub fn shutdown(&self) {
        self.shared.shutdown();
        let parked = self.stream.lock().take();
        if parked.is_some() {
            debug!(id = %self.shared.id, "closing socket of idle connection");
        }
    }

    /// Runs the connection until it terminates.
    ///
    /// Starts the read pump and the write pump on separate tasks. Resolves
    /// once both have stopped and the socket is closed.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the connection ended through `cancel`, [`shutdown`](Self::shutdown)
    /// or a [`Writer`]; otherwise the first fatal error.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if `run` was called before
    /// - [`Error::ConnectionClosed`] if the connection was shut down before running,
    ///   or the error that shut it down
    /// - [`Error::ConnectRejected`] if the connect hook refused the socket
    /// - [`Error::Read`] / [`Error::Write`] on socket failure or deadline expiry
    /// - [`Error::Decode`] / [`Error::Encode`] on codec failure
    /// - [`Error::Handler`] if the message callback failed
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        let shared = &self.shared;

        let stream = self.stream.lock().take();
        let outbound_rx = self.outbound_rx.lock().take();
        let (Some(stream), Some(outbound_rx)) = (stream, outbound_rx) else {
            return Err(Error::ConnectionClosed);
        };

        if shared.scope.is_cancelled() {
            return Err(shared.failure.lock().take().unwrap_or(Error::ConnectionClosed));
        }

        if cancel.is_cancelled() {
            shared.shutdown();
            return Ok(());
        }

        if let Some(hook) = &shared.options.on_connect
            && let Err(e) = hook(&stream)
        {
            debug!(id = %shared.id, peer = %shared.peer, error = %e, "connect hook rejected socket");
            shared.scope.cancel();
            return Err(Error::connect_rejected(e.to_string()));
        }

        debug!(id = %shared.id, peer = %shared.peer, "connection running");

        let (reader, writer) = stream.into_split();
        let read_task = tokio::spawn(read_pump(Arc::clone(shared), reader));
        let write_task = tokio::spawn(write_pump(Arc::clone(shared), writer, outbound_rx));

        let pumps = async { tokio::join!(read_task, write_task) };
        tokio::pin!(pumps);

        let finished = tokio::select! {
            joined = &mut pumps => Some(joined),
            () = cancel.cancelled() => None,
        };

        let (read_joined, write_joined) = match finished {
            Some(joined) => joined,
            None => {
                debug!(id = %shared.id, "external cancellation");
                shared.scope.cancel();
                pumps.await
            }
        };

        let reader = read_joined.map_err(|e| shared.panicked("read", &e)).ok();
        let writer = write_joined.map_err(|e| shared.panicked("write", &e)).ok();
        close_socket(reader, writer);

        let failure = shared.failure.lock().take();
        debug!(id = %shared.id, peer = %shared.peer, failed = failure.is_some(), "connection closed");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C: Codec> Drop for Connection<C> {
    fn drop(&mut self) {
        self.shared.scope.cancel();
    }
}

impl<C: Codec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .field("local", &self.local)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Pumps
// ============================================================================

/// Reads, decodes and dispatches inbound data until the scope is cancelled.
///
/// A buffer is borrowed only once the socket reports readable and goes back
/// to the pool as soon as the codec has consumed it, so an idle connection
/// holds none. Bytes the codec leaves behind stay in the buffer for the next
/// read; at most `max_frame_size` of them may be pending at once.
async fn read_pump<C: Codec>(shared: Arc<Shared<C>>, reader: OwnedReadHalf) -> OwnedReadHalf {
    // Leaving the pump for any reason, panics included, ends the connection.
    let _guard = shared.scope.clone().drop_guard();

    let writer = Writer {
        shared: Arc::clone(&shared),
    };
    let options = &shared.options;
    let idle = options.idle_timeout();
    let max_frame = options.max_frame_size;
    let pool = &options.buffer_pool;

    let mut pending: Option<BytesMut> = None;
    let mut deadline = deadline_after(idle);

    while !shared.scope.is_cancelled() {
        let ready = tokio::select! {
            biased;
            () = shared.scope.cancelled() => break,
            ready = timeout_at(deadline, reader.readable()) => ready,
        };

        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shared.io_failure(Error::read(e));
                break;
            }
            Err(_elapsed) => {
                shared.io_failure(Error::read_timeout(idle));
                break;
            }
        }

        let mut buf = pending.take().unwrap_or_else(|| pool.get());
        let room = max_frame.saturating_sub(buf.len());
        buf.reserve(room);

        let read = reader.try_read_buf(&mut (&mut buf).limit(room));
        let keep_going = match read {
            Ok(0) => {
                shared.io_failure(Error::read(IoError::new(
                    ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )));
                false
            }
            Ok(n) => {
                deadline = deadline_after(idle);
                trace!(id = %shared.id, bytes = n, "read");
                dispatch(&shared, &writer, &mut buf) && within_frame_limit(&shared, &buf)
            }
            // Spurious readiness; the deadline stays where it was.
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(e) => {
                shared.io_failure(Error::read(e));
                false
            }
        };

        if keep_going && !buf.is_empty() {
            pending = Some(buf);
        } else {
            pool.put(buf);
        }

        if !keep_going {
            break;
        }
    }

    if let Some(buf) = pending {
        pool.put(buf);
    }

    reader
}

/// Decodes every complete message in `buf` and hands each to `on_message`.
fn dispatch<C: Codec>(shared: &Shared<C>, writer: &Writer<C>, buf: &mut BytesMut) -> bool {
    while !shared.scope.is_cancelled() {
        let message = match shared.options.codec.decode(buf) {
            Ok(Some(message)) => message,
            Ok(None) => return true,
            Err(e) => {
                shared.fail(Error::decode(e.to_string()));
                return false;
            }
        };

        if let Err(e) = (shared.options.on_message)(message, writer) {
            shared.fail(Error::handler(e.to_string()));
            return false;
        }
    }

    false
}

/// Fails the connection if undecoded bytes fill a whole frame.
fn within_frame_limit<C: Codec>(shared: &Shared<C>, buf: &BytesMut) -> bool {
    let max_frame = shared.options.max_frame_size;
    if buf.len() < max_frame {
        return true;
    }

    shared.fail(Error::decode(format!(
        "no complete message within {max_frame} bytes"
    )));
    false
}

/// Returns `now + idle`, or a far-future instant if that overflows.
fn deadline_after(idle: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(idle).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Writes queued frames in FIFO order until the scope is cancelled.
async fn write_pump<C: Codec>(
    shared: Arc<Shared<C>>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
) -> OwnedWriteHalf {
    let _guard = shared.scope.clone().drop_guard();

    let idle = shared.options.idle_timeout();

    loop {
        let frame = tokio::select! {
            biased;
            () = shared.scope.cancelled() => None,
            frame = outbound.recv() => frame,
        };

        let Some(frame) = frame else {
            break;
        };

        let written = tokio::select! {
            biased;
            () = shared.scope.cancelled() => None,
            written = timeout(idle, writer.write_all(&frame)) => Some(written),
        };

        match written {
            None => break,
            Some(Ok(Ok(()))) => {
                trace!(id = %shared.id, bytes = frame.len(), "frame written");
            }
            Some(Ok(Err(e))) => {
                shared.io_failure(Error::write(e));
                break;
            }
            Some(Err(_elapsed)) => {
                shared.io_failure(Error::write_timeout(idle));
                break;
            }
        }
    }

    writer
}

/// Closes the socket. Both halves are dropped here and nowhere else.
fn close_socket(reader: Option<OwnedReadHalf>, writer: Option<OwnedWriteHalf>) {
    match (reader, writer) {
        (Some(reader), Some(writer)) => match reader.reunite(writer) {
            Ok(stream) => drop(stream),
            Err(e) => warn!(error = %e, "socket halves did not match"),
        },
        // A panicked pump already dropped its half; dropping the other
        // releases the socket.
        (reader, writer) => {
            drop(reader);
            drop(writer);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
