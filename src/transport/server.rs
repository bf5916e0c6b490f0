//! Protocol-agnostic TCP accept loop.
//!
//! The server knows nothing about codecs or callbacks. It accepts sockets
//! and hands each one to a [`Handler`] on its own task; all protocol wiring
//! happens inside the handler, typically by building a
//! [`Connection`](crate::Connection) and awaiting its `run`.
//!
//! # Connection Flow
//!
//! 1. [`Server::bind`] opens the listening socket
//! 2. [`Server::serve`] accepts until [`Server::close`] is called
//! 3. Each accepted socket is passed to [`Handler::handle`] on a new task
//! 4. [`Server::close`] closes the listener; dispatched connections live on

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

// ============================================================================
// Handler
// ============================================================================

/// Receives every accepted socket.
///
/// Invoked once per connection on a dedicated task, so a slow handler never
/// delays later accepts. Closures `Fn(TcpStream) -> impl Future<Output = ()>`
/// implement this trait.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Takes ownership of an accepted socket.
    async fn handle(&self, stream: TcpStream);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, stream: TcpStream) {
        (self)(stream).await;
    }
}

// ============================================================================
// Server
// ============================================================================

/// A bound TCP listener that dispatches accepted sockets to a [`Handler`].
///
/// # Example
///
/// ```ignore
/// let server = Server::bind("127.0.0.1:12345").await?;
/// server.serve(|stream: TcpStream| async move {
///     // build a Connection and run it
/// }).await?;
/// ```
pub struct Server {
    /// Listening socket, parked until `serve` takes it.
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    closed: CancellationToken,
}

impl Server {
    /// Opens a listening socket.
    ///
    /// Use port 0 to let the OS pick a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn bind<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + Display,
    {
        let requested = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::bind(requested.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::bind(requested, e))?;

        debug!(%local_addr, "listener bound");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            closed: CancellationToken::new(),
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Accepts connections until [`close`](Self::close) is called.
    ///
    /// Accept errors are logged and retried after yielding; they never end
    /// the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the listener was already
    /// closed or is being served by another call.
    pub async fn serve<H: Handler>(&self, handler: H) -> Result<()> {
        let listener = self.listener.lock().take().ok_or(Error::ConnectionClosed)?;
        let handler = Arc::new(handler);

        info!(addr = %self.local_addr, "accepting connections");

        loop {
            let accepted = tokio::select! {
                biased;
                () = self.closed.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handler.handle(stream).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed; retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        drop(listener);
        info!(addr = %self.local_addr, "listener closed");

        Ok(())
    }

    /// Closes the listening socket. Idempotent.
    ///
    /// Connections already handed to the handler are not touched.
    pub fn close(&self) {
        self.closed.cancel();
        if self.listener.lock().take().is_some() {
            info!(addr = %self.local_addr, "listener closed before serving");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_bind_random_port() {
        let server = Server::bind("127.0.0.1:0").await.expect("bind should succeed");
        assert!(server.local_addr().port() > 0);
        assert!(!server.is_closed());
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let first = Server::bind("127.0.0.1:0").await.expect("bind should succeed");
        let addr = first.local_addr();

        let err = Server::bind(addr).await.unwrap_err();
        match err {
            Error::Bind { addr: requested, .. } => assert_eq!(requested, addr.to_string()),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_dispatches_each_socket() {
        let server = Arc::new(Server::bind("127.0.0.1:0").await.expect("bind"));
        let addr = server.local_addr();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let serve = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve(move |stream: TcpStream| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(stream.peer_addr().ok());
                            // Hold the socket; a stuck handler must not block accepts.
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    })
                    .await
            }
        });

        let first = TcpStream::connect(addr).await.expect("connect");
        let second = TcpStream::connect(addr).await.expect("connect");

        let seen_first = timeout(TEST_TIMEOUT, rx.recv()).await.expect("first dispatch");
        let seen_second = timeout(TEST_TIMEOUT, rx.recv()).await.expect("second dispatch");
        let mut seen = vec![seen_first.flatten(), seen_second.flatten()];
        seen.sort();
        let mut expected = vec![first.local_addr().ok(), second.local_addr().ok()];
        expected.sort();
        assert_eq!(seen, expected);

        server.close();
        let result = timeout(TEST_TIMEOUT, serve).await.expect("serve hung").expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_leaves_dispatched_connections_alone() {
        let server = Arc::new(Server::bind("127.0.0.1:0").await.expect("bind"));
        let addr = server.local_addr();

        let serve = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve(|mut stream: TcpStream| async move {
                        let mut buf = [0u8; 64];
                        while let Ok(n) = stream.read(&mut buf).await {
                            if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    })
                    .await
            }
        });

        let mut client = TcpStream::connect(addr).await.expect("connect");
        client.write_all(b"before").await.expect("send");
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.expect("echo");
        assert_eq!(&buf, b"before");

        server.close();
        let result = timeout(TEST_TIMEOUT, serve).await.expect("serve hung").expect("join");
        assert!(result.is_ok());
        assert!(server.is_closed());

        client.write_all(b"after!").await.expect("send after close");
        client.read_exact(&mut buf).await.expect("echo after close");
        assert_eq!(&buf, b"after!");

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_after_close_fails() {
        let server = Server::bind("127.0.0.1:0").await.expect("bind");
        server.close();
        server.close();

        let result = server.serve(|_stream: TcpStream| async {}).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
