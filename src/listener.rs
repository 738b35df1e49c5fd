//! Listener acquisition.
//!
//! [`acquire`] returns exactly one [`Listener`]: a socket bound on this machine
//! in local mode, or a port forwarded by the SSH host in remote mode. Past
//! this point callers only `accept` and never look at the variant.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use russh::client::Msg;
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::{Mode, RunConfig};
use crate::error::{EchoError, Result};
use crate::tunnel::{TunnelConnector, TunnelListener};

/// A socket bound on this machine.
pub struct LocalListener {
    inner: TcpListener,
    addr: SocketAddr,
}

impl LocalListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| EchoError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        // Port 0 resolves to whatever the OS picked.
        let addr = inner.local_addr().unwrap_or(addr);

        Ok(Self { inner, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept(&mut self) -> Result<(TcpStream, SocketAddr)> {
        let inner = &self.inner;
        accept_retrying(|| inner.accept()).await
    }
}

/// Pause after an accept failure that is not tied to one connection.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// A half-open connection went away before we picked it up.
    Connection,
    /// The process is out of something, usually file descriptors.
    Resources,
    /// The socket is no longer a listening socket.
    Fatal,
}

fn classify(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => AcceptFailure::Connection,
        io::ErrorKind::InvalidInput => AcceptFailure::Fatal,
        // EMFILE and ENFILE have no stable kind of their own.
        _ => AcceptFailure::Resources,
    }
}

/// Run `accept` until it yields a connection or fails for good.
async fn accept_retrying<T, F, Fut>(mut accept: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(e) => match classify(&e) {
                AcceptFailure::Connection => {
                    debug!("dropping connection that failed before accept: {}", e);
                }
                AcceptFailure::Resources => {
                    error!("accept error: {}; retrying in {:?}", e, ACCEPT_BACKOFF);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                AcceptFailure::Fatal => return Err(EchoError::Accept(e)),
            },
        }
    }
}

/// The one active acceptor for this process.
pub enum Listener {
    Local(LocalListener),
    Tunnel(TunnelListener),
}

impl Listener {
    /// Wait for the next inbound connection and the peer it came from.
    pub async fn accept(&mut self) -> Result<(Conn, String)> {
        match self {
            Listener::Local(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Conn::Tcp(stream), peer.to_string()))
            }
            Listener::Tunnel(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Conn::Tunnel(Box::pin(stream)), peer))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Listener::Local(_) => "tcp",
            Listener::Tunnel(_) => "ssh-forward",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Listener::Local(listener) => listener.local_addr().port(),
            Listener::Tunnel(listener) => listener.port(),
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Local(listener) => write!(f, "{}", listener.local_addr()),
            Listener::Tunnel(listener) => write!(f, "{}", listener),
        }
    }
}

/// An accepted byte stream, whichever listener produced it.
pub enum Conn {
    Tcp(TcpStream),
    Tunnel(Pin<Box<ChannelStream<Msg>>>),
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Conn::Tunnel(stream) => stream.as_mut().poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Conn::Tunnel(stream) => stream.as_mut().poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Conn::Tunnel(stream) => stream.as_mut().poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Conn::Tunnel(stream) => stream.as_mut().poll_shutdown(cx),
        }
    }
}

/// Build the listener selected by `config`.
///
/// Local mode never touches SSH. Remote mode makes exactly one connection and
/// one authentication attempt; any failure is returned, not retried.
pub async fn acquire(config: &RunConfig) -> Result<Listener> {
    let listener = match &config.mode {
        Mode::Local => {
            let addr = SocketAddr::new(config.bind_addr, config.port);
            Listener::Local(LocalListener::bind(addr).await?)
        }
        Mode::Remote { target } => {
            let username = match &config.username {
                Some(user) => user.clone(),
                None => current_user()?,
            };

            let connector = TunnelConnector::new(config.forward_host.clone(), config.port);
            let session = connector
                .connect(target, &username, &config.password)
                .await?;
            debug!(target = %session.target(), "tunnel session ready");

            Listener::Tunnel(session.into_listener())
        }
    };

    info!(kind = listener.kind(), addr = %listener, "listening");
    Ok(listener)
}

fn current_user() -> Result<String> {
    whoami::fallible::username().map_err(EchoError::CurrentUser)
}
