//! SSH reverse tunnel.
//!
//! [`TunnelConnector`] dials the SSH host, authenticates with a password and
//! asks the remote side to forward a port on its loopback interface back
//! through the session. The resulting [`TunnelSession`] turns into a
//! [`TunnelListener`] that yields one stream per forwarded connection.

#[cfg(test)]
pub(crate) mod fixture;
mod handler;

use std::fmt;
use std::sync::Arc;

use russh::client::{self, Msg};
use russh::ChannelStream;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{EchoError, Result};

use handler::{ClientHandler, Forwarded};

/// Opens authenticated SSH sessions with a remote forward.
#[derive(Debug, Clone)]
pub struct TunnelConnector {
    forward_host: String,
    forward_port: u16,
}

impl TunnelConnector {
    pub fn new(forward_host: impl Into<String>, forward_port: u16) -> Self {
        Self {
            forward_host: forward_host.into(),
            forward_port,
        }
    }

    /// Dial `target`, authenticate once as `username`, and request the forward.
    ///
    /// No retries and no timeouts: a stalled handshake blocks the caller.
    pub async fn connect(
        &self,
        target: &str,
        username: &str,
        password: &str,
    ) -> Result<TunnelSession> {
        debug!(%target, "dialing SSH host");
        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| EchoError::Dial {
                target: target.to_string(),
                source,
            })?;

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler::new(forwarded_tx);

        let mut handle = client::connect_stream(config, stream, handler)
            .await
            .map_err(|source| EchoError::Handshake {
                target: target.to_string(),
                source,
            })?;

        info!(%target, user = %username, "SSH connection established");

        let auth = handle
            .authenticate_password(username, password)
            .await
            .map_err(EchoError::Auth)?;

        if !auth.success() {
            return Err(EchoError::AuthRejected {
                user: username.to_string(),
            });
        }

        info!(user = %username, "SSH password authentication successful");

        let bound = handle
            .tcpip_forward(self.forward_host.clone(), u32::from(self.forward_port))
            .await
            .map_err(|source| EchoError::Forward {
                addr: format!("{}:{}", self.forward_host, self.forward_port),
                source,
            })?;

        // The server only reports a port when it picked one for us.
        let forward_port = match u16::try_from(bound) {
            Ok(port) if port != 0 => port,
            _ => self.forward_port,
        };

        Ok(TunnelSession {
            handle,
            forwarded_rx,
            target: target.to_string(),
            forward_host: self.forward_host.clone(),
            forward_port,
        })
    }
}

/// An authenticated SSH connection holding a remote forward.
///
/// Dropping the session closes the connection and the forward with it.
pub struct TunnelSession {
    handle: client::Handle<ClientHandler>,
    forwarded_rx: mpsc::UnboundedReceiver<Forwarded>,
    target: String,
    forward_host: String,
    forward_port: u16,
}

impl TunnelSession {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Port the remote host is listening on for us.
    pub fn forward_port(&self) -> u16 {
        self.forward_port
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Hand the session over to a listener, which keeps it alive.
    pub fn into_listener(self) -> TunnelListener {
        TunnelListener { session: self }
    }
}

/// Accepts connections forwarded by the remote host.
pub struct TunnelListener {
    session: TunnelSession,
}

impl TunnelListener {
    /// Wait for the next forwarded connection.
    ///
    /// Fails with [`EchoError::TunnelClosed`] once the SSH session is gone.
    pub async fn accept(&mut self) -> Result<(ChannelStream<Msg>, String)> {
        match self.session.forwarded_rx.recv().await {
            Some(forwarded) => Ok((forwarded.stream, forwarded.originator)),
            None => {
                debug!(closed = self.session.is_closed(), "forward queue closed");
                Err(EchoError::TunnelClosed)
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.session.forward_port()
    }
}

impl fmt::Display for TunnelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} via {}",
            self.session.forward_host, self.session.forward_port, self.session.target
        )
    }
}
