use russh::client::{self, Msg, Session};
use russh::keys::PublicKey;
use russh::{Channel, ChannelStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A `forwarded-tcpip` channel opened by the remote host.
pub struct Forwarded {
    pub stream: ChannelStream<Msg>,
    pub originator: String,
}

/// russh callbacks for the tunnel session.
///
/// Every forwarded channel is queued for the [`super::TunnelListener`].
pub struct ClientHandler {
    forwarded_tx: mpsc::UnboundedSender<Forwarded>,
}

impl ClientHandler {
    pub fn new(forwarded_tx: mpsc::UnboundedSender<Forwarded>) -> Self {
        Self { forwarded_tx }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host identity is not verified against known_hosts.
        info!(
            fingerprint = %server_public_key.fingerprint(Default::default()),
            "accepting SSH host key"
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let originator = format!("{}:{}", originator_address, originator_port);
        debug!(
            connected = %format!("{}:{}", connected_address, connected_port),
            originator = %originator,
            "forwarded connection opened"
        );

        let forwarded = Forwarded {
            stream: channel.into_stream(),
            originator,
        };
        if self.forwarded_tx.send(forwarded).is_err() {
            debug!("listener gone, dropping forwarded connection");
        }

        Ok(())
    }
}
