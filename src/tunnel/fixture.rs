//! In-process SSH server for exercising the tunnel without a real host.
//!
//! Accepts a single password, records every password attempt, and honours
//! `tcpip-forward` by binding on 127.0.0.1 and opening a `forwarded-tcpip`
//! channel back to the client for each inbound connection. Sessions can be
//! cut from the server side with [`SshFixture::disconnect_all`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, Disconnect};
use tokio::net::TcpListener;

const HOST_KEY: &str = include_str!("testdata/host_ed25519");

type Attempts = Arc<Mutex<Vec<(String, String)>>>;
type Sessions = Arc<Mutex<Vec<server::Handle>>>;

pub(crate) struct SshFixture {
    pub addr: SocketAddr,
    attempts: Attempts,
    sessions: Sessions,
}

impl SshFixture {
    pub async fn start(password: &str) -> Self {
        Self::spawn(password, true).await
    }

    pub async fn start_refusing_forwards(password: &str) -> Self {
        Self::spawn(password, false).await
    }

    /// `(user, password)` pairs seen by the server, in order.
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Send a disconnect to every client connected so far.
    pub async fn disconnect_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap());
        for handle in sessions {
            let _ = handle
                .disconnect(
                    Disconnect::ByApplication,
                    "fixture shutting down".to_string(),
                    "en".to_string(),
                )
                .await;
        }
    }

    async fn spawn(password: &str, allow_forward: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Arc::new(server::Config {
            keys: vec![host_key()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let attempts = Attempts::default();
        let password = password.to_string();
        let seen = Arc::clone(&attempts);
        let sessions = Sessions::default();
        let live = Arc::clone(&sessions);

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = FixtureHandler {
                    password: password.clone(),
                    allow_forward,
                    attempts: Arc::clone(&seen),
                };
                let config = Arc::clone(&config);
                let live = Arc::clone(&live);

                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, socket, handler).await {
                        live.lock().unwrap().push(session.handle());
                        let _ = session.await;
                    }
                });
            }
        });

        Self {
            addr,
            attempts,
            sessions,
        }
    }
}

/// A loopback address with nothing listening on it.
pub(crate) fn unused_addr() -> SocketAddr {
    let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    spare.local_addr().unwrap()
}

fn host_key() -> PrivateKey {
    russh::keys::decode_secret_key(HOST_KEY, None).unwrap()
}

struct FixtureHandler {
    password: String,
    allow_forward: bool,
    attempts: Attempts,
}

impl server::Handler for FixtureHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.attempts
            .lock()
            .unwrap()
            .push((user.to_string(), password.to_string()));

        if password == self.password {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if !self.allow_forward {
            return Ok(false);
        }

        let handle = session.handle();
        let requested = u16::try_from(*port).unwrap_or(0);
        let listener = TcpListener::bind(("127.0.0.1", requested)).await?;
        let bound = u32::from(listener.local_addr()?.port());
        *port = bound;

        let address = address.to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, peer)) = listener.accept().await {
                let channel: Channel<Msg> = match handle
                    .channel_open_forwarded_tcpip(
                        address.clone(),
                        bound,
                        peer.ip().to_string(),
                        u32::from(peer.port()),
                    )
                    .await
                {
                    Ok(channel) => channel,
                    Err(_) => break,
                };

                tokio::spawn(async move {
                    let mut stream = Box::pin(channel.into_stream());
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut stream).await;
                });
            }
        });

        Ok(true)
    }
}
