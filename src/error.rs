use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("no ssh address specified (pass a target or use --local)")]
    MissingTarget,

    #[error("unable to dial ssh host {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh handshake with {target} failed: {source}")]
    Handshake {
        target: String,
        #[source]
        source: russh::Error,
    },

    #[error("ssh authentication rejected for user {user}")]
    AuthRejected { user: String },

    #[error("ssh authentication failed: {0}")]
    Auth(#[source] russh::Error),

    #[error("unable to forward embedded webserver to {addr}: {source}")]
    Forward {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to determine current user: {0}")]
    CurrentUser(#[source] std::io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("ssh tunnel closed")]
    TunnelClosed,
}

pub type Result<T> = std::result::Result<T, EchoError>;
