//! Tunnel Echo
//!
//! Serves a small WebSocket echo application, either on a local port or on a
//! port forwarded from a remote host over SSH.
//!
//! - Local mode (`--local`) binds port 13337 on all interfaces.
//! - Remote mode dials `TARGET`, authenticates with a password (`SSH_PASSWORD`
//!   or the default), and asks the remote host to forward its
//!   `localhost:13337` back through the SSH session.
//!
//! Either way the same HTTP application is served: a page at `/` and the echo
//! socket at `/echo`.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod listener;
mod server;
mod tunnel;

use config::{ConfigFile, Inputs};

#[derive(Parser, Debug)]
#[command(name = "tunnel-echo")]
#[command(author, version, about = "WebSocket echo server, local or through an SSH reverse tunnel")]
struct Cli {
    /// SSH host to forward through (host:port); required unless --local
    target: Option<String>,

    /// Listen locally - do not connect to any host
    #[arg(long)]
    local: bool,

    /// Port to listen on, or to request from the remote host [default: 13337]
    #[arg(short, long)]
    port: Option<u16>,

    /// SSH username (defaults to the current user)
    #[arg(short, long)]
    user: Option<String>,

    /// SSH password
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn inputs(&self) -> Inputs {
        Inputs {
            local: self.local,
            target: self.target.clone(),
            password: self.password.clone(),
            port: self.port,
            user: self.user.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = load_config_file(cli.config.as_deref());
    let config = config::resolve(cli.inputs(), &file)?;

    if let Some(target) = config.ssh_target() {
        info!(%target, port = config.port, "forwarding through SSH host");
    }

    let listener = listener::acquire(&config).await?;

    server::serve(listener, server::router())
        .await
        .context("Webserver exited with error")
}

/// A broken config file is reported and otherwise ignored.
fn load_config_file(path: Option<&std::path::Path>) -> ConfigFile {
    let loaded = match path {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    };

    loaded.unwrap_or_else(|e| {
        warn!("Ignoring config file: {:#}", e);
        ConfigFile::default()
    })
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
