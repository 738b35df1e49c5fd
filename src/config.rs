//! Configuration for the echo server.
//!
//! Raw inputs (flags, `SSH_PASSWORD`, the positional target) are folded with the
//! optional `config.toml` into an immutable [`RunConfig`] once at startup.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::error::EchoError;

/// Port served locally and requested from the remote host when forwarding.
pub const DEFAULT_PORT: u16 = 13337;

/// Credential used when `SSH_PASSWORD` is unset or empty.
pub const DEFAULT_PASSWORD: &str = "root";

/// Remote interface the forwarded listener is bound to.
pub const DEFAULT_FORWARD_HOST: &str = "localhost";

/// Optional on-disk configuration (`config.toml`).
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ssh: SshSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SshSection {
    pub target: Option<String>,
    pub user: Option<String>,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "tunnel-echo")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

/// Values gathered from the command line and environment before resolution.
#[derive(Debug, Default, Clone)]
pub struct Inputs {
    pub local: bool,
    pub target: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

/// Where the listener comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Bind a socket on this machine.
    Local,
    /// Ask `target` to forward a port back over SSH.
    Remote { target: String },
}

/// Immutable run configuration, built once by [`resolve`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    /// Explicit SSH username; the current OS user is used when absent.
    pub username: Option<String>,
    pub password: String,
    pub port: u16,
    /// Interface bound in local mode.
    pub bind_addr: IpAddr,
    /// Remote interface requested in the forward.
    pub forward_host: String,
}

impl RunConfig {
    pub fn ssh_target(&self) -> Option<&str> {
        match &self.mode {
            Mode::Local => None,
            Mode::Remote { target } => Some(target),
        }
    }
}

/// Fold raw inputs and the config file into a [`RunConfig`].
///
/// Command-line and environment values take precedence over the file. No I/O
/// happens here, so a missing target is reported before any socket exists.
pub fn resolve(inputs: Inputs, file: &ConfigFile) -> crate::error::Result<RunConfig> {
    let mode = if inputs.local {
        Mode::Local
    } else {
        let target = inputs
            .target
            .or_else(|| file.ssh.target.clone())
            .filter(|t| !t.is_empty())
            .ok_or(EchoError::MissingTarget)?;
        Mode::Remote { target }
    };

    let password = inputs
        .password
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PASSWORD.to_string());

    Ok(RunConfig {
        mode,
        username: inputs.user.or_else(|| file.ssh.user.clone()),
        password,
        port: inputs.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
        bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        forward_host: DEFAULT_FORWARD_HOST.to_string(),
    })
}
