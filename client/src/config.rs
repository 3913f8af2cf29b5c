//! Endpoint file the client is started with
//!
//! One value per line, in order: server host, server game port, local port
//! (0 picks an ephemeral one) and, optionally, the server's file transfer
//! port. Blank lines and lines starting with `#` are skipped.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {field} on line {line}: {value:?}")]
    Invalid {
        field: &'static str,
        line: usize,
        value: String,
    },
    #[error("unexpected extra line {0}")]
    Extra(usize),
    #[error("could not resolve {0}")]
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub server_host: String,
    pub server_port: u16,
    pub local_port: u16,
    pub transfer_port: Option<u16>,
}

fn port(field: &'static str, line: usize, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field,
        line,
        value: value.to_string(),
    })
}

impl EndpointConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (_, host) = lines.next().ok_or(ConfigError::Missing("server host"))?;
        let (n, server_port) = lines.next().ok_or(ConfigError::Missing("server port"))?;
        let server_port = port("server port", n, server_port)?;
        let (n, local_port) = lines.next().ok_or(ConfigError::Missing("local port"))?;
        let local_port = port("local port", n, local_port)?;
        let transfer_port = match lines.next() {
            Some((n, value)) => Some(port("transfer port", n, value)?),
            None => None,
        };
        if let Some((n, _)) = lines.next() {
            return Err(ConfigError::Extra(n));
        }

        Ok(Self {
            server_host: host.to_string(),
            server_port,
            local_port,
            transfer_port,
        })
    }

    fn resolve(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.server_host, port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4))
            .ok_or(ConfigError::Unresolved(target))
    }

    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.resolve(self.server_port)
    }

    /// `Missing` when the file names no transfer port
    pub fn transfer_addr(&self) -> Result<SocketAddr, ConfigError> {
        let port = self
            .transfer_port
            .ok_or(ConfigError::Missing("transfer port"))?;
        self.resolve(port)
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.local_port))
    }
}
