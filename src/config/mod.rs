//! Server configuration.
//!
//! A [`ServerConfig`] is constructed in code or loaded from a TOML file and
//! handed to [`Server::bind`](crate::server::Server::bind). The core never
//! reads configuration from ambient process state.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("server name must not be empty")]
    EmptyName,

    #[error("invalid server port {port}: must be in 1..=65534 so the control port fits")]
    InvalidPort { port: u16 },
}

/// Configuration for a [`Server`](crate::server::Server).
///
/// The control listener always binds `port + 1`, so `port` must stay below
/// 65535.
///
/// # Examples
///
/// ```
/// use tcpskel::config::ServerConfig;
///
/// let config = ServerConfig::new("echo", 7007);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.primary_addr().port(), 7007);
/// assert_eq!(config.control_addr().port(), 7008);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Human-readable server name, used only for diagnostics.
    pub name: String,
    /// Port for application client connections.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind host for the primary listener. The control listener always binds
    /// all interfaces.
    #[serde(default = "default_host")]
    pub host: IpAddr,
}

fn default_port() -> u16 {
    7007
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl ServerConfig {
    /// Creates a configuration with the given name and port, binding the
    /// primary listener to loopback.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            host: default_host(),
        }
    }

    /// Loads and validates a configuration from a TOML file.
    ///
    /// ```toml
    /// name = "echo"
    /// port = 7007
    /// host = "127.0.0.1"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid TOML, or a validation error
    /// for out-of-range values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyName`] for a blank name and
    /// [`ConfigError::InvalidPort`] for port 0 or 65535 (the control port is
    /// `port + 1` and must be representable).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.port == 0 || self.port == u16::MAX {
            return Err(ConfigError::InvalidPort { port: self.port });
        }
        Ok(())
    }

    /// Socket address of the primary listener.
    pub fn primary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Socket address of the control listener: all interfaces, `port + 1`.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port + 1)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("tcpskel", default_port())
    }
}
