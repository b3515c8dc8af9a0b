//! Configuration loading for chat-relay.
//!
//! Configuration is loaded from an optional TOML file. Every section and
//! field has a default, so an empty file (or no file at all) yields a relay
//! listening on `0.0.0.0:12345`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration for chat-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the chat listener (default: 0.0.0.0:12345).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How inbound bytes are cut into messages (default: chunk).
    #[serde(default)]
    pub framing: Framing,
}

/// Admission and delivery limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum simultaneously registered connections (default: 0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
    /// Messages queued per peer before further deliveries to it are dropped
    /// (default: 256).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve `/health` and `/metrics` (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Bind address for the HTTP server (default: 127.0.0.1:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

/// Message framing applied by each relay worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One transport read is one message.
    #[default]
    Chunk,
    /// One newline-terminated line is one message.
    Line,
}

impl FromStr for Framing {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chunk" => Ok(Framing::Chunk),
            "line" => Ok(Framing::Line),
            other => Err(ConfigError::Invalid {
                reason: format!("unknown framing '{other}' (expected 'chunk' or 'line')"),
            }),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:12345".to_string()
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_outbound_queue() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            framing: Framing::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_http_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check that every address in the configuration parses and that the
    /// limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.limits.outbound_queue == 0 {
            return Err(ConfigError::Invalid {
                reason: "limits.outbound_queue must be at least 1".to_string(),
            });
        }
        if self.http.enabled {
            self.http_addr()?;
        }
        Ok(())
    }

    /// The chat listener address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server.bind_address", &self.server.bind_address)
    }

    /// The HTTP listener address.
    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("http.bind_address", &self.http.bind_address)
    }

    /// Replace the port of the chat listener, keeping its host.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.bind_addr()?;
        addr.set_port(port);
        self.server.bind_address = addr.to_string();
        Ok(())
    }

    /// Admission limit, `None` when unlimited.
    pub fn max_connections(&self) -> Option<usize> {
        match self.limits.max_connections {
            0 => None,
            n => Some(n),
        }
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        reason: format!("{field}: '{value}' is not a socket address"),
    })
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong with it.
        reason: String,
    },
}
