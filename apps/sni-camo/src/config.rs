//! Proxy configuration.
use core_oob::PeerAddress;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Client-facing listener, `host:port`
    pub local_proxy_addr: String,
    /// OOB listener port, also the port dialed on every peer
    pub oob_port: u16,
    /// Candidate peers, tried in order
    pub oob_peers: Vec<PeerAddress>,
    /// Server name presented on the relay's outbound TLS connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake_sni: Option<String>,

    #[serde(default = "default_oob_listen_addr")]
    pub oob_listen_addr: String,

    // Timeouts (milliseconds)
    #[serde(default = "default_oob_timeout_ms")]
    pub oob_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,
}

fn default_oob_listen_addr() -> String {
    "[::]".to_string()
}

fn default_oob_timeout_ms() -> u64 {
    core_oob::DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_probe_timeout_ms() -> u64 {
    core_oob::DEFAULT_PROBE_TIMEOUT.as_millis() as u64
}

fn default_handshake_timeout_ms() -> u64 {
    core_oob::DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

fn default_max_handshake_bytes() -> usize {
    core_sni::DEFAULT_MAX_HANDSHAKE
}

impl Config {
    /// Read, apply `SNI_CAMO_*` environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides: SNI_CAMO_LOCAL_ADDR, SNI_CAMO_OOB_PORT, SNI_CAMO_PEERS
    /// (comma separated), SNI_CAMO_FAKE_SNI. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SNI_CAMO_LOCAL_ADDR") {
            self.local_proxy_addr = addr;
        }
        if let Some(port) = lookup("SNI_CAMO_OOB_PORT") {
            if let Ok(n) = port.trim().parse() {
                self.oob_port = n;
            }
        }
        if let Some(peers) = lookup("SNI_CAMO_PEERS") {
            self.oob_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PeerAddress::from)
                .collect();
        }
        if let Some(sni) = lookup("SNI_CAMO_FAKE_SNI") {
            self.fake_sni = Some(sni);
        }
        if self.fake_sni.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.fake_sni = None;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oob_peers.is_empty() {
            return Err(ConfigError::Invalid {
                field: "oob_peers",
                reason: "at least one peer is required".into(),
            });
        }
        if self.oob_port == 0 {
            return Err(ConfigError::Invalid {
                field: "oob_port",
                reason: "must be non-zero".into(),
            });
        }
        for (field, ms) in [
            ("oob_timeout_ms", self.oob_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be non-zero".into(),
                });
            }
        }
        if self.max_handshake_bytes < core_sni::RECORD_HEADER_LEN {
            return Err(ConfigError::Invalid {
                field: "max_handshake_bytes",
                reason: format!("{} is too small", self.max_handshake_bytes),
            });
        }
        self.local_addr()?;
        self.oob_listen_socket()?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.local_proxy_addr
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "local_proxy_addr",
                reason: format!("'{}': {}", self.local_proxy_addr, e),
            })
    }

    /// `oob_listen_addr` joined with `oob_port`; bare IPv6 hosts get brackets.
    pub fn oob_listen_socket(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.oob_listen_addr.trim();
        let joined = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.oob_port)
        } else {
            format!("{}:{}", host, self.oob_port)
        };
        joined.parse().map_err(|e| ConfigError::Invalid {
            field: "oob_listen_addr",
            reason: format!("'{}': {}", joined, e),
        })
    }

    pub fn oob_timeout(&self) -> Duration {
        Duration::from_millis(self.oob_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
