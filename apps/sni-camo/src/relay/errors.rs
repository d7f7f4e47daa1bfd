//! Relay session error types.

use core_oob::{OobRequestFailed, ProbeError};
use core_sni::SniError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client handshake rejected: {0}")]
    Handshake(#[from] SniError),

    #[error(transparent)]
    NoPeer(#[from] ProbeError),

    #[error(transparent)]
    Oob(#[from] OobRequestFailed),

    #[error("destination {host} unreachable: {source}")]
    DestinationDial {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            RelayError::Handshake(SniError::MalformedHandshake(_)) => "malformed_handshake",
            RelayError::Handshake(SniError::NoSni) => "no_sni",
            RelayError::Handshake(SniError::HandshakeTooLarge { .. }) => "handshake_too_large",
            RelayError::Handshake(SniError::Io(_)) => "client_io",
            RelayError::NoPeer(_) => "no_reachable_peer",
            RelayError::Oob(e) if e.is_timeout() => "oob_timeout",
            RelayError::Oob(_) => "oob_request_failed",
            RelayError::DestinationDial { .. } => "destination_dial",
            RelayError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_are_stable() {
        assert_eq!(RelayError::Handshake(SniError::NoSni).type_name(), "no_sni");
        assert_eq!(
            RelayError::NoPeer(ProbeError::NoReachablePeer { tried: 2 }).type_name(),
            "no_reachable_peer"
        );
        let dial = RelayError::DestinationDial {
            host: "x.example".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(dial.type_name(), "destination_dial");
        assert!(dial.to_string().contains("x.example"));
    }
}
