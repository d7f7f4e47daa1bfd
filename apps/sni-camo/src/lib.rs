//! SNI camouflage proxy.
//!
//! Clients connect in plain TCP and open with a TLS ClientHello. The relay
//! reads the true host name out of it, asks a remote peer over the overlay
//! network for the destination's opening handshake, writes that back to the
//! client, then tunnels bytes to the destination over its own TLS connection
//! (optionally presenting a camouflage SNI).

pub mod check;
pub mod config;
pub mod logging;
pub mod relay;

pub use config::{Config, ConfigError};
pub use relay::{Relay, RelayError};
