//! SSC transports.
//!
//! A transport performs exactly one request/response round trip per call:
//! a JSON message goes out, a JSON message comes back. Two variants exist:
//!
//! - [`ReliableTransport`] - a persistent TCP stream, one message per line
//! - [`UnreliableTransport`] - a connected UDP socket, one message per datagram
//!
//! Which variant a device gets is decided by [`TransportKind::select`] from its
//! advertised capabilities. Construction goes through the [`TransportConnector`]
//! trait so connections can be exercised against fixture transports in tests.

mod reliable;
mod unreliable;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::device::Capabilities;
use crate::error::{SscError, SscResult};

pub use reliable::ReliableTransport;
pub use unreliable::UnreliableTransport;

/// The two transport variants of the SSC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Stream-oriented (TCP).
    Reliable,
    /// Datagram-oriented (UDP).
    Unreliable,
}

impl TransportKind {
    /// Picks the transport for a device, preferring TCP when both are advertised.
    ///
    /// Fails with [`SscError::UnsupportedDevice`] when neither is advertised.
    pub fn select(address: &str, capabilities: Capabilities) -> SscResult<Self> {
        if capabilities.supports_tcp {
            Ok(Self::Reliable)
        } else if capabilities.supports_udp {
            Ok(Self::Unreliable)
        } else {
            Err(SscError::UnsupportedDevice(address.to_string()))
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reliable => write!(f, "TCP"),
            Self::Unreliable => write!(f, "UDP"),
        }
    }
}

/// One physical SSC link to a device.
///
/// Callers must not overlap calls on one instance; the managed connection
/// guarantees this by holding its lock for the whole round trip.
#[async_trait]
pub trait Transport: Send {
    /// Sends one message and waits for exactly one response message.
    async fn round_trip(&mut self, request: &Value) -> SscResult<Value>;

    /// Returns true while the transport can carry another request.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    ///
    /// Fails with [`SscError::Busy`] if a send is still in flight.
    fn disconnect(&mut self) -> SscResult<()>;

    /// Returns which variant this transport is.
    fn kind(&self) -> TransportKind;
}

/// Builds transports for a device address.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a transport of the given kind to `address`.
    async fn connect(&self, address: &str, kind: TransportKind) -> SscResult<Box<dyn Transport>>;
}

/// Connector that opens real TCP/UDP sockets.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl NetworkConnector {
    /// Creates a connector from the core configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.ssc_port,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl TransportConnector for NetworkConnector {
    async fn connect(&self, address: &str, kind: TransportKind) -> SscResult<Box<dyn Transport>> {
        let peer = peer_addr(address, self.port)?;
        log::debug!("[Transport] Opening {} transport to {}", kind, peer);
        match kind {
            TransportKind::Reliable => Ok(Box::new(
                ReliableTransport::connect(peer, self.connect_timeout, self.request_timeout)
                    .await?,
            )),
            TransportKind::Unreliable => Ok(Box::new(
                UnreliableTransport::bind(peer, self.request_timeout).await?,
            )),
        }
    }
}

/// Resolves a device address string (optionally bracketed) to a socket address.
pub fn peer_addr(address: &str, port: u16) -> SscResult<SocketAddr> {
    let bare = address.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| {
            SscError::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid device address {:?}: {}", address, e),
            ))
        })
}
