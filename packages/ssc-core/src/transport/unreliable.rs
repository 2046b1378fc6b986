//! UDP transport: one JSON message per datagram.
//!
//! There is no retry or deduplication. A lost request or reply surfaces as a
//! request timeout, after which the socket is dropped so a straggling reply
//! can never be mistaken for the answer to the next request.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{Transport, TransportKind};
use crate::error::{SscError, SscResult};

/// Largest UDP payload over IPv6 (65535 minus the 8-byte UDP header).
const MAX_DATAGRAM: usize = 65_527;

/// Ephemeral UDP socket connected to one device.
pub struct UnreliableTransport {
    peer: SocketAddr,
    socket: Option<UdpSocket>,
    request_timeout: Duration,
    sending: bool,
    buffer: Vec<u8>,
}

impl UnreliableTransport {
    /// Binds an ephemeral local socket of the peer's family and connects it to `peer`.
    pub async fn bind(peer: SocketAddr, request_timeout: Duration) -> SscResult<Self> {
        let local: SocketAddr = if peer.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        log::debug!(
            "[Transport] UDP socket {} bound for {}",
            socket.local_addr()?,
            peer
        );
        Ok(Self {
            peer,
            socket: Some(socket),
            request_timeout,
            sending: false,
            buffer: vec![0; MAX_DATAGRAM],
        })
    }
}

#[async_trait]
impl Transport for UnreliableTransport {
    async fn round_trip(&mut self, request: &Value) -> SscResult<Value> {
        if self.sending {
            return Err(SscError::NotConnected);
        }
        let socket = self.socket.as_ref().ok_or(SscError::NotConnected)?;
        let payload = serde_json::to_vec(request)?;
        let buffer = &mut self.buffer;

        self.sending = true;
        let exchange = async {
            socket.send(&payload).await?;
            socket.recv(buffer).await
        };
        let outcome = timeout(self.request_timeout, exchange).await;
        self.sending = false;

        match outcome {
            Ok(Ok(len)) => Ok(serde_json::from_slice(&self.buffer[..len])?),
            Ok(Err(e)) => {
                log::warn!("[Transport] UDP exchange with {} failed: {}", self.peer, e);
                self.socket = None;
                Err(e.into())
            }
            Err(_) => {
                self.socket = None;
                Err(SscError::timed_out("request", self.request_timeout))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some() && !self.sending
    }

    fn disconnect(&mut self) -> SscResult<()> {
        if self.sending {
            return Err(SscError::Busy);
        }
        if self.socket.take().is_some() {
            log::debug!("[Transport] UDP socket for {} closed", self.peer);
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Unreliable
    }
}
