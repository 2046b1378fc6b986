//! TCP transport: one JSON message per `\r\n`-terminated line.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Transport, TransportKind};
use crate::error::{SscError, SscResult};

const LINE_TERMINATOR: &str = "\r\n";

/// Persistent TCP stream to one device.
pub struct ReliableTransport {
    peer: SocketAddr,
    stream: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
    request_timeout: Duration,
    /// Set while a round trip is in progress. Stays set if the round trip
    /// future is dropped half way, which poisons the stream.
    sending: bool,
}

impl ReliableTransport {
    /// Opens the stream to `peer`.
    pub async fn connect(
        peer: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> SscResult<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| SscError::timed_out("connect", connect_timeout))??;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("[Transport] Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let (read, write) = stream.into_split();
        log::debug!("[Transport] TCP connected to {}", peer);
        Ok(Self {
            peer,
            stream: Some((BufReader::new(read), write)),
            request_timeout,
            sending: false,
        })
    }
}

#[async_trait]
impl Transport for ReliableTransport {
    async fn round_trip(&mut self, request: &Value) -> SscResult<Value> {
        if self.sending {
            return Err(SscError::NotConnected);
        }
        let (reader, writer) = self.stream.as_mut().ok_or(SscError::NotConnected)?;

        let mut line = serde_json::to_string(request)?;
        line.push_str(LINE_TERMINATOR);

        self.sending = true;
        let exchange = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            let mut response = String::new();
            if reader.read_line(&mut response).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by device",
                ));
            }
            Ok::<_, io::Error>(response)
        };
        let outcome = timeout(self.request_timeout, exchange).await;
        self.sending = false;

        match outcome {
            Ok(Ok(response)) => Ok(serde_json::from_str(response.trim_end())?),
            Ok(Err(e)) => {
                log::warn!("[Transport] TCP exchange with {} failed: {}", self.peer, e);
                self.stream = None;
                Err(e.into())
            }
            Err(_) => {
                // A late response would desynchronize the line stream
                self.stream = None;
                Err(SscError::timed_out("request", self.request_timeout))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.sending
    }

    fn disconnect(&mut self) -> SscResult<()> {
        if self.sending {
            return Err(SscError::Busy);
        }
        if self.stream.take().is_some() {
            log::debug!("[Transport] TCP connection to {} closed", self.peer);
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Reliable
    }
}
