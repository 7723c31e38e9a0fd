// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The direct TCP transport.

use core::time::Duration;

use log::{trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{DisconnectReason, Error};
use crate::transport::{
    AsyncReadAndWrite, DnsConfig, RawStream, Statistics, TransportEvent, TransportState, ZlibCodec,
};

const READ_BUF_SIZE: usize = 4096;

/// A transport over a single TCP connection (or a caller-supplied byte
/// stream).
pub struct TcpTransport {
    config: Option<DnsConfig>,
    stream: Option<RawStream>,
    state: TransportState,
    compression: Option<ZlibCodec>,
    stats: Statistics,
}

impl TcpTransport {
    /// A transport that will resolve and connect per `config`.
    pub fn new(config: DnsConfig) -> TcpTransport {
        TcpTransport {
            config: Some(config),
            stream: None,
            state: TransportState::Disconnected,
            compression: None,
            stats: Statistics::default(),
        }
    }

    /// A transport over an already-established I/O object. Starts out
    /// connected; it cannot re-connect once closed.
    pub fn from_stream(stream: Box<dyn AsyncReadAndWrite>) -> TcpTransport {
        TcpTransport {
            config: None,
            stream: Some(RawStream::Boxed(stream)),
            state: TransportState::Connected,
            compression: None,
            stats: Statistics::default(),
        }
    }

    /// A permanently disconnected placeholder.
    pub(crate) fn unconnected() -> TcpTransport {
        TcpTransport {
            config: None,
            stream: None,
            state: TransportState::Disconnected,
            compression: None,
            stats: Statistics::default(),
        }
    }

    /// Establishes the connection. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.state != TransportState::Disconnected {
            return Ok(());
        }
        let config = match self.config {
            Some(ref config) => config,
            None => return Err(Error::Disconnected(DisconnectReason::NotConnected)),
        };
        self.state = TransportState::Connecting;
        match config.resolve().await {
            Ok(stream) => {
                self.stream = Some(RawStream::Tcp(stream));
                self.state = TransportState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Disconnected;
                Err(e)
            }
        }
    }

    /// Sends bytes, compressing them first if the codec is enabled.
    pub async fn send(&mut self, data: &[u8]) -> bool {
        if self.state != TransportState::Connected {
            warn!("attempt to send on a TCP transport that is not connected");
            return false;
        }
        let stream = match self.stream {
            Some(ref mut stream) => stream,
            None => return false,
        };
        let wire = match self.compression {
            Some(ref mut codec) => match codec.compress(data) {
                Ok(compressed) => compressed,
                Err(e) => {
                    warn!("compression failed: {}", e);
                    return false;
                }
            },
            None => data.to_vec(),
        };
        match stream.write_all(&wire).await.and(stream.flush().await) {
            Ok(()) => {
                self.stats.total_out += wire.len() as u64;
                true
            }
            Err(e) => {
                trace!("send failed: {}", e);
                false
            }
        }
    }

    /// Reads once, waiting at most `timeout`.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> TransportEvent {
        if self.state != TransportState::Connected {
            return TransportEvent::Closed(DisconnectReason::NotConnected);
        }
        let stream = match self.stream {
            Some(ref mut stream) => stream,
            None => return TransportEvent::Closed(DisconnectReason::NotConnected),
        };
        let mut buf = [0u8; READ_BUF_SIZE];
        let read = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => return TransportEvent::Timeout,
            },
            None => stream.read(&mut buf).await,
        };
        match read {
            Ok(0) => {
                self.cleanup();
                TransportEvent::Closed(DisconnectReason::RemoteClosed)
            }
            Ok(n) => {
                self.stats.total_in += n as u64;
                let data = match self.compression {
                    Some(ref mut codec) => match codec.decompress(&buf[..n]) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!("decompression failed: {}", e);
                            self.cleanup();
                            return TransportEvent::Closed(DisconnectReason::IoError);
                        }
                    },
                    None => buf[..n].to_vec(),
                };
                TransportEvent::Data(data)
            }
            Err(e) => {
                trace!("recv failed: {}", e);
                self.cleanup();
                TransportEvent::Closed(DisconnectReason::IoError)
            }
        }
    }

    /// Shuts the write side down and releases the socket.
    pub async fn disconnect(&mut self) {
        if let Some(ref mut stream) = self.stream {
            let _ = stream.shutdown().await;
        }
        self.cleanup();
    }

    /// Releases the socket without shutdown.
    pub fn cleanup(&mut self) {
        self.stream = None;
        self.compression = None;
        self.state = TransportState::Disconnected;
    }

    /// The current connection state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Byte counters.
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Clones the configuration into a new, disconnected transport.
    pub fn new_instance(&self) -> TcpTransport {
        match self.config {
            Some(ref config) => TcpTransport::new(config.clone()),
            None => TcpTransport::unconnected(),
        }
    }

    /// Enables or disables the zlib codec.
    pub fn set_compression(&mut self, enable: bool) -> bool {
        self.compression = if enable { Some(ZlibCodec::new()) } else { None };
        true
    }

    /// Hands the raw byte stream over, for the TLS upgrade.
    pub(crate) fn take_stream(&mut self) -> Option<RawStream> {
        self.state = TransportState::Disconnected;
        self.stream.take()
    }
}
