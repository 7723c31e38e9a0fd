// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The TLS layer, decorating a TCP transport.

use core::time::Duration;
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{
    client::TlsStream,
    rustls::pki_types::ServerName,
    rustls::{ClientConfig, RootCertStore},
    TlsConnector,
};

use crate::error::{DisconnectReason, Error};
use crate::handler::CertInfo;
use crate::transport::{
    RawStream, Statistics, TcpTransport, TransportEvent, TransportState, ZlibCodec,
};

const READ_BUF_SIZE: usize = 4096;

/// A transport adding TLS on top of an inner TCP transport.
///
/// Two ways in: [`new`][`TlsTransport::new`] for connections that are
/// TLS from the first byte (direct TLS, HTTPS BOSH pool members), and
/// [`upgrade`][`TlsTransport::upgrade`] for the mid-stream STARTTLS
/// path, where the inner transport is already connected and has carried
/// plaintext.
pub struct TlsTransport {
    inner: TcpTransport,
    domain: String,
    stream: Option<TlsStream<RawStream>>,
    state: TransportState,
    compression: Option<ZlibCodec>,
    stats: Statistics,
}

impl TlsTransport {
    /// A TLS transport that will connect the inner transport and then
    /// handshake immediately.
    pub fn new(inner: TcpTransport, domain: impl Into<String>) -> TlsTransport {
        TlsTransport {
            inner,
            domain: domain.into(),
            stream: None,
            state: TransportState::Disconnected,
            compression: None,
            stats: Statistics::default(),
        }
    }

    /// Performs the TLS handshake over an already-connected inner
    /// transport. This is the STARTTLS upgrade.
    pub async fn upgrade(mut inner: TcpTransport, domain: &str) -> Result<TlsTransport, Error> {
        let raw = inner
            .take_stream()
            .ok_or(Error::Disconnected(DisconnectReason::NotConnected))?;
        let mut transport = TlsTransport::new(inner, domain);
        transport.handshake(raw).await?;
        Ok(transport)
    }

    /// Connects the inner transport if necessary, then handshakes.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;
        if let Err(e) = self.inner.connect().await {
            self.state = TransportState::Disconnected;
            return Err(e);
        }
        let raw = match self.inner.take_stream() {
            Some(raw) => raw,
            None => {
                self.state = TransportState::Disconnected;
                return Err(Error::Disconnected(DisconnectReason::NotConnected));
            }
        };
        self.handshake(raw).await
    }

    async fn handshake(&mut self, raw: RawStream) -> Result<(), Error> {
        debug!("beginning TLS handshake with {}", self.domain);
        self.state = TransportState::Connecting;

        let domain = match ServerName::try_from(self.domain.clone()) {
            Ok(domain) => domain,
            Err(_) => {
                self.state = TransportState::Disconnected;
                return Err(Error::Disconnected(DisconnectReason::TlsFailed));
            }
        };

        let mut root_store = RootCertStore::empty();
        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                root_store.add_parsable_certificates(certs);
            }
            Err(e) => {
                warn!("could not load native root certificates: {}", e);
                self.state = TransportState::Disconnected;
                return Err(Error::Disconnected(DisconnectReason::TlsNotAvailable));
            }
        }
        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        match TlsConnector::from(Arc::new(config)).connect(domain, raw).await {
            Ok(stream) => {
                debug!("TLS handshake with {} succeeded", self.domain);
                self.stream = Some(stream);
                self.state = TransportState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("TLS handshake with {} failed: {}", self.domain, e);
                self.state = TransportState::Disconnected;
                Err(Error::Disconnected(DisconnectReason::TlsFailed))
            }
        }
    }

    /// Whether the handshake completed.
    pub fn is_secure(&self) -> bool {
        self.state == TransportState::Connected && self.stream.is_some()
    }

    /// Details about the established TLS layer for the TLS listener.
    pub fn cert_info(&self) -> CertInfo {
        match self.stream {
            Some(ref stream) => {
                let (_, connection) = stream.get_ref();
                CertInfo {
                    secure: true,
                    protocol: connection.protocol_version().map(|v| format!("{:?}", v)),
                    chain_len: connection
                        .peer_certificates()
                        .map(|certs| certs.len())
                        .unwrap_or(0),
                }
            }
            None => CertInfo::default(),
        }
    }

    /// Sends bytes through the TLS layer. Outbound data is refused
    /// until the handshake has completed.
    pub async fn send(&mut self, data: &[u8]) -> bool {
        if self.state != TransportState::Connected {
            warn!("attempt to send on a TLS transport before the handshake completed");
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

    /// Shuts the TLS session down and releases the connection.
    pub async fn disconnect(&mut self) {
        if let Some(ref mut stream) = self.stream {
            let _ = stream.shutdown().await;
        }
        self.cleanup();
    }

    /// Releases all resources without the orderly shutdown.
    pub fn cleanup(&mut self) {
        self.stream = None;
        self.compression = None;
        self.inner.cleanup();
        self.state = TransportState::Disconnected;
    }

    /// The current connection state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Byte counters, aggregated over the plaintext connect phase and
    /// the TLS phase.
    pub fn statistics(&self) -> Statistics {
        let inner = self.inner.statistics();
        Statistics {
            total_in: inner.total_in + self.stats.total_in,
            total_out: inner.total_out + self.stats.total_out,
        }
    }

    /// Clones the configuration into a new, disconnected transport.
    pub fn new_instance(&self) -> TlsTransport {
        TlsTransport::new(self.inner.new_instance(), self.domain.clone())
    }

    /// Enables or disables the zlib codec (compression runs above TLS).
    pub fn set_compression(&mut self, enable: bool) -> bool {
        self.compression = if enable { Some(ZlibCodec::new()) } else { None };
        true
    }
}
