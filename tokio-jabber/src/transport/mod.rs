// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Byte transports.
//!
//! A transport moves raw bytes between the session core and the server.
//! The concrete implementations form a tagged variant: direct TCP, a
//! TLS layer decorating TCP, a BOSH layer multiplexing a pool of inner
//! transports under HTTP, and a wrapper around any caller-supplied I/O
//! object. The session core only talks to [`Transport`].

use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::{DisconnectReason, Error};

mod bosh;
mod compress;
mod dns;
mod tcp;
mod tls;

pub use bosh::{BoshTransport, ConnMode};
pub use compress::{CodecError, ZlibCodec};
pub use dns::DnsConfig;
pub use tcp::TcpTransport;
pub use tls::TlsTransport;

/// Object-safe bundle of the tokio I/O traits, for type-erased streams.
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

/// The connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No connection.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The transport is usable.
    Connected,
}

/// The outcome of a [`Transport::recv`] call.
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes arrived.
    Data(Vec<u8>),
    /// The timeout elapsed without data. Not an error.
    Timeout,
    /// The transport ended.
    Closed(DisconnectReason),
}

/// Running byte counters of a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Total bytes received off the wire.
    pub total_in: u64,
    /// Total bytes sent on the wire.
    pub total_out: u64,
}

/// The byte stream under a TCP-ish transport: either a real socket or
/// a caller-supplied I/O object (in-memory pipes in tests, sockets
/// established elsewhere).
pub(crate) enum RawStream {
    Tcp(TcpStream),
    Boxed(Box<dyn AsyncReadAndWrite>),
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            RawStream::Boxed(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            RawStream::Boxed(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            RawStream::Boxed(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            RawStream::Boxed(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A byte transport to the server.
pub enum Transport {
    /// Direct TCP.
    Tcp(TcpTransport),
    /// TLS decorating a TCP transport.
    Tls(Box<TlsTransport>),
    /// BOSH multiplexing a pool of inner transports.
    Bosh(Box<BoshTransport>),
}

impl Transport {
    /// A TCP transport wrapping an already-established I/O object.
    /// Such a transport starts out [`Connected`][`TransportState::Connected`]
    /// and cannot reconnect.
    pub fn from_stream(stream: Box<dyn AsyncReadAndWrite>) -> Transport {
        Transport::Tcp(TcpTransport::from_stream(stream))
    }

    /// Establishes the connection. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<(), Error> {
        match self {
            Transport::Tcp(transport) => transport.connect().await,
            Transport::Tls(transport) => transport.connect().await,
            Transport::Bosh(transport) => transport.connect().await,
        }
    }

    /// Sends bytes, returning whether the transport accepted them.
    pub async fn send(&mut self, data: &[u8]) -> bool {
        match self {
            Transport::Tcp(transport) => transport.send(data).await,
            Transport::Tls(transport) => transport.send(data).await,
            Transport::Bosh(transport) => transport.send(data).await,
        }
    }

    /// Waits up to `timeout` (forever if `None`) for the next transport
    /// event.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> TransportEvent {
        match self {
            Transport::Tcp(transport) => transport.recv(timeout).await,
            Transport::Tls(transport) => transport.recv(timeout).await,
            Transport::Bosh(transport) => transport.recv(timeout).await,
        }
    }

    /// Tears the connection down. The transport ends up
    /// [`Disconnected`][`TransportState::Disconnected`] from any state.
    pub async fn disconnect(&mut self, reason: DisconnectReason) {
        match self {
            Transport::Tcp(transport) => transport.disconnect().await,
            Transport::Tls(transport) => transport.disconnect().await,
            Transport::Bosh(transport) => transport.disconnect(reason).await,
        }
    }

    /// Releases all resources without the orderly shutdown of
    /// [`disconnect`][`Self::disconnect`].
    pub fn cleanup(&mut self) {
        match self {
            Transport::Tcp(transport) => transport.cleanup(),
            Transport::Tls(transport) => transport.cleanup(),
            Transport::Bosh(transport) => transport.cleanup(),
        }
    }

    /// The current connection state.
    pub fn state(&self) -> TransportState {
        match self {
            Transport::Tcp(transport) => transport.state(),
            Transport::Tls(transport) => transport.state(),
            Transport::Bosh(transport) => transport.state(),
        }
    }

    /// Byte counters.
    pub fn statistics(&self) -> Statistics {
        match self {
            Transport::Tcp(transport) => transport.statistics(),
            Transport::Tls(transport) => transport.statistics(),
            Transport::Bosh(transport) => transport.statistics(),
        }
    }

    /// Clones the configuration into a new, disconnected transport.
    pub fn new_instance(&self) -> Transport {
        match self {
            Transport::Tcp(transport) => Transport::Tcp(transport.new_instance()),
            Transport::Tls(transport) => Transport::Tls(Box::new(transport.new_instance())),
            Transport::Bosh(transport) => Transport::Bosh(Box::new(transport.new_instance())),
        }
    }

    /// Whether a TLS layer protects this transport.
    pub fn is_secure(&self) -> bool {
        match self {
            Transport::Tcp(_) => false,
            Transport::Tls(transport) => transport.is_secure(),
            Transport::Bosh(transport) => transport.is_secure(),
        }
    }

    /// Enables or disables the zlib codec. Returns `false` for
    /// transports which do not support stream compression (BOSH).
    pub fn set_compression(&mut self, enable: bool) -> bool {
        match self {
            Transport::Tcp(transport) => transport.set_compression(enable),
            Transport::Tls(transport) => transport.set_compression(enable),
            Transport::Bosh(_) => false,
        }
    }

    /// Replaces this transport with a TLS layer over it, performing the
    /// handshake. Only valid on a connected TCP transport (the STARTTLS
    /// upgrade path).
    pub async fn start_tls(&mut self, domain: &str) -> Result<(), Error> {
        let placeholder = Transport::Tcp(TcpTransport::unconnected());
        let this = core::mem::replace(self, placeholder);
        match this {
            Transport::Tcp(tcp) => match TlsTransport::upgrade(tcp, domain).await {
                Ok(tls) => {
                    *self = Transport::Tls(Box::new(tls));
                    Ok(())
                }
                Err(e) => Err(e),
            },
            other => {
                *self = other;
                Err(Error::Disconnected(DisconnectReason::TlsNotAvailable))
            }
        }
    }

    // Non-recursive entry points used by the BOSH layer for its pool
    // members. BOSH inside BOSH is not a meaningful configuration.

    pub(crate) async fn connect_inner(&mut self) -> Result<(), Error> {
        match self {
            Transport::Tcp(transport) => transport.connect().await,
            Transport::Tls(transport) => transport.connect().await,
            Transport::Bosh(_) => Err(Error::InvalidState),
        }
    }

    pub(crate) async fn send_inner(&mut self, data: &[u8]) -> bool {
        match self {
            Transport::Tcp(transport) => transport.send(data).await,
            Transport::Tls(transport) => transport.send(data).await,
            Transport::Bosh(_) => false,
        }
    }

    pub(crate) async fn recv_inner(&mut self, timeout: Option<Duration>) -> TransportEvent {
        match self {
            Transport::Tcp(transport) => transport.recv(timeout).await,
            Transport::Tls(transport) => transport.recv(timeout).await,
            Transport::Bosh(_) => TransportEvent::Closed(DisconnectReason::NotConnected),
        }
    }

    pub(crate) async fn disconnect_inner(&mut self) {
        match self {
            Transport::Tcp(transport) => transport.disconnect().await,
            Transport::Tls(transport) => transport.disconnect().await,
            Transport::Bosh(_) => (),
        }
    }
}
