// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The session core shared by [`Client`][`crate::Client`] and
//! [`Component`][`crate::Component`].
//!
//! The core owns the transport and the stream parser, hands outgoing
//! stanzas to the transport in submission order, correlates IQ
//! responses with their requests, and fans incoming stanzas out to the
//! registered handlers. It is driven by a pull loop: the owner calls
//! `recv(timeout)` on the client or component, which polls the core
//! once; every handler callback runs inline within that call.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use jid::Jid;
use log::{debug, trace, warn};
use minitag::{Parser, StreamEvent, Tag};
use sha1::{Digest, Sha1};

use crate::error::{DisconnectReason, Error};
use crate::handler::IqHandler;
use crate::stanza::{Iq, IqType, Stanza};
use crate::transport::{Statistics, Transport, TransportEvent};

mod handlers;

pub use handlers::Handlers;

/// Where in its lifecycle a stream currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing established.
    Disconnected,
    /// The transport is being connected.
    Connecting,
    /// The transport is up, the stream header not yet sent.
    Connected,
    /// Our stream header is out and the server's arrived.
    StreamOpened,
    /// The server's `<stream:features/>` arrived.
    FeaturesReceived,
    /// `<starttls/>` sent, awaiting `<proceed/>` / handshake.
    TlsNegotiating,
    /// The TLS layer is up.
    TlsEstablished,
    /// `<compress/>` sent, awaiting `<compressed/>`.
    CompressionNegotiating,
    /// The zlib codec is active.
    CompressionEstablished,
    /// A SASL exchange is in progress.
    SaslNegotiating,
    /// SASL reported `<success/>`.
    SaslAuthenticated,
    /// A legacy `jabber:iq:auth` exchange is in progress.
    IqAuthNegotiating,
    /// Legacy authentication succeeded.
    IqAuthenticated,
    /// The bind request is in flight.
    ResourceBinding,
    /// The session request is in flight.
    SessionCreating,
    /// Negotiation is complete; the stream carries stanzas.
    Bound,
}

struct TrackedIq {
    handler: Arc<dyn IqHandler + Send + Sync>,
    context: u32,
}

/// Lower-case hex SHA-1, as used by the component handshake and the
/// legacy auth digest.
pub(crate) fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// The session core.
pub struct Session {
    pub(crate) jid: Jid,
    pub(crate) password: String,
    pub(crate) transport: Transport,
    pub(crate) parser: Parser,
    /// `jabber:client` or `jabber:component:accept`.
    pub(crate) stream_ns: &'static str,
    pub(crate) stream_id: String,
    pub(crate) state: StreamState,
    pub(crate) authed: bool,
    pub(crate) handlers: Handlers,
    tracker: HashMap<String, TrackedIq>,
    id_seq: u64,
    /// Trailing bytes of an incomplete UTF-8 sequence, kept until the
    /// next transport read completes the character.
    rx_partial: Vec<u8>,
    connect_notified: bool,
    disconnect_notified: bool,
    requested_disconnect: Option<DisconnectReason>,
}

impl Session {
    pub(crate) fn new(
        jid: Jid,
        password: String,
        transport: Transport,
        stream_ns: &'static str,
    ) -> Session {
        Session {
            jid,
            password,
            transport,
            parser: Parser::new(),
            stream_ns,
            stream_id: String::new(),
            state: StreamState::Disconnected,
            authed: false,
            handlers: Handlers::default(),
            tracker: HashMap::new(),
            id_seq: 0,
            rx_partial: Vec::new(),
            connect_notified: false,
            disconnect_notified: false,
            requested_disconnect: None,
        }
    }

    /// The JID this session is (or will be) bound to.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// The server-assigned stream id, empty before the stream opened.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Whether authentication completed.
    pub fn is_authed(&self) -> bool {
        self.authed
    }

    /// The current stream state.
    pub fn stream_state(&self) -> StreamState {
        self.state
    }

    /// Transport byte counters.
    pub fn statistics(&self) -> Statistics {
        self.transport.statistics()
    }

    /// The handler registries.
    pub fn handlers(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    /// A fresh stanza id, unique within this session.
    pub fn next_id(&mut self) -> String {
        self.id_seq += 1;
        format!("uid{}", self.id_seq)
    }

    /// Asks the session to disconnect; honoured by the next poll.
    pub fn request_disconnect(&mut self) {
        self.requested_disconnect = Some(DisconnectReason::User);
    }

    /// Serializes and sends an element.
    pub async fn send_tag(&mut self, tag: &Tag) -> bool {
        self.send_raw(tag.xml().as_bytes()).await
    }

    /// Sends pre-serialized stream data.
    pub(crate) async fn send_raw(&mut self, data: &[u8]) -> bool {
        trace!("SEND: {}", String::from_utf8_lossy(data));
        self.transport.send(data).await
    }

    /// Sends an IQ whose result/error will be delivered to `handler`
    /// exactly once, with `context` distinguishing concurrent requests.
    ///
    /// The IQ must carry an id; ids from [`next_id`][`Self::next_id`]
    /// are unique among all live requests of this session.
    pub async fn send_iq(
        &mut self,
        iq: Iq,
        handler: Arc<dyn IqHandler + Send + Sync>,
        context: u32,
    ) -> bool {
        let id = match iq.id() {
            Some(id) => id.to_owned(),
            None => {
                warn!("refusing to track an IQ without an id");
                return false;
            }
        };
        if self.tracker.contains_key(&id) {
            warn!("IQ id {} is already being tracked", id);
            return false;
        }
        self.tracker
            .insert(id.clone(), TrackedIq { handler, context });
        if self.send_tag(iq.tag()).await {
            true
        } else {
            self.tracker.remove(&id);
            false
        }
    }

    /// Sends the stream header, resetting the parser first: a header is
    /// only ever sent at the start of a (possibly restarted) stream.
    pub(crate) async fn send_header(&mut self) -> bool {
        self.parser.reset();
        self.rx_partial.clear();
        let header = format!(
            "<?xml version='1.0'?>\
             <stream:stream xmlns='{}' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             to='{}' version='1.0'>",
            self.stream_ns,
            self.jid.domain()
        );
        self.send_raw(header.as_bytes()).await
    }

    /// Polls the transport once and parses whatever arrived.
    ///
    /// `Ok(events)` may be empty (timeout). `Err` means the session
    /// ended; the disconnect notification has already been delivered.
    pub(crate) async fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<StreamEvent>, Error> {
        if let Some(reason) = self.requested_disconnect.take() {
            self.disconnect(reason).await;
            return Err(Error::Disconnected(reason));
        }
        match self.transport.recv(timeout).await {
            TransportEvent::Timeout => Ok(Vec::new()),
            TransportEvent::Data(bytes) => {
                let mut bytes = bytes;
                if !self.rx_partial.is_empty() {
                    let mut joined = core::mem::take(&mut self.rx_partial);
                    joined.extend_from_slice(&bytes);
                    bytes = joined;
                }
                let valid_len = match core::str::from_utf8(&bytes) {
                    Ok(_) => bytes.len(),
                    // A character split across reads is completed by
                    // the next chunk; anything else is a broken stream.
                    Err(e) if e.error_len().is_none() => e.valid_up_to(),
                    Err(e) => {
                        warn!("received bytes are not valid UTF-8: {}", e);
                        self.teardown(DisconnectReason::StreamError).await;
                        return Err(Error::Disconnected(DisconnectReason::StreamError));
                    }
                };
                self.rx_partial = bytes[valid_len..].to_vec();
                let text = core::str::from_utf8(&bytes[..valid_len]).expect("validated above");
                trace!("RECV: {}", text);
                match self.parser.feed(text) {
                    Ok(events) => Ok(events),
                    Err(e) => {
                        warn!("stream is not well-formed: {}", e);
                        self.teardown(DisconnectReason::StreamError).await;
                        Err(Error::Disconnected(DisconnectReason::StreamError))
                    }
                }
            }
            TransportEvent::Closed(reason) => {
                self.cleanup(reason);
                Err(Error::Disconnected(reason))
            }
        }
    }

    /// Orderly shutdown: stream footer, transport teardown, handler
    /// notification.
    pub(crate) async fn disconnect(&mut self, reason: DisconnectReason) {
        if self.state != StreamState::Disconnected {
            let _ = self.send_raw(b"</stream:stream>").await;
        }
        self.teardown(reason).await;
    }

    async fn teardown(&mut self, reason: DisconnectReason) {
        self.transport.disconnect(reason).await;
        self.cleanup(reason);
    }

    fn cleanup(&mut self, reason: DisconnectReason) {
        self.transport.cleanup();
        self.tracker.clear();
        self.rx_partial.clear();
        self.state = StreamState::Disconnected;
        self.authed = false;
        self.notify_disconnect(reason);
    }

    /// Notifies every connection listener of the session end, once.
    pub(crate) fn notify_disconnect(&mut self, reason: DisconnectReason) {
        if self.disconnect_notified {
            return;
        }
        self.disconnect_notified = true;
        debug!("session disconnected: {}", reason);
        for listener in self.handlers.connection_snapshot() {
            listener.on_disconnect(reason);
        }
    }

    /// Notifies every connection listener that login completed, once
    /// per session.
    pub(crate) fn notify_connect(&mut self) {
        if self.connect_notified {
            return;
        }
        self.connect_notified = true;
        for listener in self.handlers.connection_snapshot() {
            listener.on_connect();
        }
    }

    /// Re-arms the one-shot notification guards for a fresh connect.
    pub(crate) fn reset_notifications(&mut self) {
        self.connect_notified = false;
        self.disconnect_notified = false;
    }

    /// Hands a raw stream child to the tag handlers registered for its
    /// root name.
    pub(crate) fn dispatch_tag(&mut self, tag: &Tag) {
        for handler in self.handlers.tag_snapshot(tag.name()) {
            handler.handle_tag(tag);
        }
    }

    /// Routes a classified stanza to the registered handlers.
    pub(crate) async fn dispatch_stanza(&mut self, stanza: Stanza) {
        match stanza {
            Stanza::Iq(iq) => self.dispatch_iq(iq).await,
            Stanza::Message(message) => {
                for handler in self.handlers.message_snapshot() {
                    handler.handle_message(&message);
                }
            }
            Stanza::Presence(presence) => {
                for handler in self.handlers.presence_snapshot() {
                    handler.handle_presence(&presence);
                }
            }
            Stanza::Subscription(subscription) => {
                for handler in self.handlers.subscription_snapshot() {
                    handler.handle_subscription(&subscription);
                }
            }
        }
    }

    async fn dispatch_iq(&mut self, iq: Iq) {
        match iq.subtype() {
            IqType::Result | IqType::Error => {
                let tracked = iq.id().and_then(|id| self.tracker.remove(id));
                match tracked {
                    Some(tracked) => tracked.handler.handle_iq_id(&iq, tracked.context),
                    None => {
                        debug!(
                            "dropping untracked IQ {} with id {:?}",
                            if iq.subtype() == IqType::Result {
                                "result"
                            } else {
                                "error"
                            },
                            iq.id()
                        );
                    }
                }
            }
            IqType::Get | IqType::Set => {
                let namespace = iq.payload_ns().unwrap_or_default().to_owned();
                let mut handled = false;
                for handler in self.handlers.iq_ns_snapshot(&namespace) {
                    handled |= handler.handle_iq(&iq);
                }
                if !handled {
                    debug!("no handler claimed IQ in namespace {:?}", namespace);
                    let reply = iq.service_unavailable_reply();
                    self.send_tag(&reply).await;
                }
            }
        }
    }
}
