// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External components (XEP-0114).
//!
//! Components are services logged into an XMPP server under a bare
//! domain. They skip TLS, SASL and binding; instead the server's
//! stream open is answered with a digest over the stream id and a
//! shared secret.

use core::time::Duration;
use std::sync::Arc;

use jid::Jid;
use log::{debug, warn};
use minitag::{StreamEvent, Tag};

use crate::error::{AuthError, DisconnectReason, Error};
use crate::handler::IqHandler;
use crate::ns;
use crate::session::{sha1_hex, Handlers, Session, StreamState};
use crate::stanza::{Iq, Stanza};
use crate::transport::{Statistics, Transport};

/// A component session to an XMPP server.
pub struct Component {
    session: Session,
}

impl Component {
    /// A component for `domain`, authenticating with the shared
    /// `secret` over the given transport.
    pub fn new(domain: &str, secret: impl Into<String>, transport: Transport) -> Result<Component, Error> {
        let jid: Jid = domain.parse()?;
        Ok(Component {
            session: Session::new(jid, secret.into(), transport, ns::COMPONENT),
        })
    }

    /// The component's JID.
    pub fn jid(&self) -> &Jid {
        self.session.jid()
    }

    /// The server-assigned stream id.
    pub fn stream_id(&self) -> &str {
        self.session.stream_id()
    }

    /// Whether the handshake completed.
    pub fn is_authed(&self) -> bool {
        self.session.is_authed()
    }

    /// The current stream state.
    pub fn stream_state(&self) -> StreamState {
        self.session.stream_state()
    }

    /// Transport byte counters.
    pub fn statistics(&self) -> Statistics {
        self.session.statistics()
    }

    /// The handler registries.
    pub fn handlers(&mut self) -> &mut Handlers {
        self.session.handlers()
    }

    /// A fresh stanza id.
    pub fn next_id(&mut self) -> String {
        self.session.next_id()
    }

    /// Sends an element down the stream.
    pub async fn send(&mut self, tag: &Tag) -> bool {
        self.session.send_tag(tag).await
    }

    /// Sends a tracked IQ; see [`Session::send_iq`].
    pub async fn send_iq(
        &mut self,
        iq: Iq,
        handler: Arc<dyn IqHandler + Send + Sync>,
        context: u32,
    ) -> bool {
        self.session.send_iq(iq, handler, context).await
    }

    /// Connects the transport and opens the stream.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.session.reset_notifications();
        self.session.state = StreamState::Connecting;
        self.session.transport.connect().await?;
        self.session.state = StreamState::Connected;
        self.session.send_header().await;
        Ok(())
    }

    /// Pulls and processes stream input for at most `timeout`.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let events = self.session.poll(timeout).await?;
        for event in events {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    /// Disconnects with an orderly stream shutdown.
    pub async fn disconnect(&mut self) {
        self.session.disconnect(DisconnectReason::User).await;
    }

    async fn handle_event(&mut self, event: StreamEvent) -> Result<(), Error> {
        match event {
            StreamEvent::StreamStart(tag) => {
                let id = match tag.attr("id") {
                    Some(id) if !id.is_empty() => id.to_owned(),
                    _ => {
                        warn!("component stream open carries no id");
                        self.session
                            .disconnect(DisconnectReason::StreamError)
                            .await;
                        return Err(Error::Disconnected(DisconnectReason::StreamError));
                    }
                };
                self.session.stream_id = id.clone();
                self.session.state = StreamState::StreamOpened;
                // The digest is the lower-case hex SHA-1 over the
                // concatenation of stream id and shared secret.
                let material = format!("{}{}", id, self.session.password);
                let handshake = Tag::with_text("handshake", sha1_hex(material.as_bytes()));
                self.session.send_tag(&handshake).await;
                Ok(())
            }
            StreamEvent::StreamEnd => {
                debug!("server closed the stream");
                self.session
                    .disconnect(DisconnectReason::StreamClosed)
                    .await;
                Err(Error::Disconnected(DisconnectReason::StreamClosed))
            }
            StreamEvent::Stanza(tag) => {
                self.session.dispatch_tag(&tag);
                if tag.name() == "handshake" {
                    debug!("component handshake accepted");
                    self.session.authed = true;
                    self.session.state = StreamState::Bound;
                    self.session.notify_connect();
                    return Ok(());
                }
                if tag.name() == "stream:error" {
                    warn!("component handshake rejected: {}", AuthError::ComponentFail);
                    self.session
                        .disconnect(DisconnectReason::AuthenticationFailed)
                        .await;
                    return Err(Error::Disconnected(DisconnectReason::AuthenticationFailed));
                }
                match Stanza::classify(tag) {
                    Ok(stanza) => self.session.dispatch_stanza(stanza).await,
                    Err(tag) => debug!("ignoring unexpected stream element <{}/>", tag.name()),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConnectionListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TIMEOUT: Option<Duration> = Some(Duration::from_millis(200));

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
    }

    impl ConnectionListener for Recorder {
        fn on_connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self, _reason: DisconnectReason) {}
    }

    async fn read_until(io: &mut tokio::io::DuplexStream, marker: &str) -> String {
        let mut collected = String::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let mut buf = [0u8; 1024];
                let n = io.read(&mut buf).await.expect("server read");
                assert!(n > 0, "eof while waiting for {:?}", marker);
                collected.push_str(core::str::from_utf8(&buf[..n]).unwrap());
                if collected.contains(marker) {
                    break;
                }
            }
        })
        .await
        .expect("timed out waiting for the client");
        collected
    }

    #[tokio::test]
    async fn handshake_digest_and_connect() {
        let (client_io, mut server_io) = tokio::io::duplex(65536);
        let mut component = Component::new(
            "shakespeare.lit",
            "mycomponentsecret",
            Transport::from_stream(Box::new(client_io)),
        )
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        component
            .handlers()
            .register_connection_listener(recorder.clone());

        component.connect().await.unwrap();
        let header = read_until(&mut server_io, ">").await;
        assert!(header.contains("xmlns='jabber:component:accept'"));
        assert!(header.contains("to='shakespeare.lit'"));

        server_io
            .write_all(
                b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
                  xmlns='jabber:component:accept' from='shakespeare.lit' id='3BF96D32'>",
            )
            .await
            .unwrap();
        component.recv(TIMEOUT).await.unwrap();

        let handshake = read_until(&mut server_io, "</handshake>").await;
        let expected = sha1_hex(b"3BF96D32mycomponentsecret");
        assert_eq!(
            handshake,
            format!("<handshake>{}</handshake>", expected)
        );

        server_io.write_all(b"<handshake/>").await.unwrap();
        component.recv(TIMEOUT).await.unwrap();
        assert!(component.is_authed());
        assert_eq!(component.stream_state(), StreamState::Bound);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handshake_rejection_fails_the_session() {
        let (client_io, mut server_io) = tokio::io::duplex(65536);
        let mut component = Component::new(
            "shakespeare.lit",
            "wrongsecret",
            Transport::from_stream(Box::new(client_io)),
        )
        .unwrap();
        component.connect().await.unwrap();
        read_until(&mut server_io, ">").await;
        server_io
            .write_all(
                b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' \
                  xmlns='jabber:component:accept' id='x9f'>",
            )
            .await
            .unwrap();
        component.recv(TIMEOUT).await.unwrap();
        read_until(&mut server_io, "</handshake>").await;
        server_io
            .write_all(b"<stream:error><not-authorized/></stream:error>")
            .await
            .unwrap();
        match component.recv(TIMEOUT).await {
            Err(Error::Disconnected(DisconnectReason::AuthenticationFailed)) => (),
            other => panic!("expected auth failure, got {:?}", other),
        }
        assert!(!component.is_authed());
    }
}
