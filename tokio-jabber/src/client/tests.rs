// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::*;
use crate::handler::{ConnectionListener, MessageHandler};
use crate::stanza::Message;
use crate::transport::{BoshTransport, ConnMode};

const TIMEOUT: Option<Duration> = Some(Duration::from_millis(200));

/// The server side of a scripted exchange.
struct ServerScript {
    io: DuplexStream,
}

impl ServerScript {
    async fn read_until(&mut self, marker: &str) -> String {
        let mut collected = String::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let mut buf = [0u8; 2048];
                let n = self.io.read(&mut buf).await.expect("server read");
                assert!(n > 0, "eof while waiting for {:?}", marker);
                collected.push_str(core::str::from_utf8(&buf[..n]).unwrap());
                if collected.contains(marker) {
                    break;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}, got {:?}", marker, collected));
        collected
    }

    async fn write(&mut self, data: &str) {
        self.io
            .write_all(data.as_bytes())
            .await
            .expect("server write");
    }
}

#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    disconnects: Mutex<Vec<DisconnectReason>>,
}

impl ConnectionListener for Recorder {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.disconnects.lock().unwrap().push(reason);
    }
}

#[derive(Default)]
struct MessageCounter {
    count: AtomicUsize,
}

impl MessageHandler for MessageCounter {
    fn handle_message(&self, _message: &Message) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct IqRecorder {
    responses: Mutex<Vec<(Option<String>, u32)>>,
}

impl IqHandler for IqRecorder {
    fn handle_iq(&self, _iq: &Iq) -> bool {
        false
    }

    fn handle_iq_id(&self, iq: &Iq, context: u32) {
        self.responses
            .lock()
            .unwrap()
            .push((iq.id().map(str::to_owned), context));
    }
}

fn pair(jid: &str, password: &str) -> (Client, ServerScript) {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let jid: Jid = jid.parse().unwrap();
    let client = Client::new_with_transport(
        jid,
        password,
        Transport::from_stream(Box::new(client_io)),
    );
    (client, ServerScript { io: server_io })
}

/// Runs the PLAIN + bind login against a scripted server, leaving the
/// client in the `Bound` state.
async fn plain_login(client: &mut Client, server: &mut ServerScript) {
    client.connect().await.expect("client connect");
    let header = server.read_until(">").await;
    assert!(header.contains("to='example.com'"));
    assert!(header.contains("xmlns='jabber:client'"));

    server
        .write(
            "<?xml version='1.0'?>\
             <stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             id='s1' from='example.com' version='1.0'>\
             <stream:features>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.expect("recv features");

    let auth = server.read_until("</auth>").await;
    assert!(auth.contains("mechanism='PLAIN'"));
    assert!(auth.contains("AGp1bGlldABzZWNyZXQ="));

    server
        .write("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;
    client.recv(TIMEOUT).await.expect("recv success");

    // The stream restarts after authentication.
    server.read_until(">").await;
    server
        .write(
            "<?xml version='1.0'?>\
             <stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' \
             id='s2' from='example.com' version='1.0'>\
             <stream:features>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.expect("recv features after auth");

    let bind = server.read_until("</iq>").await;
    assert!(bind.contains("id='bind'"));
    assert!(bind.contains("urn:ietf:params:xml:ns:xmpp-bind"));

    server
        .write(
            "<iq id='bind' type='result'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>juliet@example.com/balcony</jid></bind></iq>",
        )
        .await;
    client.recv(TIMEOUT).await.expect("recv bind result");
}

#[tokio::test]
async fn plain_tcp_login_reaches_bound() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    let recorder = Arc::new(Recorder::default());
    client
        .handlers()
        .register_connection_listener(recorder.clone());

    plain_login(&mut client, &mut server).await;

    assert!(client.is_authed());
    assert_eq!(client.stream_state(), StreamState::Bound);
    assert_eq!(client.jid().to_string(), "juliet@example.com/balcony");
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    assert!(recorder.disconnects.lock().unwrap().is_empty());

    // Login ends with the automatic initial presence.
    let presence = server.read_until("</presence>").await;
    assert!(presence.contains("<priority>0</priority>"));
}

#[tokio::test]
async fn session_feature_is_negotiated_after_bind() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    client.set_auto_presence(false);
    client.connect().await.unwrap();
    server.read_until(">").await;
    server
        .write(
            "<stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>\
             <stream:features>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    server.read_until("</auth>").await;
    server
        .write("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;
    client.recv(TIMEOUT).await.unwrap();
    server.read_until(">").await;
    server
        .write(
            "<stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' id='s2' version='1.0'>\
             <stream:features>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             <session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    server.read_until("</iq>").await;
    server
        .write(
            "<iq id='bind' type='result'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>juliet@example.com/chamber</jid></bind></iq>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    assert_eq!(client.stream_state(), StreamState::SessionCreating);

    let session = server.read_until("</iq>").await;
    assert!(session.contains("id='session'"));
    assert!(session.contains("urn:ietf:params:xml:ns:xmpp-session"));
    server.write("<iq id='session' type='result'/>").await;
    client.recv(TIMEOUT).await.unwrap();
    assert_eq!(client.stream_state(), StreamState::Bound);
}

#[tokio::test]
async fn iq_responses_are_delivered_exactly_once() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    client.set_auto_presence(false);
    plain_login(&mut client, &mut server).await;

    let recorder = Arc::new(IqRecorder::default());
    let iq = Iq::get(
        "q7",
        Tag::new("query").attribute("xmlns", "jabber:iq:version"),
    );
    assert!(client.send_iq(iq, recorder.clone(), 7).await);
    server.read_until("</iq>").await;

    server
        .write(
            "<iq id='q7' type='result'>\
             <query xmlns='jabber:iq:version'/></iq>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    // A duplicate response must not reach the handler again.
    server
        .write(
            "<iq id='q7' type='result'>\
             <query xmlns='jabber:iq:version'/></iq>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();

    let responses = recorder.responses.lock().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0], (Some("q7".to_owned()), 7));
}

#[tokio::test]
async fn unhandled_iq_requests_get_service_unavailable() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    client.set_auto_presence(false);
    plain_login(&mut client, &mut server).await;

    server
        .write(
            "<iq type='get' id='z1' from='romeo@example.net'>\
             <query xmlns='unknown:ns'/></iq>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();

    let reply = server.read_until("</iq>").await;
    assert!(reply.contains("type='error'"));
    assert!(reply.contains("id='z1'"));
    assert!(reply.contains("to='romeo@example.net'"));
    assert!(reply.contains("service-unavailable"));
}

#[tokio::test]
async fn deregistered_handler_is_not_invoked() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    client.set_auto_presence(false);
    plain_login(&mut client, &mut server).await;

    let kept = Arc::new(MessageCounter::default());
    let removed = Arc::new(MessageCounter::default());
    let kept_handle: Arc<dyn MessageHandler + Send + Sync> = kept.clone();
    let removed_handle: Arc<dyn MessageHandler + Send + Sync> = removed.clone();
    client.handlers().register_message_handler(kept_handle);
    client
        .handlers()
        .register_message_handler(removed_handle.clone());
    client.handlers().remove_message_handler(&removed_handle);

    server
        .write("<message from='romeo@example.net'><body>news?</body></message>")
        .await;
    client.recv(TIMEOUT).await.unwrap();

    assert_eq!(kept.count.load(Ordering::SeqCst), 1);
    assert_eq!(removed.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn starttls_is_requested_and_refusal_is_fatal() {
    let (mut client, mut server) = pair("juliet@example.com", "secret");
    let recorder = Arc::new(Recorder::default());
    client
        .handlers()
        .register_connection_listener(recorder.clone());

    client.connect().await.unwrap();
    server.read_until(">").await;
    server
        .write(
            "<stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>\
             <stream:features>\
             <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    assert_eq!(client.stream_state(), StreamState::TlsNegotiating);

    let request = server.read_until("/>").await;
    assert!(request.contains("<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"));

    server
        .write("<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
        .await;
    match client.recv(TIMEOUT).await {
        Err(Error::Disconnected(DisconnectReason::TlsFailed)) => (),
        other => panic!("expected TLS failure, got {:?}", other),
    }
    assert_eq!(
        *recorder.disconnects.lock().unwrap(),
        vec![DisconnectReason::TlsFailed]
    );
}

/// A scripted BOSH gateway, HTTP framing included.
struct BoshGateway {
    io: DuplexStream,
    buf: Vec<u8>,
}

impl BoshGateway {
    async fn read_request(&mut self) -> String {
        fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
            haystack
                .windows(needle.len())
                .position(|window| window == needle)
        }
        let header_end = loop {
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            let mut chunk = [0u8; 2048];
            let n = self.io.read(&mut chunk).await.expect("gateway read");
            assert!(n > 0, "eof while awaiting a BOSH request");
            self.buf.extend_from_slice(&chunk[..n]);
        };
        let header = String::from_utf8(self.buf[..header_end].to_vec()).unwrap();
        self.buf.drain(..header_end + 4);
        let length: usize = header
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .expect("request has a Content-Length")
            .parse()
            .unwrap();
        while self.buf.len() < length {
            let mut chunk = [0u8; 2048];
            let n = self.io.read(&mut chunk).await.expect("gateway read");
            assert!(n > 0, "eof while awaiting a BOSH request body");
            self.buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(self.buf.drain(..length).collect()).unwrap()
    }

    async fn respond(&mut self, body: &str) {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        self.io
            .write_all(response.as_bytes())
            .await
            .expect("gateway write");
    }
}

#[tokio::test]
async fn plain_login_over_bosh_reaches_bound() {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let bosh = BoshTransport::new(
        Transport::from_stream(Box::new(client_io)),
        "gateway.example.net:5280",
        "example.com",
        ConnMode::Pipelining,
    );
    let jid: Jid = "juliet@example.com".parse().unwrap();
    let mut client =
        Client::new_with_transport(jid, "secret", Transport::Bosh(Box::new(bosh)));
    client.set_auto_presence(false);
    let mut gateway = BoshGateway {
        io: server_io,
        buf: Vec::new(),
    };

    // The session creation request replaces the stream header.
    client.connect().await.expect("client connect");
    let open = gateway.read_request().await;
    assert!(open.contains("to='example.com'"));
    gateway
        .respond(
            "<body sid='a1b2' requests='2' hold='1' wait='60' \
             xmlns='http://jabber.org/protocol/httpbind'>\
             <stream:features>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms>\
             </stream:features></body>",
        )
        .await;

    // First the synthesized stream header, then the features, which
    // trigger the SASL request.
    client.recv(TIMEOUT).await.unwrap();
    assert_eq!(client.stream_id(), "a1b2");
    client.recv(TIMEOUT).await.unwrap();

    let auth = gateway.read_request().await;
    assert!(auth.contains("mechanism='PLAIN'"));
    assert!(auth.contains("AGp1bGlldABzZWNyZXQ="));
    gateway
        .respond(
            "<body xmlns='http://jabber.org/protocol/httpbind'>\
             <success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/></body>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();

    // Authentication restarts the stream: the next request must be the
    // restart body with no payload.
    let restart = gateway.read_request().await;
    assert!(restart.contains("xmpp:restart='true'"));
    assert!(restart.ends_with("/>"));
    gateway
        .respond(
            "<body xmlns='http://jabber.org/protocol/httpbind'>\
             <stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
             </stream:features></body>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    client.recv(TIMEOUT).await.unwrap();

    let bind = gateway.read_request().await;
    assert!(bind.contains("id='bind'"));
    gateway
        .respond(
            "<body xmlns='http://jabber.org/protocol/httpbind'>\
             <iq id='bind' type='result'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <jid>juliet@example.com/balcony</jid></bind></iq></body>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();

    assert!(client.is_authed());
    assert_eq!(client.stream_state(), StreamState::Bound);
    assert_eq!(client.jid().to_string(), "juliet@example.com/balcony");
}

#[tokio::test]
async fn sasl_failure_disconnects_with_auth_failed() {
    let (mut client, mut server) = pair("juliet@example.com", "badpass");
    let recorder = Arc::new(Recorder::default());
    client
        .handlers()
        .register_connection_listener(recorder.clone());

    client.connect().await.unwrap();
    server.read_until(">").await;
    server
        .write(
            "<stream:stream xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>\
             <stream:features>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>PLAIN</mechanism></mechanisms>\
             </stream:features>",
        )
        .await;
    client.recv(TIMEOUT).await.unwrap();
    server.read_until("</auth>").await;
    server
        .write(
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <not-authorized/></failure>",
        )
        .await;
    match client.recv(TIMEOUT).await {
        Err(Error::Disconnected(DisconnectReason::AuthenticationFailed)) => (),
        other => panic!("expected auth failure, got {:?}", other),
    }
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
    assert_eq!(
        *recorder.disconnects.lock().unwrap(),
        vec![DisconnectReason::AuthenticationFailed]
    );
}
