// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::*;

const TIMEOUT: Option<Duration> = Some(Duration::from_millis(200));

/// A scripted BOSH gateway on the far end of an in-memory pipe.
///
/// The 64 KiB pipe buffer lets request and response exchanges run
/// sequentially on a single task, which keeps the tests deterministic.
struct Gateway {
    io: DuplexStream,
    buf: Vec<u8>,
}

impl Gateway {
    fn new(io: DuplexStream) -> Gateway {
        Gateway {
            io,
            buf: Vec::new(),
        }
    }

    /// Reads one HTTP request, returning `(header, body)`.
    async fn read_request(&mut self) -> (String, String) {
        let header_end = loop {
            if let Some(pos) = find_subsequence(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            let mut chunk = [0u8; 1024];
            let n = self.io.read(&mut chunk).await.expect("gateway read");
            assert!(n > 0, "eof while the gateway awaited a request header");
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
            let mut chunk = [0u8; 1024];
            let n = self.io.read(&mut chunk).await.expect("gateway read");
            assert!(n > 0, "eof while the gateway awaited a request body");
            self.buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8(self.buf.drain(..length).collect()).unwrap();
        (header, body)
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

fn parse_body(xml: &str) -> Tag {
    let mut parser = Parser::new();
    match parser.feed(xml).expect("well-formed body").into_iter().next() {
        Some(StreamEvent::StreamStart(tag)) => tag,
        other => panic!("expected a <body> root, got {:?}", other),
    }
}

fn rid_of(body: &str) -> u64 {
    parse_body(body).attr("rid").unwrap().parse().unwrap()
}

fn recv_data(event: TransportEvent) -> String {
    match event {
        TransportEvent::Data(bytes) => String::from_utf8(bytes).unwrap(),
        other => panic!("expected data, got {:?}", other),
    }
}

fn pipelined_pair() -> (BoshTransport, Gateway) {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let connection = Transport::from_stream(Box::new(client_io));
    let bosh = BoshTransport::new(
        connection,
        "gateway.example.net:5280",
        "example.com",
        ConnMode::Pipelining,
    );
    (bosh, Gateway::new(server_io))
}

/// Session bootstrap and establishment over a pipelined connection.
async fn established_session(bosh: &mut BoshTransport, gateway: &mut Gateway) -> u64 {
    bosh.connect().await.expect("bosh connect");
    let (_, body) = gateway.read_request().await;
    let open = parse_body(&body);
    let rid = open.attr("rid").unwrap().parse().unwrap();
    gateway
        .respond(
            "<body sid='a1b2' requests='2' hold='1' wait='60' polling='2' \
             xmlns='http://jabber.org/protocol/httpbind'/>",
        )
        .await;
    let header = recv_data(bosh.recv(TIMEOUT).await);
    assert!(header.contains("<stream:stream"));
    assert!(header.contains("id='a1b2'"));
    // The session core reacts to the synthesized header by sending its
    // own stream header, which the BOSH layer swallows.
    assert!(bosh.send(b"<?xml version='1.0'?><stream:stream>").await);
    rid
}

#[tokio::test]
async fn bootstrap_adopts_session_parameters() {
    let (mut bosh, mut gateway) = pipelined_pair();
    bosh.connect().await.expect("bosh connect");

    let (header, body) = gateway.read_request().await;
    assert!(header.starts_with("POST /http-bind/ HTTP/1.1"));
    assert!(header.contains("Host: gateway.example.net:5280"));
    assert!(header.contains("Content-Type: text/xml; charset=utf-8"));
    // Pipelining must not ask for per-request connections.
    assert!(!header.contains("Connection: close"));

    let open = parse_body(&body);
    assert_eq!(open.name(), "body");
    assert_eq!(open.attr("ver"), Some("1.6"));
    assert_eq!(open.attr("wait"), Some("60"));
    assert_eq!(open.attr("hold"), Some("1"));
    assert_eq!(open.attr("ack"), Some("0"));
    assert_eq!(open.attr("to"), Some("example.com"));
    assert_eq!(open.attr("xmlns"), Some("http://jabber.org/protocol/httpbind"));
    assert_eq!(open.attr("xmlns:xmpp"), Some("urn:xmpp:xbosh"));
    assert_eq!(open.attr("xmpp:version"), Some("1.0"));
    let rid: u64 = open.attr("rid").unwrap().parse().unwrap();

    gateway
        .respond(
            "<body sid='a1b2' requests='2' hold='1' wait='60' polling='2' \
             xmlns='http://jabber.org/protocol/httpbind'/>",
        )
        .await;

    let header = recv_data(bosh.recv(TIMEOUT).await);
    assert!(header.contains("id='a1b2'"));
    assert_eq!(bosh.sid(), "a1b2");

    // The next request carries rid + 1 and the session id.
    assert!(bosh.send(b"<?xml version='1.0'?><stream:stream>").await);
    assert!(bosh.send(b"<presence/>").await);
    let (_, body) = gateway.read_request().await;
    let next = parse_body(&body);
    assert_eq!(next.attr("rid").unwrap(), (rid + 1).to_string());
    assert_eq!(next.attr("sid"), Some("a1b2"));
    assert!(body.contains("<presence/>"));
}

#[tokio::test]
async fn request_overflow_concatenates_into_one_body() {
    let (mut bosh, mut gateway) = pipelined_pair();
    let rid = established_session(&mut bosh, &mut gateway).await;

    // Two requests fill the negotiated limit of 2.
    assert!(bosh.send(b"<a/>").await);
    assert!(bosh.send(b"<b/>").await);
    // Two more stanzas have to wait in the send buffer.
    assert!(bosh.send(b"<c/>").await);
    assert!(bosh.send(b"<d/>").await);

    let (_, first) = gateway.read_request().await;
    assert!(first.contains("<a/>"));
    assert_eq!(rid_of(&first), rid + 1);
    let (_, second) = gateway.read_request().await;
    assert!(second.contains("<b/>"));
    assert_eq!(rid_of(&second), rid + 2);

    // A response frees a slot; the buffered stanzas go out together.
    gateway
        .respond("<body xmlns='http://jabber.org/protocol/httpbind'/>")
        .await;
    assert!(matches!(bosh.recv(TIMEOUT).await, TransportEvent::Timeout));
    assert!(matches!(bosh.recv(TIMEOUT).await, TransportEvent::Timeout));

    let (_, third) = gateway.read_request().await;
    assert!(third.contains("<c/><d/>"), "buffer not concatenated: {}", third);
    assert_eq!(rid_of(&third), rid + 3);
}

#[tokio::test]
async fn stream_restart_body_and_synthesized_header() {
    let (mut bosh, mut gateway) = pipelined_pair();
    established_session(&mut bosh, &mut gateway).await;

    // A repeated stream header means restart.
    assert!(bosh.send(b"<?xml version='1.0'?><stream:stream>").await);
    let (_, restart) = gateway.read_request().await;
    let restart_body = parse_body(&restart);
    assert_eq!(restart_body.attr("xmpp:restart"), Some("true"));
    assert_eq!(restart_body.attr("to"), Some("example.com"));
    assert!(restart.ends_with("/>"), "restart body must carry no payload");

    // Stanzas sent after the restart go into a later request.
    assert!(bosh.send(b"<z/>").await);
    let (_, after) = gateway.read_request().await;
    assert!(after.contains("<z/>"));

    gateway
        .respond(
            "<body xmlns='http://jabber.org/protocol/httpbind'>\
             <stream:features/></body>",
        )
        .await;
    let header = recv_data(bosh.recv(TIMEOUT).await);
    assert!(header.contains("<stream:stream"), "header not re-synthesized");
    let features = recv_data(bosh.recv(TIMEOUT).await);
    assert_eq!(features, "<stream:features/>");
}

#[tokio::test]
async fn gateway_terminate_closes_the_session() {
    let (mut bosh, mut gateway) = pipelined_pair();
    established_session(&mut bosh, &mut gateway).await;

    assert!(bosh.send(b"<presence/>").await);
    gateway.read_request().await;
    gateway
        .respond(
            "<body type='terminate' condition='policy-violation' \
             xmlns='http://jabber.org/protocol/httpbind'/>",
        )
        .await;
    match bosh.recv(TIMEOUT).await {
        TransportEvent::Closed(DisconnectReason::StreamClosed) => (),
        other => panic!("expected stream-closed, got {:?}", other),
    }
    assert_eq!(bosh.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn persistent_mode_rotates_the_pool() {
    let (client1, server1) = tokio::io::duplex(65536);
    let (client2, server2) = tokio::io::duplex(65536);
    let mut bosh = BoshTransport::new(
        Transport::from_stream(Box::new(client1)),
        "gateway.example.net:5280",
        "example.com",
        ConnMode::PersistentHttp,
    );
    bosh.add_connection(Transport::from_stream(Box::new(client2)));
    let mut gateway1 = Gateway::new(server1);
    let mut gateway2 = Gateway::new(server2);

    // The idle pool is reused most-recently-added first, so the
    // session request goes out on the second connection.
    bosh.connect().await.expect("bosh connect");
    let (_, body) = gateway2.read_request().await;
    let rid = rid_of(&body);
    gateway2
        .respond(
            "<body sid='pool9' requests='2' hold='1' wait='60' \
             xmlns='http://jabber.org/protocol/httpbind'/>",
        )
        .await;
    recv_data(bosh.recv(TIMEOUT).await);
    assert!(bosh.send(b"<?xml version='1.0'?><stream:stream>").await);

    // First stanza reuses the connection that just came back to the
    // pool; the second, dispatched while the first request is open,
    // takes the other pool member.
    assert!(bosh.send(b"<a/>").await);
    let (_, first) = gateway2.read_request().await;
    assert!(first.contains("<a/>"));
    assert_eq!(rid_of(&first), rid + 1);

    assert!(bosh.send(b"<b/>").await);
    let (_, second) = gateway1.read_request().await;
    assert!(second.contains("<b/>"));
    assert_eq!(rid_of(&second), rid + 2);

    // Responses are consumed oldest-request first.
    gateway2
        .respond("<body xmlns='http://jabber.org/protocol/httpbind'/>")
        .await;
    assert!(matches!(bosh.recv(TIMEOUT).await, TransportEvent::Timeout));
    gateway1
        .respond(
            "<body xmlns='http://jabber.org/protocol/httpbind'>\
             <iq type='result' id='x'/></body>",
        )
        .await;
    let stanza = recv_data(bosh.recv(TIMEOUT).await);
    assert_eq!(stanza, "<iq type='result' id='x'/>");
}

#[tokio::test]
async fn legacy_mode_marks_connections_close() {
    let (client_io, server_io) = tokio::io::duplex(65536);
    let mut bosh = BoshTransport::new(
        Transport::from_stream(Box::new(client_io)),
        "gateway.example.net:5280",
        "example.com",
        ConnMode::LegacyHttp,
    );
    let mut gateway = Gateway::new(server_io);
    bosh.connect().await.expect("bosh connect");
    let (header, _) = gateway.read_request().await;
    assert!(header.contains("Connection: close"));
}
