// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! BOSH (XEP-0124): the XMPP stream tunnelled through HTTP long
//! polling.
//!
//! A pool of inner transports carries HTTP requests to the gateway.
//! Every transport is in exactly one of two sequences: `active` holds
//! connections with an unanswered request, oldest first; `idle` holds
//! connections available for reuse, most recently used first. To the
//! session core the whole construction looks like one continuous XMPP
//! stream: a stream header is synthesized once the gateway assigns a
//! session id and again after every stream restart, and the children of
//! each response `<body/>` are surfaced in document order.

use core::time::Duration;
use std::collections::VecDeque;

use log::{debug, trace, warn};
use minitag::{Parser, StreamEvent, Tag};
use rand::{thread_rng, Rng};
use tokio::time::Instant;

use crate::error::{DisconnectReason, Error};
use crate::ns;
use crate::transport::{Statistics, Transport, TransportEvent, TransportState};

/// How the pool of inner connections is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnMode {
    /// One request per connection; the server closes each connection
    /// after its response.
    LegacyHttp,
    /// One outstanding request per connection; connections are reused.
    PersistentHttp,
    /// Multiple requests multiplexed on a single connection, responses
    /// matched to requests in FIFO order.
    Pipelining,
}

/// Idle connections kept beyond the request limit.
const IDLE_SLACK: usize = 2;

const DEFAULT_PATH: &str = "/http-bind/";
const DEFAULT_WAIT: u32 = 60;
const DEFAULT_HOLD: u32 = 1;
const DEFAULT_REQUESTS: u32 = 2;

/// The BOSH transport.
pub struct BoshTransport {
    mode: ConnMode,
    /// Value of the HTTP `Host` header.
    host: String,
    path: String,
    /// The XMPP domain behind the gateway.
    server: String,
    template: Box<Transport>,
    /// Connections carrying an unanswered request, oldest at the front.
    active: VecDeque<Transport>,
    /// Connections available for reuse, most recent at the back.
    idle: Vec<Transport>,
    state: TransportState,

    sid: String,
    rid: u64,
    wait: u32,
    hold: u32,
    max_open_requests: u32,
    open_requests: u32,
    polling_min: Duration,
    last_empty_poll: Option<Instant>,

    initial_stream_sent: bool,
    /// A stream restart was requested and its `<body/>` has not been
    /// dispatched yet.
    restart_pending: bool,
    /// The next response must be preceded by a synthesized stream
    /// header.
    restart_header_due: bool,
    send_buffer: String,
    /// Synthesized stream bytes not yet pulled by the session.
    out_queue: VecDeque<Vec<u8>>,
    /// Set when the gateway terminated the session; reported once the
    /// out queue has drained.
    pending_close: Option<DisconnectReason>,

    // HTTP response assembly for the connection currently being read.
    rx_buf: Vec<u8>,
    content_length: Option<usize>,

    stats: Statistics,
}

impl BoshTransport {
    /// Creates a BOSH transport around an initial inner connection.
    ///
    /// `host` is the gateway endpoint for the HTTP `Host` header
    /// (`gateway.example.net:5280`), `server` the XMPP domain the
    /// gateway routes to. More pool members can be provided up front
    /// with [`add_connection`][`Self::add_connection`]; otherwise the
    /// pool grows by cloning the initial connection's configuration.
    pub fn new(
        connection: Transport,
        host: impl Into<String>,
        server: impl Into<String>,
        mode: ConnMode,
    ) -> BoshTransport {
        let template = Box::new(connection.new_instance());
        BoshTransport {
            mode,
            host: host.into(),
            path: DEFAULT_PATH.to_owned(),
            server: server.into(),
            template,
            active: VecDeque::new(),
            idle: vec![connection],
            state: TransportState::Disconnected,
            sid: String::new(),
            rid: 0,
            wait: DEFAULT_WAIT,
            hold: DEFAULT_HOLD,
            max_open_requests: DEFAULT_REQUESTS,
            open_requests: 0,
            polling_min: Duration::ZERO,
            last_empty_poll: None,
            initial_stream_sent: false,
            restart_pending: false,
            restart_header_due: false,
            send_buffer: String::new(),
            out_queue: VecDeque::new(),
            pending_close: None,
            rx_buf: Vec::new(),
            content_length: None,
            stats: Statistics::default(),
        }
    }

    /// Adds a pre-configured connection to the idle pool.
    pub fn add_connection(&mut self, connection: Transport) {
        self.idle.push(connection);
    }

    /// Overrides the HTTP request path (default `/http-bind/`).
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The gateway-assigned session id, empty before establishment.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// The request id of the last dispatched request.
    pub fn rid(&self) -> u64 {
        self.rid
    }

    /// Connects one pool member and posts the session creation request.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.state != TransportState::Disconnected {
            return Ok(());
        }
        self.state = TransportState::Connecting;
        debug!("bosh initiating connection to {}", self.host);

        let mut connection = self.checkout_connection().await?;

        self.rid = thread_rng().gen_range(1_000_000u64..100_000_000);
        let body = Tag::new("body")
            .attribute("content", "text/xml; charset=utf-8")
            .attribute("hold", self.hold.to_string())
            .attribute("rid", self.rid.to_string())
            .attribute("ver", "1.6")
            .attribute("wait", self.wait.to_string())
            .attribute("ack", "0")
            .attribute("route", format!("xmpp:{}:5222", self.server))
            .attribute("xml:lang", "en")
            .attribute("xmpp:version", "1.0")
            .attribute("to", self.server.clone())
            .attribute("xmlns", ns::HTTPBIND)
            .attribute("xmlns:xmpp", ns::XBOSH);

        let request = self.http_wrap(&body.xml());
        if !connection.send_inner(request.as_bytes()).await {
            self.state = TransportState::Disconnected;
            return Err(Error::Disconnected(DisconnectReason::IoError));
        }
        self.stats.total_out += request.len() as u64;
        self.active.push_back(connection);
        self.open_requests = 1;
        debug!("bosh session creation request sent, rid {}", self.rid);
        Ok(())
    }

    /// Accepts stream bytes from the session core.
    ///
    /// Stream headers and the stream footer have no direct equivalent
    /// on a BOSH session: the first header is swallowed (the session
    /// creation request already opened the stream), later headers turn
    /// into stream restart requests, and the footer is handled by
    /// [`disconnect`][`Self::disconnect`].
    pub async fn send(&mut self, data: &[u8]) -> bool {
        if self.state == TransportState::Disconnected {
            return false;
        }
        let data = match core::str::from_utf8(data) {
            Ok(data) => data,
            Err(_) => return false,
        };

        if data.starts_with("<?") {
            if self.initial_stream_sent {
                trace!("bosh stream restart requested");
                self.restart_pending = true;
                self.flush_one().await;
            } else {
                trace!("bosh initial stream header dropped");
                self.initial_stream_sent = true;
            }
            return true;
        }
        if data == "</stream:stream>" {
            return true;
        }

        self.send_buffer.push_str(data);
        self.flush_one().await;
        true
    }

    /// Pulls the next stream event.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> TransportEvent {
        if let Some(data) = self.out_queue.pop_front() {
            return TransportEvent::Data(data);
        }
        if let Some(reason) = self.pending_close.take() {
            self.state = TransportState::Disconnected;
            return TransportEvent::Closed(reason);
        }
        if self.state == TransportState::Disconnected {
            return TransportEvent::Closed(DisconnectReason::NotConnected);
        }

        self.flush_one().await;

        // Responses are read from the oldest unanswered request. In
        // pipelining mode there is exactly one connection anyway.
        let connection = match self.active.front_mut() {
            Some(connection) => connection,
            None => {
                // Nothing in flight and nothing to send. Wait out the
                // timeout so the caller's pull loop does not spin.
                tokio::time::sleep(timeout.unwrap_or(Duration::from_millis(100))).await;
                return TransportEvent::Timeout;
            }
        };

        match connection.recv_inner(timeout).await {
            TransportEvent::Timeout => TransportEvent::Timeout,
            TransportEvent::Data(bytes) => {
                self.stats.total_in += bytes.len() as u64;
                self.rx_buf.extend_from_slice(&bytes);
                match self.process_http_buffer().await {
                    Ok(()) => match self.out_queue.pop_front() {
                        Some(data) => TransportEvent::Data(data),
                        None => match self.pending_close.take() {
                            Some(reason) => {
                                self.state = TransportState::Disconnected;
                                TransportEvent::Closed(reason)
                            }
                            None => TransportEvent::Timeout,
                        },
                    },
                    Err(reason) => {
                        self.state = TransportState::Disconnected;
                        TransportEvent::Closed(reason)
                    }
                }
            }
            TransportEvent::Closed(reason) => self.member_closed(reason),
        }
    }

    /// Sends the session terminator, flushing any buffered data into
    /// it. Pool members stay open; [`cleanup`][`Self::cleanup`] closes
    /// them.
    pub async fn disconnect(&mut self, _reason: DisconnectReason) {
        if self.state != TransportState::Connected || self.sid.is_empty() {
            self.state = TransportState::Disconnected;
            return;
        }
        self.rid += 1;
        let body = Tag::new("body")
            .attribute("rid", self.rid.to_string())
            .attribute("sid", self.sid.clone())
            .attribute("type", "terminate")
            .attribute("xml:lang", "en")
            .attribute("xmlns", ns::HTTPBIND);
        let buffered = core::mem::take(&mut self.send_buffer);
        let xml = if buffered.is_empty() {
            body.xml()
        } else {
            // The buffer already holds serialized XML, so splice it in
            // instead of re-parsing it into children.
            let mut xml = body.xml();
            xml.truncate(xml.len() - 2);
            xml.push('>');
            xml.push_str(&buffered);
            xml.push_str("</body>");
            xml
        };
        let request = self.http_wrap(&xml);
        if let Some(connection) = self.post_target().await {
            if connection.send_inner(request.as_bytes()).await {
                debug!("bosh disconnection request sent");
            }
        }
        self.state = TransportState::Disconnected;
    }

    /// Releases every pool member.
    pub fn cleanup(&mut self) {
        for connection in self.active.iter_mut() {
            connection.cleanup();
        }
        for connection in self.idle.iter_mut() {
            connection.cleanup();
        }
        self.active.clear();
        self.idle.clear();
        self.rx_buf.clear();
        self.content_length = None;
        self.open_requests = 0;
        self.state = TransportState::Disconnected;
    }

    /// The current connection state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Byte counters over all pool members.
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Clones the configuration into a new, disconnected transport with
    /// an empty session.
    pub fn new_instance(&self) -> BoshTransport {
        let mut instance = BoshTransport::new(
            self.template.new_instance(),
            self.host.clone(),
            self.server.clone(),
            self.mode,
        );
        instance.path = self.path.clone();
        instance
    }

    /// Whether pool members use a TLS layer.
    pub fn is_secure(&self) -> bool {
        matches!(*self.template, Transport::Tls(_))
    }

    fn http_wrap(&self, body: &str) -> String {
        let mut request = String::with_capacity(body.len() + 128);
        request.push_str("POST ");
        request.push_str(&self.path);
        request.push_str(" HTTP/1.1\r\nHost: ");
        request.push_str(&self.host);
        request.push_str("\r\n");
        if self.mode == ConnMode::LegacyHttp {
            request.push_str("Connection: close\r\n");
        }
        request.push_str("Content-Type: text/xml; charset=utf-8\r\nContent-Length: ");
        request.push_str(&body.len().to_string());
        request.push_str("\r\n\r\n");
        request.push_str(body);
        request
    }

    /// Whether a request could be dispatched right now.
    fn can_place_request(&self) -> bool {
        if self.open_requests >= self.max_open_requests {
            return false;
        }
        match self.mode {
            ConnMode::Pipelining => !self.active.is_empty(),
            ConnMode::LegacyHttp | ConnMode::PersistentHttp => {
                !self.idle.is_empty()
                    || self.active.len() + self.idle.len()
                        < self.max_open_requests as usize + IDLE_SLACK
            }
        }
    }

    /// Performs at most one outbound action: a pending stream restart
    /// first, otherwise draining the send buffer, otherwise an empty
    /// poll. Draining and polling never happen in the same call.
    async fn flush_one(&mut self) {
        if self.state == TransportState::Disconnected {
            return;
        }
        if self.restart_pending {
            if !self.can_place_request() {
                return;
            }
            self.rid += 1;
            let body = Tag::new("body")
                .attribute("rid", self.rid.to_string())
                .attribute("sid", self.sid.clone())
                .attribute("xmpp:restart", "true")
                .attribute("to", self.server.clone())
                .attribute("xml:lang", "en")
                .attribute("xmlns", ns::HTTPBIND)
                .attribute("xmlns:xmpp", ns::XBOSH);
            debug!("bosh restarting stream, rid {}", self.rid);
            if self.post_body(body.xml()).await {
                self.restart_pending = false;
                self.restart_header_due = true;
            } else {
                self.rid -= 1;
            }
            return;
        }

        if self.sid.is_empty() {
            // Session not established yet; payload stays buffered.
            return;
        }

        if !self.send_buffer.is_empty() {
            if !self.can_place_request() {
                trace!("bosh request limit reached, data stays in the send buffer");
                return;
            }
            let payload = core::mem::take(&mut self.send_buffer);
            self.rid += 1;
            let xml = format!(
                "<body rid='{}' sid='{}' xmlns='{}'>{}</body>",
                self.rid, self.sid, ns::HTTPBIND, payload
            );
            if !self.post_body(xml).await {
                self.rid -= 1;
                self.send_buffer = payload;
            }
            return;
        }

        // Empty poll: only with no request in flight and the polling
        // interval honoured.
        if self.open_requests > 0 || !self.can_place_request() {
            return;
        }
        if let Some(last) = self.last_empty_poll {
            if last.elapsed() < self.polling_min {
                return;
            }
        }
        self.rid += 1;
        let xml = format!(
            "<body rid='{}' sid='{}' xmlns='{}'/>",
            self.rid, self.sid, ns::HTTPBIND
        );
        trace!("bosh sending empty polling request, rid {}", self.rid);
        if self.post_body(xml).await {
            self.last_empty_poll = Some(Instant::now());
        } else {
            self.rid -= 1;
        }
    }

    /// Picks (or establishes) the connection the next request goes on.
    async fn post_target(&mut self) -> Option<&mut Transport> {
        match self.mode {
            ConnMode::Pipelining => self.active.back_mut(),
            ConnMode::LegacyHttp | ConnMode::PersistentHttp => {
                match self.checkout_connection().await {
                    Ok(connection) => {
                        self.active.push_back(connection);
                        self.active.back_mut()
                    }
                    Err(_) => None,
                }
            }
        }
    }

    /// Takes an idle connection (most recently used first), connecting
    /// it if needed, or grows the pool from the template.
    async fn checkout_connection(&mut self) -> Result<Transport, Error> {
        let mut connection = match self.idle.pop() {
            Some(connection) => connection,
            None => self.template.new_instance(),
        };
        if connection.state() == TransportState::Disconnected {
            trace!("bosh connecting a pool member");
            connection.connect_inner().await?;
        }
        Ok(connection)
    }

    /// Wraps a `<body/>` into HTTP and dispatches it.
    async fn post_body(&mut self, body: String) -> bool {
        let request = self.http_wrap(&body);
        let request_len = request.len() as u64;
        let sent = match self.post_target().await {
            Some(connection) => connection.send_inner(request.as_bytes()).await,
            None => false,
        };
        if sent {
            self.open_requests += 1;
            self.stats.total_out += request_len;
            trace!(
                "bosh request dispatched, {} of {} slots in use",
                self.open_requests,
                self.max_open_requests
            );
        } else {
            warn!("bosh could not dispatch a request");
        }
        sent
    }

    /// Consumes as many complete HTTP responses from the assembly
    /// buffer as are available.
    async fn process_http_buffer(&mut self) -> Result<(), DisconnectReason> {
        loop {
            if self.content_length.is_none() {
                let Some(header_len) = find_subsequence(&self.rx_buf, b"\r\n\r\n") else {
                    return Ok(());
                };
                let header = String::from_utf8_lossy(&self.rx_buf[..header_len]).into_owned();
                self.rx_buf.drain(..header_len + 4);
                self.content_length = Some(parse_http_header(&header)?);
            }
            let length = self.content_length.unwrap_or(0);
            if self.rx_buf.len() < length {
                return Ok(());
            }
            let body: Vec<u8> = self.rx_buf.drain(..length).collect();
            self.content_length = None;
            let body = String::from_utf8_lossy(&body).into_owned();
            trace!("bosh received response body: {}", body);
            self.response_complete().await;
            self.handle_body(&body)?;
        }
    }

    /// Books a finished response: frees the request slot and reassigns
    /// the connection according to the mode.
    async fn response_complete(&mut self) {
        self.open_requests = self.open_requests.saturating_sub(1);
        match self.mode {
            ConnMode::LegacyHttp => {
                if let Some(mut connection) = self.active.pop_front() {
                    connection.disconnect_inner().await;
                    connection.cleanup();
                    self.park_connection(connection);
                }
            }
            ConnMode::PersistentHttp => {
                if let Some(connection) = self.active.pop_front() {
                    self.park_connection(connection);
                }
            }
            // The connection stays active; responses match requests in
            // FIFO order.
            ConnMode::Pipelining => (),
        }
    }

    fn park_connection(&mut self, connection: Transport) {
        let cap = self.max_open_requests as usize + IDLE_SLACK;
        if self.active.len() + self.idle.len() < cap {
            self.idle.push(connection);
        }
        // Beyond the cap the connection is simply dropped (detached).
    }

    /// Interprets one response `<body/>`.
    fn handle_body(&mut self, xml: &str) -> Result<(), DisconnectReason> {
        let mut parser = Parser::new();
        let events = match parser.feed(xml) {
            Ok(events) => events,
            Err(e) => {
                warn!("bosh response body is not well-formed: {}", e);
                return Err(DisconnectReason::IoError);
            }
        };
        for event in events {
            match event {
                StreamEvent::StreamStart(body) => {
                    if body.name() != "body" {
                        warn!("bosh response root is <{}>, not <body>", body.name());
                        return Err(DisconnectReason::IoError);
                    }
                    self.handle_body_open(&body)?;
                }
                StreamEvent::Stanza(child) => {
                    self.out_queue.push_back(child.xml().into_bytes());
                }
                StreamEvent::StreamEnd => (),
            }
        }
        Ok(())
    }

    fn handle_body_open(&mut self, body: &Tag) -> Result<(), DisconnectReason> {
        if matches!(body.attr("type"), Some("terminate") | Some("terminal")) {
            debug!(
                "bosh session terminated by the gateway: {}",
                body.attr("condition").unwrap_or("no condition")
            );
            self.pending_close = Some(DisconnectReason::StreamClosed);
            return Ok(());
        }

        if self.sid.is_empty() {
            match body.attr("sid") {
                Some(sid) => {
                    self.sid = sid.to_owned();
                    self.state = TransportState::Connected;
                }
                None => {
                    warn!("bosh session creation response carries no sid");
                    return Err(DisconnectReason::IoError);
                }
            }
            if let Some(requests) = body.attr("requests").and_then(|v| v.parse().ok()) {
                if requests < self.max_open_requests {
                    self.max_open_requests = requests;
                }
                debug!("bosh parameter 'requests' now {}", self.max_open_requests);
            }
            if let Some(hold) = body.attr("hold").and_then(|v| v.parse().ok()) {
                if hold < self.hold {
                    self.hold = hold;
                }
                debug!("bosh parameter 'hold' now {}", self.hold);
            }
            if let Some(wait) = body.attr("wait").and_then(|v| v.parse().ok()) {
                if wait < self.wait {
                    self.wait = wait;
                }
                debug!("bosh parameter 'wait' now {} seconds", self.wait);
            }
            if let Some(polling) = body.attr("polling").and_then(|v| v.parse().ok()) {
                self.polling_min = Duration::from_secs(polling);
                debug!(
                    "bosh parameter 'polling' now {} seconds",
                    self.polling_min.as_secs()
                );
            }
            self.queue_stream_header();
        } else if self.restart_header_due {
            self.restart_header_due = false;
            self.queue_stream_header();
        }
        Ok(())
    }

    /// Makes the session core believe it is reading a real XMPP stream.
    fn queue_stream_header(&mut self) {
        let header = format!(
            "<?xml version='1.0'?>\
             <stream:stream xmlns:stream='{}' xmlns='{}' version='1.0' \
             from='{}' id='{}' xml:lang='en'>",
            ns::STREAM,
            ns::CLIENT,
            self.server,
            self.sid
        );
        trace!("bosh synthesizing stream header");
        self.out_queue.push_back(header.into_bytes());
    }

    /// An inner connection went away while we were reading from it.
    fn member_closed(&mut self, reason: DisconnectReason) -> TransportEvent {
        match self.mode {
            ConnMode::Pipelining => {
                // The single pipelined connection carried every
                // outstanding request; its loss ends the session.
                debug!("bosh pipelined connection closed: {}", reason);
                self.state = TransportState::Disconnected;
                TransportEvent::Closed(reason)
            }
            ConnMode::LegacyHttp | ConnMode::PersistentHttp => {
                // Another pool member carries the next request. The
                // response to the outstanding request is lost.
                debug!("bosh pool member disconnected ({}), dropping it", reason);
                if let Some(mut connection) = self.active.pop_front() {
                    connection.cleanup();
                }
                self.open_requests = self.open_requests.saturating_sub(1);
                self.rx_buf.clear();
                self.content_length = None;
                TransportEvent::Timeout
            }
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Validates the status line and extracts the Content-Length.
fn parse_http_header(header: &str) -> Result<usize, DisconnectReason> {
    let mut lines = header.lines();
    let status = lines.next().unwrap_or("");
    let mut words = status.split_whitespace();
    let proto = words.next().unwrap_or("");
    let code = words.next().unwrap_or("");
    if !proto.starts_with("HTTP/1.") || code != "200" {
        warn!("bosh gateway answered with: {}", status);
        return Err(DisconnectReason::IoError);
    }
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| DisconnectReason::IoError);
            }
        }
    }
    warn!("bosh gateway response lacks a Content-Length header");
    Err(DisconnectReason::IoError)
}

#[cfg(test)]
mod tests;
