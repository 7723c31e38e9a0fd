// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A Jabber client: the full negotiated progression from raw bytes to
//! an authenticated, bound session.
//!
//! The negotiation is a single state machine stepped by stream events:
//! every round starts with the server's `<stream:features/>` and a
//! stream restart (after TLS, compression or SASL) simply returns the
//! machine to [`NegotiationState::ExpectingFeatures`].

use core::time::Duration;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jid::Jid;
use log::{debug, warn};
use minitag::{StreamEvent, Tag};
use sasl::client::mechanisms::{Anonymous, DigestMd5, External, Plain};
use sasl::client::Mechanism;
use sasl::common::Credentials;

use crate::error::{
    AuthError, BindError, DisconnectReason, Error, NonSaslCondition, SaslCondition, SessionError,
};
use crate::handler::{CertInfo, IqHandler};
use crate::ns;
use crate::session::{sha1_hex, Handlers, Session, StreamState};
use crate::stanza::{Iq, IqType, Stanza};
use crate::transport::{DnsConfig, Statistics, TcpTransport, Transport};

mod features;
#[cfg(test)]
mod tests;

pub use features::StreamFeatures;

const BIND_REQ_ID: &str = "bind";
const SESSION_REQ_ID: &str = "session";

/// Where the feature-driven negotiation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationState {
    /// Waiting for `<stream:features/>` on a fresh or restarted stream.
    ExpectingFeatures,
    /// `<starttls/>` sent, waiting for `<proceed/>`.
    TlsProceed,
    /// `<compress/>` sent, waiting for `<compressed/>`.
    CompressAck,
    /// A SASL exchange is running.
    Sasl,
    /// A legacy `jabber:iq:auth` exchange is running.
    IqAuth,
    /// The bind request is in flight.
    Binding,
    /// The session request is in flight.
    CreatingSession,
    /// Negotiation finished (successfully or not).
    Done,
}

/// A client session to an XMPP server.
pub struct Client {
    session: Session,
    negotiation: NegotiationState,
    features: Option<StreamFeatures>,
    sasl: Option<Box<dyn Mechanism + Send>>,
    tls_enabled: bool,
    compression_enabled: bool,
    compression_active: bool,
    force_non_sasl: bool,
    auto_presence: bool,
    priority: i32,
    resource_bound: bool,
    auth_fields_id: Option<String>,
    auth_id: Option<String>,
}

impl Client {
    /// A client that will find the server through
    /// `_xmpp-client._tcp.<domain>` SRV records with fallback port
    /// 5222.
    pub fn new(jid: Jid, password: impl Into<String>) -> Client {
        let dns = DnsConfig::srv_default_client(jid.domain());
        Client::new_with_transport(jid, password, Transport::Tcp(TcpTransport::new(dns)))
    }

    /// A client over a caller-supplied transport.
    pub fn new_with_transport(
        jid: Jid,
        password: impl Into<String>,
        transport: Transport,
    ) -> Client {
        Client {
            session: Session::new(jid, password.into(), transport, ns::CLIENT),
            negotiation: NegotiationState::ExpectingFeatures,
            features: None,
            sasl: None,
            tls_enabled: true,
            compression_enabled: true,
            compression_active: false,
            force_non_sasl: false,
            auto_presence: true,
            priority: 0,
            resource_bound: false,
            auth_fields_id: None,
            auth_id: None,
        }
    }

    /// Enables or disables the STARTTLS upgrade (enabled by default).
    pub fn set_tls(&mut self, enabled: bool) {
        self.tls_enabled = enabled;
    }

    /// Enables or disables stream compression (enabled by default).
    pub fn set_compression(&mut self, enabled: bool) {
        self.compression_enabled = enabled;
    }

    /// Forces legacy `jabber:iq:auth` even when SASL is offered.
    pub fn set_force_non_sasl(&mut self, force: bool) {
        self.force_non_sasl = force;
    }

    /// Whether initial presence is sent automatically after login
    /// (enabled by default).
    pub fn set_auto_presence(&mut self, auto: bool) {
        self.auto_presence = auto;
    }

    /// The priority the initial presence announces, clamped to
    /// [-128, 127].
    pub fn set_initial_priority(&mut self, priority: i32) {
        self.priority = priority.clamp(-128, 127);
    }

    /// The current priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Replaces the resource to request at bind time.
    pub fn set_resource(&mut self, resource: &str) -> Result<(), jid::Error> {
        self.session.jid.set_resource(resource)
    }

    /// Replaces the password used for authentication.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.session.password = password.into();
    }

    /// The JID this session is (or will be) bound to.
    pub fn jid(&self) -> &Jid {
        self.session.jid()
    }

    /// The server-assigned stream id.
    pub fn stream_id(&self) -> &str {
        self.session.stream_id()
    }

    /// Whether authentication completed.
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

    /// Connects the transport and opens the stream. Drive
    /// [`recv`][`Self::recv`] in a loop afterwards to run the
    /// negotiation and receive stanzas.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.session.reset_notifications();
        self.session.state = StreamState::Connecting;
        self.session.transport.connect().await?;
        self.session.state = StreamState::Connected;
        self.negotiation = NegotiationState::ExpectingFeatures;
        self.compression_active = false;
        self.resource_bound = false;
        self.session.send_header().await;
        Ok(())
    }

    /// Pulls and processes stream input for at most `timeout`.
    ///
    /// All handler callbacks triggered by the received data run inline
    /// before this returns. Returns `Err` when the session ended; the
    /// registered connection listeners have been told first.
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

    /// Asks for a disconnect to be performed by the next
    /// [`recv`][`Self::recv`] call (usable while a callback is on the
    /// stack).
    pub fn request_disconnect(&mut self) {
        self.session.request_disconnect();
    }

    /// Retries resource binding, e.g. with a fresh resource after a
    /// conflict was reported to the bind-error callback.
    pub async fn bind_resource(&mut self) -> bool {
        let mut bind = Tag::new("bind").attribute("xmlns", ns::BIND);
        if let Some(resource) = self.session.jid.resource() {
            bind.add_child(Tag::with_text("resource", resource));
        }
        self.session.state = StreamState::ResourceBinding;
        self.negotiation = NegotiationState::Binding;
        let iq = Iq::set(BIND_REQ_ID, bind);
        self.session.send_tag(iq.tag()).await
    }

    async fn fail(&mut self, reason: DisconnectReason) -> Error {
        self.session.disconnect(reason).await;
        Error::Disconnected(reason)
    }

    async fn handle_event(&mut self, event: StreamEvent) -> Result<(), Error> {
        match event {
            StreamEvent::StreamStart(tag) => {
                if let Some(id) = tag.attr("id") {
                    self.session.stream_id = id.to_owned();
                }
                self.session.state = StreamState::StreamOpened;
                Ok(())
            }
            StreamEvent::StreamEnd => {
                debug!("server closed the stream");
                Err(self.fail(DisconnectReason::StreamClosed).await)
            }
            StreamEvent::Stanza(tag) => {
                self.session.dispatch_tag(&tag);
                self.handle_element(tag).await
            }
        }
    }

    async fn handle_element(&mut self, tag: Tag) -> Result<(), Error> {
        let name = tag.name().to_owned();
        let xmlns = tag.attr("xmlns").unwrap_or_default().to_owned();
        match (name.as_str(), xmlns.as_str()) {
            ("stream:features", _) => {
                let features = StreamFeatures::from_tag(&tag);
                self.negotiate(features).await
            }
            ("stream:error", _) => {
                let condition = tag
                    .children()
                    .next()
                    .map(|child| child.name().to_owned())
                    .unwrap_or_else(|| "undefined-condition".to_owned());
                warn!("stream error from server: {}", condition);
                Err(self.fail(DisconnectReason::StreamError).await)
            }
            ("proceed", ns::TLS) => self.starttls_proceed().await,
            ("failure", ns::TLS) => {
                warn!("server refused STARTTLS");
                Err(self.fail(DisconnectReason::TlsFailed).await)
            }
            ("compressed", ns::COMPRESS) => {
                debug!("stream compression established");
                self.compression_active = true;
                self.session.transport.set_compression(true);
                self.session.state = StreamState::CompressionEstablished;
                self.negotiation = NegotiationState::ExpectingFeatures;
                self.session.send_header().await;
                Ok(())
            }
            ("failure", ns::COMPRESS) => {
                warn!("stream compression rejected, continuing without it");
                self.negotiation = NegotiationState::ExpectingFeatures;
                self.negotiate_auth().await
            }
            ("challenge", ns::SASL) => self.sasl_challenge(&tag).await,
            ("success", ns::SASL) => self.sasl_success(&tag).await,
            ("failure", ns::SASL) => {
                let condition = tag
                    .children()
                    .next()
                    .map(|child| SaslCondition::from_element_name(child.name()))
                    .unwrap_or(SaslCondition::Unknown);
                warn!("SASL authentication failed: {}", AuthError::Fail(condition));
                self.sasl = None;
                Err(self.fail(DisconnectReason::AuthenticationFailed).await)
            }
            _ => match Stanza::classify(tag) {
                Ok(Stanza::Iq(iq)) if self.is_negotiation_iq(&iq) => {
                    self.handle_negotiation_iq(iq).await
                }
                Ok(stanza) => {
                    self.session.dispatch_stanza(stanza).await;
                    Ok(())
                }
                Err(tag) => {
                    debug!("ignoring unexpected stream element <{}/>", tag.name());
                    Ok(())
                }
            },
        }
    }

    /// One negotiation round, driven by a fresh feature set.
    async fn negotiate(&mut self, features: StreamFeatures) -> Result<(), Error> {
        self.session.state = StreamState::FeaturesReceived;
        self.features = Some(features);

        if features.starttls && self.tls_enabled && !self.session.transport.is_secure() {
            self.session.state = StreamState::TlsNegotiating;
            self.negotiation = NegotiationState::TlsProceed;
            let starttls = Tag::new("starttls").attribute("xmlns", ns::TLS);
            self.session.send_tag(&starttls).await;
            return Ok(());
        }
        if features.starttls_required && !self.session.transport.is_secure() {
            warn!("server requires TLS but it is disabled here");
            return Err(self.fail(DisconnectReason::TlsNotAvailable).await);
        }

        let transport_can_compress = !matches!(self.session.transport, Transport::Bosh(_));
        if features.compress_zlib
            && self.compression_enabled
            && !self.compression_active
            && transport_can_compress
        {
            self.session.state = StreamState::CompressionNegotiating;
            self.negotiation = NegotiationState::CompressAck;
            let compress = Tag::new("compress")
                .attribute("xmlns", ns::COMPRESS)
                .child(Tag::with_text("method", "zlib"));
            self.session.send_tag(&compress).await;
            return Ok(());
        }

        self.negotiate_auth().await
    }

    /// The authentication / binding part of a negotiation round.
    async fn negotiate_auth(&mut self) -> Result<(), Error> {
        let features = self.features.unwrap_or_default();

        if self.session.authed {
            if features.bind {
                self.bind_resource().await;
            } else {
                self.connected().await;
            }
            return Ok(());
        }

        let have_credentials =
            self.session.jid.node().is_some() && !self.session.password.is_empty();
        if have_credentials {
            if !self.force_non_sasl {
                if features.sasl_digest_md5 {
                    return self.start_sasl("DIGEST-MD5").await;
                }
                if features.sasl_plain {
                    return self.start_sasl("PLAIN").await;
                }
                if features.sasl_external {
                    return self.start_sasl("EXTERNAL").await;
                }
            }
            if features.iq_auth || self.force_non_sasl {
                return self.non_sasl_login().await;
            }
            warn!("the server offers no authentication mechanism we support");
            Err(self.fail(DisconnectReason::NoSupportedAuth).await)
        } else if features.sasl_anonymous {
            self.start_sasl("ANONYMOUS").await
        } else {
            // Nothing to authenticate with; the stream is as usable as
            // it will get.
            self.connected().await;
            Ok(())
        }
    }

    async fn start_sasl(&mut self, name: &'static str) -> Result<(), Error> {
        let credentials = Credentials::default()
            .with_username(self.session.jid.node().unwrap_or_default())
            .with_password(self.session.password.clone());
        let built: Result<Box<dyn Mechanism + Send>, sasl::client::MechanismError> = match name {
            "DIGEST-MD5" => DigestMd5::from_credentials(
                credentials,
                format!("xmpp/{}", self.session.jid.domain()),
            )
            .map(|mechanism| Box::new(mechanism) as Box<dyn Mechanism + Send>),
            "PLAIN" => Plain::from_credentials(credentials)
                .map(|mechanism| Box::new(mechanism) as Box<dyn Mechanism + Send>),
            "EXTERNAL" => Ok(Box::new(External::new()) as Box<dyn Mechanism + Send>),
            _ => Ok(Box::new(Anonymous::new()) as Box<dyn Mechanism + Send>),
        };
        let mut mechanism = match built {
            Ok(mechanism) => mechanism,
            Err(e) => {
                warn!("cannot run {}: {}", name, AuthError::Sasl(e));
                return Err(self.fail(DisconnectReason::AuthenticationFailed).await);
            }
        };

        debug!("starting SASL {}", name);
        let initial = mechanism.initial();
        let content = if initial.is_empty() {
            "=".to_owned()
        } else {
            BASE64.encode(initial)
        };
        let auth = Tag::with_text("auth", content)
            .attribute("xmlns", ns::SASL)
            .attribute("mechanism", name);
        self.sasl = Some(mechanism);
        self.session.state = StreamState::SaslNegotiating;
        self.negotiation = NegotiationState::Sasl;
        self.session.send_tag(&auth).await;
        Ok(())
    }

    async fn sasl_challenge(&mut self, tag: &Tag) -> Result<(), Error> {
        let data = match BASE64.decode(tag.text()) {
            Ok(data) => data,
            Err(_) => {
                warn!("SASL challenge is not valid base64");
                return Err(self.fail(DisconnectReason::AuthenticationFailed).await);
            }
        };
        let response = match self.sasl.as_mut() {
            Some(mechanism) => mechanism.response(&data),
            None => {
                debug!("ignoring SASL challenge outside an exchange");
                return Ok(());
            }
        };
        match response {
            Ok(response) => {
                let content = if response.is_empty() {
                    String::new()
                } else {
                    BASE64.encode(response)
                };
                let reply = Tag::with_text("response", content).attribute("xmlns", ns::SASL);
                self.session.send_tag(&reply).await;
                Ok(())
            }
            Err(e) => {
                warn!("SASL mechanism rejected the challenge: {}", e);
                let abort = Tag::new("abort").attribute("xmlns", ns::SASL);
                self.session.send_tag(&abort).await;
                Err(self.fail(DisconnectReason::AuthenticationFailed).await)
            }
        }
    }

    async fn sasl_success(&mut self, tag: &Tag) -> Result<(), Error> {
        if let Some(mut mechanism) = self.sasl.take() {
            let data = BASE64.decode(tag.text()).unwrap_or_default();
            if let Err(e) = mechanism.success(&data) {
                warn!("server success data did not verify: {}", e);
                return Err(self.fail(DisconnectReason::AuthenticationFailed).await);
            }
        }
        debug!("SASL authentication successful");
        self.session.authed = true;
        self.session.state = StreamState::SaslAuthenticated;
        self.negotiation = NegotiationState::ExpectingFeatures;
        self.session.send_header().await;
        Ok(())
    }

    async fn starttls_proceed(&mut self) -> Result<(), Error> {
        if self.negotiation != NegotiationState::TlsProceed {
            debug!("ignoring unsolicited <proceed/>");
            return Ok(());
        }
        let domain = self.session.jid.domain().to_owned();
        match self.session.transport.start_tls(&domain).await {
            Ok(()) => {
                self.session.state = StreamState::TlsEstablished;
                let info = match self.session.transport {
                    Transport::Tls(ref tls) => tls.cert_info(),
                    _ => CertInfo::default(),
                };
                let mut accepted = true;
                for listener in self.session.handlers.connection_snapshot() {
                    accepted &= listener.on_tls_connect(&info);
                }
                if !accepted {
                    warn!("TLS connection vetoed by a listener");
                    return Err(self.fail(DisconnectReason::TlsFailed).await);
                }
                self.negotiation = NegotiationState::ExpectingFeatures;
                self.session.send_header().await;
                Ok(())
            }
            Err(_) => Err(self.fail(DisconnectReason::TlsFailed).await),
        }
    }

    fn is_negotiation_iq(&self, iq: &Iq) -> bool {
        match iq.id() {
            Some(BIND_REQ_ID) => self.negotiation == NegotiationState::Binding,
            Some(SESSION_REQ_ID) => self.negotiation == NegotiationState::CreatingSession,
            Some(id) => {
                self.auth_fields_id.as_deref() == Some(id) || self.auth_id.as_deref() == Some(id)
            }
            None => false,
        }
    }

    async fn handle_negotiation_iq(&mut self, iq: Iq) -> Result<(), Error> {
        match iq.id() {
            Some(BIND_REQ_ID) => self.process_bind(iq).await,
            Some(SESSION_REQ_ID) => self.process_session(iq).await,
            Some(id) if self.auth_fields_id.as_deref() == Some(id) => {
                self.auth_fields_id = None;
                self.process_auth_fields(iq).await
            }
            _ => {
                self.auth_id = None;
                self.process_auth_result(iq).await
            }
        }
    }

    async fn process_bind(&mut self, iq: Iq) -> Result<(), Error> {
        match iq.subtype() {
            IqType::Result => {
                let bound = iq
                    .payload()
                    .filter(|payload| payload.name() == "bind")
                    .and_then(|payload| payload.find_child("jid"))
                    .and_then(|jid| jid.text().parse::<Jid>().ok());
                match bound {
                    Some(jid) => {
                        debug!("bound to {}", jid);
                        self.session.jid = jid;
                        self.resource_bound = true;
                        if self.features.unwrap_or_default().session {
                            self.create_session().await;
                        } else {
                            self.connected().await;
                        }
                    }
                    None => {
                        warn!("bind result carries no usable JID");
                        self.notify_bind_error(BindError::Unknown);
                    }
                }
                Ok(())
            }
            IqType::Error => {
                let error = match iq.error_condition() {
                    Some("bad-request") => BindError::BadRequest,
                    Some("not-allowed") => BindError::NotAllowed,
                    Some("conflict") => BindError::Conflict,
                    _ => BindError::Unknown,
                };
                self.negotiation = NegotiationState::Done;
                self.notify_bind_error(error);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn notify_bind_error(&mut self, error: BindError) {
        warn!("resource binding failed: {:?}", error);
        for listener in self.session.handlers.connection_snapshot() {
            listener.on_resource_bind_error(error);
        }
    }

    async fn create_session(&mut self) {
        self.session.state = StreamState::SessionCreating;
        self.negotiation = NegotiationState::CreatingSession;
        let iq = Iq::set(
            SESSION_REQ_ID,
            Tag::new("session").attribute("xmlns", ns::SESSION),
        );
        self.session.send_tag(iq.tag()).await;
    }

    async fn process_session(&mut self, iq: Iq) -> Result<(), Error> {
        match iq.subtype() {
            IqType::Result => {
                self.connected().await;
                Ok(())
            }
            IqType::Error => {
                let error = match iq.error_condition() {
                    Some("internal-server-error") => SessionError::InternalServerError,
                    Some("forbidden") => SessionError::Forbidden,
                    Some("conflict") => SessionError::Conflict,
                    _ => SessionError::Unknown,
                };
                warn!("session establishment failed: {:?}", error);
                self.negotiation = NegotiationState::Done;
                for listener in self.session.handlers.connection_snapshot() {
                    listener.on_session_create_error(error);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn non_sasl_login(&mut self) -> Result<(), Error> {
        debug!("falling back to legacy jabber:iq:auth");
        self.session.state = StreamState::IqAuthNegotiating;
        self.negotiation = NegotiationState::IqAuth;
        let id = self.session.next_id();
        let query = Tag::new("query").attribute("xmlns", ns::IQ_AUTH).child(
            Tag::with_text("username", self.session.jid.node().unwrap_or_default()),
        );
        self.auth_fields_id = Some(id.clone());
        let iq = Iq::get(id, query);
        self.session.send_tag(iq.tag()).await;
        Ok(())
    }

    async fn process_auth_fields(&mut self, iq: Iq) -> Result<(), Error> {
        match iq.subtype() {
            IqType::Result => {
                let mut query = Tag::new("query").attribute("xmlns", ns::IQ_AUTH).child(
                    Tag::with_text("username", self.session.jid.node().unwrap_or_default()),
                );
                query.add_child(Tag::with_text(
                    "resource",
                    self.session.jid.resource().unwrap_or("jabber"),
                ));
                let offers_digest = iq
                    .payload()
                    .map(|payload| payload.has_child("digest"))
                    .unwrap_or(false);
                if offers_digest && !self.session.stream_id.is_empty() {
                    let material =
                        format!("{}{}", self.session.stream_id, self.session.password);
                    query.add_child(Tag::with_text("digest", sha1_hex(material.as_bytes())));
                } else {
                    query.add_child(Tag::with_text("password", self.session.password.clone()));
                }
                let id = self.session.next_id();
                self.auth_id = Some(id.clone());
                let iq = Iq::set(id, query);
                self.session.send_tag(iq.tag()).await;
                Ok(())
            }
            _ => {
                warn!("legacy auth field request failed");
                Err(self.fail(DisconnectReason::AuthenticationFailed).await)
            }
        }
    }

    async fn process_auth_result(&mut self, iq: Iq) -> Result<(), Error> {
        match iq.subtype() {
            IqType::Result => {
                debug!("legacy authentication successful");
                self.session.authed = true;
                self.session.state = StreamState::IqAuthenticated;
                self.connected().await;
                Ok(())
            }
            _ => {
                let condition = match iq.error_condition() {
                    Some("conflict") => NonSaslCondition::Conflict,
                    Some("not-acceptable") => NonSaslCondition::NotAcceptable,
                    Some("not-authorized") => NonSaslCondition::NotAuthorized,
                    _ => NonSaslCondition::Unknown,
                };
                warn!(
                    "legacy authentication failed: {}",
                    AuthError::NonSasl(condition)
                );
                Err(self.fail(DisconnectReason::AuthenticationFailed).await)
            }
        }
    }

    /// Login is complete: announce presence and notify listeners.
    async fn connected(&mut self) {
        self.session.state = StreamState::Bound;
        self.negotiation = NegotiationState::Done;
        if self.session.authed && self.auto_presence {
            let presence =
                Tag::new("presence").child(Tag::with_text("priority", self.priority.to_string()));
            self.session.send_tag(&presence).await;
        }
        self.session.notify_connect();
    }
}
