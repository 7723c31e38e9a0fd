// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XML namespaces used by the stream core.

/// `<stream:stream>` prefix namespace.
pub const STREAM: &str = "http://etherx.jabber.org/streams";
/// Default namespace of client-to-server streams.
pub const CLIENT: &str = "jabber:client";
/// Default namespace of component streams.
pub const COMPONENT: &str = "jabber:component:accept";
/// STARTTLS negotiation.
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
/// SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// Resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// Session establishment.
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
/// Stream compression negotiation element.
pub const COMPRESS: &str = "http://jabber.org/protocol/compress";
/// Stream compression stream feature.
pub const COMPRESS_FEATURE: &str = "http://jabber.org/features/compress";
/// Legacy IQ authentication (XEP-0078).
pub const IQ_AUTH: &str = "jabber:iq:auth";
/// Legacy IQ auth stream feature.
pub const IQ_AUTH_FEATURE: &str = "http://jabber.org/features/iq-auth";
/// In-band registration stream feature.
pub const IQ_REGISTER_FEATURE: &str = "http://jabber.org/features/iq-register";
/// Stream management (acknowledgements).
pub const STREAM_MANAGEMENT: &str = "urn:xmpp:sm:3";
/// Stanza error conditions.
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
/// BOSH `<body/>` wrapper.
pub const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";
/// BOSH XMPP extensions (`xmpp:restart`, `xmpp:version`).
pub const XBOSH: &str = "urn:xmpp:xbosh";
