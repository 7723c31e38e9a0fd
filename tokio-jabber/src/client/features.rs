// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interpretation of `<stream:features/>`.

use minitag::Tag;

use crate::ns;

/// The capabilities a server advertised for the current negotiation
/// round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFeatures {
    /// STARTTLS is offered.
    pub starttls: bool,
    /// STARTTLS is mandatory.
    pub starttls_required: bool,
    /// SASL DIGEST-MD5.
    pub sasl_digest_md5: bool,
    /// SASL PLAIN.
    pub sasl_plain: bool,
    /// SASL ANONYMOUS.
    pub sasl_anonymous: bool,
    /// SASL EXTERNAL.
    pub sasl_external: bool,
    /// Resource binding.
    pub bind: bool,
    /// Session establishment.
    pub session: bool,
    /// Legacy `jabber:iq:auth`.
    pub iq_auth: bool,
    /// In-band registration.
    pub iq_register: bool,
    /// Stanza acknowledgements.
    pub ack: bool,
    /// Stream compression with the zlib method.
    pub compress_zlib: bool,
}

impl StreamFeatures {
    /// Reads the feature set out of a `<stream:features/>` element.
    ///
    /// Pre-XMPP-1.0 servers send no features at all; an empty element
    /// is taken to mean legacy IQ auth, which is also what such
    /// servers expect.
    pub fn from_tag(tag: &Tag) -> StreamFeatures {
        let mut features = StreamFeatures {
            starttls: tag.has_child_ns("starttls", ns::TLS),
            bind: tag.has_child_ns("bind", ns::BIND),
            session: tag.has_child_ns("session", ns::SESSION),
            iq_auth: tag.has_child_ns("auth", ns::IQ_AUTH_FEATURE),
            iq_register: tag.has_child_ns("register", ns::IQ_REGISTER_FEATURE),
            ack: tag.has_child_ns("sm", ns::STREAM_MANAGEMENT),
            ..StreamFeatures::default()
        };
        if let Some(starttls) = tag.find_child_ns("starttls", ns::TLS) {
            features.starttls_required = starttls.has_child("required");
        }
        if let Some(mechanisms) = tag.find_child_ns("mechanisms", ns::SASL) {
            features.sasl_digest_md5 = mechanisms.has_child_with_text("mechanism", "DIGEST-MD5");
            features.sasl_plain = mechanisms.has_child_with_text("mechanism", "PLAIN");
            features.sasl_anonymous = mechanisms.has_child_with_text("mechanism", "ANONYMOUS");
            features.sasl_external = mechanisms.has_child_with_text("mechanism", "EXTERNAL");
        }
        if let Some(compression) = tag.find_child_ns("compression", ns::COMPRESS_FEATURE) {
            features.compress_zlib = compression.has_child_with_text("method", "zlib");
        }
        if features == StreamFeatures::default() {
            features.iq_auth = true;
        }
        features
    }

    /// Whether any SASL mechanism this library implements is offered.
    pub fn any_sasl(&self) -> bool {
        self.sasl_digest_md5 || self.sasl_plain || self.sasl_anonymous || self.sasl_external
    }
}
