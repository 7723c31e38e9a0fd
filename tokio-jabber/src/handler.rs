// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The handler interfaces through which applications observe a session.
//!
//! Handlers are registered with a session as `Arc` references; the
//! session only borrows them and removes registrations by pointer
//! identity. All callbacks run inline on the thread driving
//! `recv`, so a handler must neither block nor re-enter the session;
//! state it wants to keep past the callback must be copied out.

use minitag::Tag;

use crate::error::{BindError, DisconnectReason, SessionError};
use crate::stanza::{Iq, Message, Presence, Subscription};

/// Details about an established TLS layer, handed to
/// [`ConnectionListener::on_tls_connect`].
#[derive(Debug, Clone, Default)]
pub struct CertInfo {
    /// Whether the connection is encrypted at all.
    pub secure: bool,
    /// The negotiated protocol version, if known.
    pub protocol: Option<String>,
    /// Number of certificates the peer presented.
    pub chain_len: usize,
}

/// Observes connection lifecycle events.
pub trait ConnectionListener {
    /// The session finished negotiation and is ready for stanzas.
    fn on_connect(&self);

    /// The session ended. Emitted exactly once per established session.
    fn on_disconnect(&self, reason: DisconnectReason);

    /// TLS came up; returning `false` vetoes the certificate and
    /// disconnects the session with [`DisconnectReason::TlsFailed`].
    fn on_tls_connect(&self, _info: &CertInfo) -> bool {
        true
    }

    /// Resource binding failed; the stream stays usable so the
    /// application may retry with a different resource.
    fn on_resource_bind_error(&self, _error: BindError) {}

    /// Session establishment failed; the stream stays usable.
    fn on_session_create_error(&self, _error: SessionError) {}
}

/// Receives incoming message stanzas.
pub trait MessageHandler {
    /// Called for every incoming message, in stream order.
    fn handle_message(&self, message: &Message);
}

/// Receives incoming presence stanzas.
pub trait PresenceHandler {
    /// Called for every incoming non-subscription presence.
    fn handle_presence(&self, presence: &Presence);
}

/// Receives incoming subscription stanzas.
pub trait SubscriptionHandler {
    /// Called for every incoming subscription management presence.
    fn handle_subscription(&self, subscription: &Subscription);
}

/// Receives incoming IQ stanzas.
pub trait IqHandler {
    /// Called for an incoming get/set whose payload namespace this
    /// handler registered for. Return `true` if the request was
    /// handled; when no registered handler claims a request the session
    /// answers it with `service-unavailable`.
    fn handle_iq(&self, iq: &Iq) -> bool;

    /// Called for the result/error matching an id this handler was
    /// registered for, exactly once. The context value passed at
    /// registration distinguishes concurrent requests.
    fn handle_iq_id(&self, iq: &Iq, context: u32);
}

/// Receives raw stream children by root tag name, before
/// classification.
pub trait TagHandler {
    /// Called with the raw element.
    fn handle_tag(&self, tag: &Tag);
}
