// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Asynchronous Jabber/XMPP client core with [tokio](https://tokio.rs/).
//!
//! This crate implements the transport and session layers of a Jabber
//! client: stream negotiation (STARTTLS, zlib stream compression, SASL
//! or legacy authentication, resource binding, session establishment)
//! over a choice of byte transports, plus the stanza dispatch that
//! higher-level protocol managers build on.
//!
//! # Getting started
//!
//! Create a [`Client`] with a JID and password, register handlers for
//! the stanzas you care about, call [`Client::connect`] and then drive
//! [`Client::recv`] in a loop. All handler callbacks run inline within
//! `recv`, on the calling task.
//!
//! # Transports
//!
//! - Direct TCP with SRV resolution ([`transport::TcpTransport`])
//! - TLS, both at connect time and via STARTTLS
//!   ([`transport::TlsTransport`])
//! - BOSH / HTTP long polling ([`transport::BoshTransport`]), with
//!   legacy, persistent and pipelined HTTP connection handling

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

pub use jid;
pub use minitag;
pub use sasl;

mod client;
mod component;
pub mod error;
mod handler;
pub mod ns;
mod session;
pub mod stanza;
pub mod transport;

pub use client::{Client, StreamFeatures};
pub use component::Component;
#[doc(inline)]
pub use error::{DisconnectReason, Error};
pub use handler::{
    CertInfo, ConnectionListener, IqHandler, MessageHandler, PresenceHandler, SubscriptionHandler,
    TagHandler,
};
pub use session::{Handlers, Session, StreamState};
