// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides the client side of SASL authentication: the
//! [`Mechanism`][`client::Mechanism`] trait and implementations of the
//! mechanisms commonly offered by XMPP servers.

#![deny(unsafe_code, bare_trait_objects)]

pub mod client;
pub mod common;
