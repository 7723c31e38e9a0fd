// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A small, simple XML element tree plus an incremental stream parser,
//! targeting the subset of XML useful for XMPP.
//!
//! The parser is stream-oriented: it accepts arbitrary chunks of a
//! document whose root element stays open (the `<stream:stream>` of an
//! XMPP connection) and emits the root open tag and every fully closed
//! immediate child of it as [`Tag`] trees.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

mod error;
mod escape;
mod parser;
mod tag;

pub use error::Error;
pub use escape::{escape, unescape};
pub use parser::{Parser, StreamEvent};
pub use tag::{Node, Tag};
