// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides an error type for this crate.

use core::fmt;

/// Parsing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input is not well-formed XML. The position is the byte offset
    /// into the overall stream at which the offending character was
    /// encountered.
    Malformed {
        /// Byte offset of the offending input character, counted over
        /// everything fed to the parser since construction or the last
        /// reset.
        position: usize,
    },

    /// An entity reference could not be resolved.
    InvalidEntity {
        /// Byte offset of the terminating `;` of the entity reference.
        position: usize,
    },
}

impl Error {
    /// The byte offset at which the error was detected.
    pub fn position(&self) -> usize {
        match self {
            Error::Malformed { position } => *position,
            Error::InvalidEntity { position } => *position,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Malformed { position } => {
                write!(fmt, "malformed XML at byte {}", position)
            }
            Error::InvalidEntity { position } => {
                write!(fmt, "invalid entity reference at byte {}", position)
            }
        }
    }
}

impl std::error::Error for Error {}
