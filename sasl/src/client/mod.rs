// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The client [`Mechanism`] trait and its implementations.

use core::fmt;

pub mod mechanisms;

/// An error raised while a mechanism processes a step of the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismError {
    /// The credentials are not suitable for this mechanism.
    MissingCredentials,
    /// The server sent a challenge the mechanism cannot process.
    InvalidChallenge,
    /// The server sent a challenge although the exchange was complete.
    UnexpectedChallenge,
    /// A required directive was absent from the server challenge.
    MissingDirective(&'static str),
    /// The server's mutual-authentication proof did not verify.
    InvalidServerProof,
    /// Random material for the exchange could not be obtained.
    NoRandom,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::MissingCredentials => {
                fmt.write_str("credentials are missing or unsuitable for the mechanism")
            }
            MechanismError::InvalidChallenge => fmt.write_str("invalid server challenge"),
            MechanismError::UnexpectedChallenge => {
                fmt.write_str("server sent a challenge after the exchange completed")
            }
            MechanismError::MissingDirective(directive) => {
                write!(fmt, "challenge lacks the {} directive", directive)
            }
            MechanismError::InvalidServerProof => {
                fmt.write_str("server authentication proof did not verify")
            }
            MechanismError::NoRandom => fmt.write_str("no random material available"),
        }
    }
}

impl std::error::Error for MechanismError {}

impl From<getrandom::Error> for MechanismError {
    fn from(_: getrandom::Error) -> MechanismError {
        MechanismError::NoRandom
    }
}

/// A SASL mechanism, driven challenge by challenge.
pub trait Mechanism {
    /// The IANA-registered name of the mechanism.
    fn name(&self) -> &str;

    /// The initial payload to send along with the authentication
    /// request. May be empty.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Computes the response to a server challenge.
    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError>;

    /// Verifies additional data sent with the server's success report.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }
}
