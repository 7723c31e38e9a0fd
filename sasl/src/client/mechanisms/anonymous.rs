// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use getrandom::getrandom;

use crate::client::{Mechanism, MechanismError};

/// The ANONYMOUS mechanism. Sends a random trace string; the server
/// assigns a temporary identity.
pub struct Anonymous;

impl Anonymous {
    /// Creates an ANONYMOUS exchange.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Anonymous {
        Anonymous
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut rand = [0u8; 16];
        // A constant trace is still valid ANONYMOUS if randomness is
        // unavailable.
        let _ = getrandom(&mut rand);
        let mut trace = String::with_capacity(32);
        for byte in rand {
            trace.push_str(&format!("{:02x}", byte));
        }
        trace.into_bytes()
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge)
    }
}
