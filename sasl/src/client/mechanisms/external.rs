// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::client::{Mechanism, MechanismError};

/// The EXTERNAL mechanism. Authentication happens out of band (TLS
/// client certificate, IP address); the payload optionally names the
/// authorization identity.
pub struct External {
    authzid: Option<String>,
}

impl External {
    /// Creates an EXTERNAL exchange without an authorization identity.
    pub fn new() -> External {
        External { authzid: None }
    }

    /// Creates an EXTERNAL exchange requesting the given authorization
    /// identity.
    pub fn with_authzid(authzid: impl Into<String>) -> External {
        External {
            authzid: Some(authzid.into()),
        }
    }
}

impl Default for External {
    fn default() -> External {
        External::new()
    }
}

impl Mechanism for External {
    fn name(&self) -> &str {
        "EXTERNAL"
    }

    fn initial(&mut self) -> Vec<u8> {
        match self.authzid {
            Some(ref authzid) => authzid.as_bytes().to_vec(),
            None => Vec::new(),
        }
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge)
    }
}
