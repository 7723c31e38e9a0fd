// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

/// The PLAIN mechanism: `authzid NUL authcid NUL password`.
pub struct Plain {
    authzid: Option<String>,
    username: String,
    password: String,
}

impl Plain {
    /// Builds a PLAIN exchange from credentials carrying a username and
    /// a password.
    pub fn from_credentials(credentials: Credentials) -> Result<Plain, MechanismError> {
        let username = credentials
            .identity
            .username()
            .ok_or(MechanismError::MissingCredentials)?
            .to_owned();
        let password = credentials
            .secret
            .password()
            .ok_or(MechanismError::MissingCredentials)?
            .to_owned();
        Ok(Plain {
            authzid: credentials.authzid,
            username,
            password,
        })
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut payload = Vec::new();
        if let Some(ref authzid) = self.authzid {
            payload.extend_from_slice(authzid.as_bytes());
        }
        payload.push(0);
        payload.extend_from_slice(self.username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.password.as_bytes());
        payload
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_payload() {
        let creds = Credentials::default()
            .with_username("juliet")
            .with_password("secret");
        let mut mech = Plain::from_credentials(creds).unwrap();
        assert_eq!(mech.initial(), b"\0juliet\0secret");
    }

    #[test]
    fn requires_password() {
        let creds = Credentials::default().with_username("juliet");
        assert!(Plain::from_credentials(creds).is_err());
    }
}
