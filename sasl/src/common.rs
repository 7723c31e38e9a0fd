// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Credential types shared by the mechanisms.

/// The identity to authenticate as.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Identity {
    /// No identity; acceptable for ANONYMOUS and EXTERNAL.
    #[default]
    None,
    /// A plain username.
    Username(String),
}

impl Identity {
    /// The username, if one is set.
    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::None => None,
            Identity::Username(username) => Some(username),
        }
    }
}

/// The secret backing the identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Secret {
    /// No secret; acceptable for ANONYMOUS and EXTERNAL.
    #[default]
    None,
    /// A plaintext password.
    Password(String),
}

impl Secret {
    /// The password, if one is set.
    pub fn password(&self) -> Option<&str> {
        match self {
            Secret::None => None,
            Secret::Password(password) => Some(password),
        }
    }
}

/// A set of SASL credentials, built up with the `with_*` methods.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// The identity to authenticate as.
    pub identity: Identity,
    /// The secret backing the identity.
    pub secret: Secret,
    /// The authorization identity, if different from the
    /// authentication identity.
    pub authzid: Option<String>,
}

impl Credentials {
    /// Sets the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Sets the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Credentials {
        self.secret = Secret::Password(password.into());
        self
    }

    /// Sets the authorization identity.
    pub fn with_authzid(mut self, authzid: impl Into<String>) -> Credentials {
        self.authzid = Some(authzid.into());
        self
    }
}
