// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The DIGEST-MD5 mechanism (RFC 2831), client side.

use std::collections::HashMap;

use getrandom::getrandom;
use md5::{Digest, Md5};

use crate::client::{Mechanism, MechanismError};
use crate::common::Credentials;

enum Step {
    /// Waiting for the initial challenge.
    Initial,
    /// The digest response was sent; `rspauth` is the expected server
    /// proof.
    Responded { rspauth: String },
    /// The server proof verified.
    Done,
}

/// A DIGEST-MD5 exchange.
pub struct DigestMd5 {
    username: String,
    password: String,
    digest_uri: String,
    authzid: Option<String>,
    cnonce: Option<String>,
    step: Step,
}

impl DigestMd5 {
    /// Builds a DIGEST-MD5 exchange. `digest_uri` is the
    /// `serv-type/host` pair of RFC 2831, `xmpp/example.com` for an XMPP
    /// login.
    pub fn from_credentials(
        credentials: Credentials,
        digest_uri: impl Into<String>,
    ) -> Result<DigestMd5, MechanismError> {
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
        Ok(DigestMd5 {
            username,
            password,
            digest_uri: digest_uri.into(),
            authzid: credentials.authzid,
            cnonce: None,
            step: Step::Initial,
        })
    }

    /// Fixes the client nonce instead of drawing a random one. Only
    /// meaningful before the first challenge.
    #[doc(hidden)]
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> DigestMd5 {
        self.cnonce = Some(cnonce.into());
        self
    }

    fn cnonce(&mut self) -> Result<String, MechanismError> {
        if let Some(ref cnonce) = self.cnonce {
            return Ok(cnonce.clone());
        }
        let mut rand = [0u8; 16];
        getrandom(&mut rand)?;
        let cnonce = to_hex(&rand);
        self.cnonce = Some(cnonce.clone());
        Ok(cnonce)
    }

    /// The shared `HEX(H(A1))` half of both the request digest and the
    /// server proof.
    fn ha1(&self, realm: &str, nonce: &str, cnonce: &str) -> String {
        let mut hash = Md5::new();
        hash.update(self.username.as_bytes());
        hash.update(b":");
        hash.update(realm.as_bytes());
        hash.update(b":");
        hash.update(self.password.as_bytes());
        let secret = hash.finalize();

        let mut a1 = Md5::new();
        a1.update(secret);
        a1.update(b":");
        a1.update(nonce.as_bytes());
        a1.update(b":");
        a1.update(cnonce.as_bytes());
        if let Some(ref authzid) = self.authzid {
            a1.update(b":");
            a1.update(authzid.as_bytes());
        }
        to_hex(&a1.finalize())
    }

    fn digest(&self, ha1: &str, nonce: &str, cnonce: &str, a2_prefix: &str) -> String {
        let a2 = format!("{}:{}", a2_prefix, self.digest_uri);
        let ha2 = to_hex(&Md5::digest(a2.as_bytes()));
        let kd = format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, "00000001", cnonce, "auth", ha2
        );
        to_hex(&Md5::digest(kd.as_bytes()))
    }

    fn verify_rspauth(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let directives = parse_directives(data).ok_or(MechanismError::InvalidChallenge)?;
        let proof = directives
            .get("rspauth")
            .ok_or(MechanismError::MissingDirective("rspauth"))?;
        match self.step {
            Step::Responded { ref rspauth } if proof == rspauth => {
                self.step = Step::Done;
                Ok(())
            }
            Step::Responded { .. } => Err(MechanismError::InvalidServerProof),
            _ => Err(MechanismError::UnexpectedChallenge),
        }
    }
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &str {
        "DIGEST-MD5"
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        match self.step {
            Step::Initial => (),
            // A second challenge carries the server proof.
            Step::Responded { .. } => {
                self.verify_rspauth(challenge)?;
                return Ok(Vec::new());
            }
            Step::Done => return Err(MechanismError::UnexpectedChallenge),
        }

        let directives = parse_directives(challenge).ok_or(MechanismError::InvalidChallenge)?;
        let nonce = directives
            .get("nonce")
            .ok_or(MechanismError::MissingDirective("nonce"))?
            .clone();
        let realm = directives.get("realm").cloned().unwrap_or_default();
        let cnonce = self.cnonce()?;

        let ha1 = self.ha1(&realm, &nonce, &cnonce);
        let response = self.digest(&ha1, &nonce, &cnonce, "AUTHENTICATE");
        // The server proves itself with the same digest over an A2
        // without the request method.
        let rspauth = self.digest(&ha1, &nonce, &cnonce, "");

        let mut out = format!(
            "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",\
             nc=00000001,qop=auth,digest-uri=\"{}\",response={},charset=utf-8",
            self.username, realm, nonce, cnonce, self.digest_uri, response
        );
        if let Some(ref authzid) = self.authzid {
            out.push_str(&format!(",authzid=\"{}\"", authzid));
        }

        self.step = Step::Responded { rspauth };
        Ok(out.into_bytes())
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        match self.step {
            // The proof already arrived in a second challenge.
            Step::Done => Ok(()),
            Step::Responded { .. } if !data.is_empty() => self.verify_rspauth(data),
            // Accept servers that omit the proof from <success/>.
            Step::Responded { .. } => Ok(()),
            Step::Initial => Err(MechanismError::InvalidChallenge),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Parses a comma-separated `key=value` directive list with optionally
/// quoted values. Returns `None` on syntax errors or non-UTF-8 input.
fn parse_directives(input: &[u8]) -> Option<HashMap<String, String>> {
    let input = std::str::from_utf8(input).ok()?;
    let mut directives = HashMap::new();
    let mut rest = input.trim_start_matches(&[',', ' '][..]);
    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq + 1..];
        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"')?;
            value = quoted[..end].to_owned();
            rest = &quoted[end + 1..];
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_owned();
            rest = &rest[end..];
        }
        directives.insert(key, value);
        rest = rest.trim_start_matches(&[',', ' '][..]);
    }
    Some(directives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Mechanism;
    use crate::common::Credentials;

    // The worked example of RFC 2831 section 4.
    const CHALLENGE: &[u8] = b"realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",\
        qop=\"auth\",algorithm=md5-sess,charset=utf-8";

    fn example_mechanism() -> DigestMd5 {
        let creds = Credentials::default()
            .with_username("chris")
            .with_password("secret");
        DigestMd5::from_credentials(creds, "imap/elwood.innosoft.com")
            .unwrap()
            .with_cnonce("OA6MHXh6VqTrRk")
    }

    #[test]
    fn rfc_2831_example_digest() {
        let mut mech = example_mechanism();
        let response = mech.response(CHALLENGE).unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(
            response.contains("response=d388dad90d4bbd760a152321f2143af7"),
            "unexpected digest in {}",
            response
        );
        assert!(response.contains("username=\"chris\""));
        assert!(response.contains("digest-uri=\"imap/elwood.innosoft.com\""));
        assert!(response.contains("nc=00000001"));
    }

    #[test]
    fn rfc_2831_example_rspauth() {
        let mut mech = example_mechanism();
        mech.response(CHALLENGE).unwrap();
        // The subsequent challenge carries the server proof, which for
        // the worked example is this exact value.
        let reply = mech
            .response(b"rspauth=ea40f60335c427b5527b84dbabcdfffd")
            .unwrap();
        assert!(reply.is_empty());
        assert!(mech.success(b"").is_ok());
    }

    #[test]
    fn wrong_rspauth_is_rejected() {
        let mut mech = example_mechanism();
        mech.response(CHALLENGE).unwrap();
        assert_eq!(
            mech.response(b"rspauth=00000000000000000000000000000000"),
            Err(MechanismError::InvalidServerProof)
        );
    }

    #[test]
    fn challenge_without_nonce_is_rejected() {
        let mut mech = example_mechanism();
        assert_eq!(
            mech.response(b"realm=\"x\",qop=\"auth\""),
            Err(MechanismError::MissingDirective("nonce"))
        );
    }
}
