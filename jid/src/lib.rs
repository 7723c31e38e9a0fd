// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Represents XMPP addresses, also known as JIDs.
//!
//! A JID is a triple of node, domain and resource. The node and resource
//! parts are optional; the *bare* form `node@domain` drops the resource.
//! All three parts are normalized on construction: `nodeprep` for the
//! node, `nameprep` for the domain and `resourceprep` for the resource,
//! so two JIDs which only differ in case of the case-insensitive parts
//! compare equal.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use memchr::memchr;

/// The longest allowed length of a single JID part, in bytes, after
/// normalization.
const MAX_PART_LEN: usize = 1023;

/// An error that can occur when parsing or building a [`Jid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The domain part is empty.
    DomainEmpty,
    /// A `@` was present but the node part before it was empty.
    NodeEmpty,
    /// A `/` was present but the resource part after it was empty.
    ResourceEmpty,
    /// The node part failed nodeprep.
    NodePrep,
    /// The domain part failed nameprep.
    NamePrep,
    /// The resource part failed resourceprep.
    ResourcePrep,
    /// A part exceeded 1023 bytes after normalization.
    PartTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match self {
            Error::DomainEmpty => "domain part is empty",
            Error::NodeEmpty => "node part is empty despite the presence of a @",
            Error::ResourceEmpty => "resource part is empty despite the presence of a /",
            Error::NodePrep => "node part violates nodeprep",
            Error::NamePrep => "domain part violates nameprep",
            Error::ResourcePrep => "resource part violates resourceprep",
            Error::PartTooLong => "a JID part is longer than 1023 bytes",
        })
    }
}

impl std::error::Error for Error {}

fn length_check(part: &str) -> Result<(), Error> {
    if part.len() > MAX_PART_LEN {
        Err(Error::PartTooLong)
    } else {
        Ok(())
    }
}

fn node_prep(node: &str) -> Result<String, Error> {
    if node.is_empty() {
        return Err(Error::NodeEmpty);
    }
    let node = stringprep::nodeprep(node).map_err(|_| Error::NodePrep)?;
    length_check(&node)?;
    Ok(node.into_owned())
}

fn domain_prep(domain: &str) -> Result<String, Error> {
    if domain.is_empty() {
        return Err(Error::DomainEmpty);
    }
    // A trailing dot is allowed on the wire but not significant.
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() {
        return Err(Error::DomainEmpty);
    }
    let domain = stringprep::nameprep(domain).map_err(|_| Error::NamePrep)?;
    length_check(&domain)?;
    Ok(domain.into_owned())
}

fn resource_prep(resource: &str) -> Result<String, Error> {
    if resource.is_empty() {
        return Err(Error::ResourceEmpty);
    }
    let resource = stringprep::resourceprep(resource).map_err(|_| Error::ResourcePrep)?;
    length_check(&resource)?;
    Ok(resource.into_owned())
}

/// A Jabber Identifier: `node@domain/resource` with node and resource
/// optional.
#[derive(Debug, Clone)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Builds a JID from its three parts, applying the prepping rules to
    /// every part.
    pub fn new(
        node: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Jid, Error> {
        Ok(Jid {
            node: node.map(node_prep).transpose()?,
            domain: domain_prep(domain)?,
            resource: resource.map(resource_prep).transpose()?,
        })
    }

    /// Builds a bare JID (no resource).
    pub fn bare(node: Option<&str>, domain: &str) -> Result<Jid, Error> {
        Jid::new(node, domain, None)
    }

    /// The node part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part. Never empty.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource part, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Whether this JID carries a resource.
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }

    /// Returns a copy of this JID with the resource dropped.
    pub fn to_bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Replaces the node part.
    pub fn set_node(&mut self, node: &str) -> Result<(), Error> {
        self.node = Some(node_prep(node)?);
        Ok(())
    }

    /// Replaces the resource part. An empty resource removes it.
    pub fn set_resource(&mut self, resource: &str) -> Result<(), Error> {
        if resource.is_empty() {
            self.resource = None;
            Ok(())
        } else {
            self.resource = Some(resource_prep(resource)?);
            Ok(())
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        let bytes = s.as_bytes();
        let at = memchr(b'@', bytes);
        let slash = memchr(b'/', bytes);
        // A @ inside the resource is part of the resource, not a node
        // separator.
        let at = match (at, slash) {
            (Some(a), Some(sl)) if a > sl => None,
            (a, _) => a,
        };
        let (node, rest) = match at {
            Some(a) => (Some(&s[..a]), &s[a + 1..]),
            None => (None, s),
        };
        let (domain, resource) = match memchr(b'/', rest.as_bytes()) {
            Some(sl) => (&rest[..sl], Some(&rest[sl + 1..])),
            None => (rest, None),
        };
        Jid::new(node, domain, resource)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref node) = self.node {
            write!(fmt, "{}@", node)?;
        }
        fmt.write_str(&self.domain)?;
        if let Some(ref resource) = self.resource {
            write!(fmt, "/{}", resource)?;
        }
        Ok(())
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Jid) -> bool {
        self.node == other.node
            && self.domain == other.domain
            && self.resource == other.resource
    }
}

impl Eq for Jid {}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.domain.hash(state);
        self.resource.hash(state);
    }
}
