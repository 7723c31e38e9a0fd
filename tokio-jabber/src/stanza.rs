// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Classification of stream children into stanzas.
//!
//! A [`Stanza`] wraps a [`Tag`] whose top-level name identifies one of
//! the three RFC 6121 stanza kinds; presences carrying a subscription
//! management type are split off into their own class, mirroring how
//! applications want to handle them separately.

use jid::Jid;
use minitag::Tag;

use crate::ns;

/// The subtype of an IQ stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// A request for data.
    Get,
    /// A request changing state.
    Set,
    /// A positive response to a get/set.
    Result,
    /// A negative response to a get/set.
    Error,
}

/// The subtype of a message stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// One-to-one chat.
    Chat,
    /// A standalone message (default).
    Normal,
    /// A message in a multi-user room.
    Groupchat,
    /// A news-ticker style message.
    Headline,
    /// An error response to a message.
    Error,
}

/// The subtype of a presence stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    /// The sender is available (default).
    Available,
    /// The sender became unavailable.
    Unavailable,
    /// A request for current presence.
    Probe,
    /// An error response to a presence.
    Error,
}

/// The subtype of a subscription stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// A request to subscribe.
    Subscribe,
    /// A subscription request was granted.
    Subscribed,
    /// A request to unsubscribe.
    Unsubscribe,
    /// A subscription was removed.
    Unsubscribed,
}

macro_rules! stanza_accessors {
    () => {
        /// The `from` attribute, parsed as a JID.
        pub fn from(&self) -> Option<Jid> {
            self.tag.attr("from").and_then(|s| s.parse().ok())
        }

        /// The `to` attribute, parsed as a JID.
        pub fn to(&self) -> Option<Jid> {
            self.tag.attr("to").and_then(|s| s.parse().ok())
        }

        /// The `id` attribute.
        pub fn id(&self) -> Option<&str> {
            self.tag.attr("id")
        }

        /// The wrapped element.
        pub fn tag(&self) -> &Tag {
            &self.tag
        }

        /// Unwraps into the element.
        pub fn into_tag(self) -> Tag {
            self.tag
        }
    };
}

/// An `<iq/>` request/response stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iq {
    tag: Tag,
}

impl Iq {
    stanza_accessors!();

    /// Builds a `get` request carrying the given payload.
    pub fn get(id: impl Into<String>, payload: Tag) -> Iq {
        Iq {
            tag: Tag::new("iq")
                .attribute("type", "get")
                .attribute("id", id.into())
                .child(payload),
        }
    }

    /// Builds a `set` request carrying the given payload.
    pub fn set(id: impl Into<String>, payload: Tag) -> Iq {
        Iq {
            tag: Tag::new("iq")
                .attribute("type", "set")
                .attribute("id", id.into())
                .child(payload),
        }
    }

    /// The stanza subtype.
    pub fn subtype(&self) -> IqType {
        match self.tag.attr("type") {
            Some("get") => IqType::Get,
            Some("set") => IqType::Set,
            Some("result") => IqType::Result,
            // RFC 6120 allows nothing else; anything unexpected is
            // treated as an error response.
            _ => IqType::Error,
        }
    }

    /// The payload: the first child element.
    pub fn payload(&self) -> Option<&Tag> {
        self.tag.children().next()
    }

    /// The namespace of the payload, used for dispatch of incoming
    /// get/set requests.
    pub fn payload_ns(&self) -> Option<&str> {
        self.payload().and_then(|payload| payload.attr("xmlns"))
    }

    /// Builds the `service-unavailable` error response for an
    /// unhandled get/set request.
    pub fn service_unavailable_reply(&self) -> Tag {
        let mut reply = Tag::new("iq").attribute("type", "error");
        if let Some(id) = self.id() {
            reply.set_attr("id", id);
        }
        if let Some(from) = self.tag.attr("from") {
            reply.set_attr("to", from);
        }
        reply.child(
            Tag::new("error").attribute("type", "cancel").child(
                Tag::new("service-unavailable").attribute("xmlns", ns::XMPP_STANZAS),
            ),
        )
    }

    /// The condition name of the `<error/>` child, if this is an error
    /// response.
    pub fn error_condition(&self) -> Option<&str> {
        let error = self.tag.find_child("error")?;
        error
            .children()
            .find(|child| child.attr("xmlns") == Some(ns::XMPP_STANZAS))
            .map(|child| child.name())
    }
}

/// A `<message/>` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: Tag,
}

impl Message {
    stanza_accessors!();

    /// The stanza subtype.
    pub fn subtype(&self) -> MessageType {
        match self.tag.attr("type") {
            Some("chat") => MessageType::Chat,
            Some("groupchat") => MessageType::Groupchat,
            Some("headline") => MessageType::Headline,
            Some("error") => MessageType::Error,
            _ => MessageType::Normal,
        }
    }

    /// The text of the `<body/>` child, if any.
    pub fn body(&self) -> Option<String> {
        self.tag.find_child("body").map(Tag::text)
    }
}

/// A `<presence/>` stanza that is not subscription management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    tag: Tag,
}

impl Presence {
    stanza_accessors!();

    /// The stanza subtype.
    pub fn subtype(&self) -> PresenceType {
        match self.tag.attr("type") {
            Some("unavailable") => PresenceType::Unavailable,
            Some("probe") => PresenceType::Probe,
            Some("error") => PresenceType::Error,
            _ => PresenceType::Available,
        }
    }

    /// The advertised priority, if present and well-formed.
    pub fn priority(&self) -> Option<i8> {
        self.tag
            .find_child("priority")
            .and_then(|child| child.text().parse().ok())
    }
}

/// A `<presence/>` stanza whose type manages a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    tag: Tag,
    subtype: SubscriptionType,
}

impl Subscription {
    stanza_accessors!();

    /// The stanza subtype.
    pub fn subtype(&self) -> SubscriptionType {
        self.subtype
    }
}

/// A classified stream child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    /// An IQ request or response.
    Iq(Iq),
    /// A message.
    Message(Message),
    /// A presence broadcast.
    Presence(Presence),
    /// A subscription management presence.
    Subscription(Subscription),
}

impl Stanza {
    /// Classifies a stream child. Elements which are not stanzas
    /// (stream features, SASL nonzas, …) are handed back unchanged.
    pub fn classify(tag: Tag) -> Result<Stanza, Tag> {
        if tag.name() == "iq" {
            return Ok(Stanza::Iq(Iq { tag }));
        }
        if tag.name() == "message" {
            return Ok(Stanza::Message(Message { tag }));
        }
        if tag.name() == "presence" {
            let subtype = match tag.attr("type") {
                Some("subscribe") => Some(SubscriptionType::Subscribe),
                Some("subscribed") => Some(SubscriptionType::Subscribed),
                Some("unsubscribe") => Some(SubscriptionType::Unsubscribe),
                Some("unsubscribed") => Some(SubscriptionType::Unsubscribed),
                _ => None,
            };
            return match subtype {
                Some(subtype) => Ok(Stanza::Subscription(Subscription { tag, subtype })),
                None => Ok(Stanza::Presence(Presence { tag })),
            };
        }
        Err(tag)
    }

    /// The wrapped element.
    pub fn tag(&self) -> &Tag {
        match self {
            Stanza::Iq(iq) => iq.tag(),
            Stanza::Message(message) => message.tag(),
            Stanza::Presence(presence) => presence.tag(),
            Stanza::Subscription(subscription) => subscription.tag(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_stanza(xml: &str) -> Result<Stanza, Tag> {
        let mut parser = minitag::Parser::new();
        let mut events = parser.feed("<stream:stream>").unwrap();
        events.extend(parser.feed(xml).unwrap());
        match events.remove(1) {
            minitag::StreamEvent::Stanza(tag) => Stanza::classify(tag),
            other => panic!("expected stanza, got {:?}", other),
        }
    }

    #[test]
    fn iq_classification() {
        let stanza = parse_stanza(
            "<iq type='get' id='q1' from='a@b/r'>\
             <query xmlns='jabber:iq:roster'/></iq>",
        )
        .unwrap();
        match stanza {
            Stanza::Iq(iq) => {
                assert_eq!(iq.subtype(), IqType::Get);
                assert_eq!(iq.id(), Some("q1"));
                assert_eq!(iq.payload_ns(), Some("jabber:iq:roster"));
                assert_eq!(iq.from().unwrap().to_string(), "a@b/r");
            }
            other => panic!("expected iq, got {:?}", other),
        }
    }

    #[test]
    fn subscription_splits_from_presence() {
        match parse_stanza("<presence type='subscribe' from='a@b'/>").unwrap() {
            Stanza::Subscription(sub) => {
                assert_eq!(sub.subtype(), SubscriptionType::Subscribe)
            }
            other => panic!("expected subscription, got {:?}", other),
        }
        match parse_stanza("<presence from='a@b'/>").unwrap() {
            Stanza::Presence(presence) => {
                assert_eq!(presence.subtype(), PresenceType::Available)
            }
            other => panic!("expected presence, got {:?}", other),
        }
    }

    #[test]
    fn nonza_is_returned_unchanged() {
        let tag = parse_stanza("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
            .unwrap_err();
        assert_eq!(tag.name(), "proceed");
    }

    #[test]
    fn service_unavailable_reply() {
        let stanza = parse_stanza("<iq type='get' id='q9' from='x@y'><q xmlns='ns'/></iq>");
        let iq = match stanza.unwrap() {
            Stanza::Iq(iq) => iq,
            other => panic!("expected iq, got {:?}", other),
        };
        let reply = iq.service_unavailable_reply();
        assert_eq!(reply.attr("type"), Some("error"));
        assert_eq!(reply.attr("id"), Some("q9"));
        assert_eq!(reply.attr("to"), Some("x@y"));
        assert!(reply
            .find_child("error")
            .unwrap()
            .has_child_ns("service-unavailable", ns::XMPP_STANZAS));
    }

    #[test]
    fn error_condition() {
        let stanza = parse_stanza(
            "<iq type='error' id='bind'><error type='cancel'>\
             <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>",
        );
        let iq = match stanza.unwrap() {
            Stanza::Iq(iq) => iq,
            other => panic!("expected iq, got {:?}", other),
        };
        assert_eq!(iq.subtype(), IqType::Error);
        assert_eq!(iq.error_condition(), Some("conflict"));
    }
}
