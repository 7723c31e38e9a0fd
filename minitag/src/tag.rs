// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The [`Tag`] element tree.

use core::fmt;

use crate::escape::escape;

/// A child of a [`Tag`]: either a nested element or character data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Tag(Tag),
    /// Character data. Entities are stored in decoded form.
    Text(String),
}

impl Node {
    /// Returns the contained element, if this node is one.
    pub fn as_tag(&self) -> Option<&Tag> {
        match self {
            Node::Tag(tag) => Some(tag),
            Node::Text(_) => None,
        }
    }
}

/// An XML element: a name, an ordered set of uniquely named attributes
/// and an ordered list of child nodes. The element exclusively owns its
/// subtree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tag {
    name: String,
    attribs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Tag {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Tag {
        Tag {
            name: name.into(),
            attribs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates an element with a single text child.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Tag {
        let mut tag = Tag::new(name);
        tag.add_text(text);
        tag
    }

    /// The element name, including any namespace prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets an attribute, replacing any existing attribute of the same
    /// name while keeping its position.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        for attr in self.attribs.iter_mut() {
            if attr.0 == name {
                attr.1 = value;
                return;
            }
        }
        self.attribs.push((name, value));
    }

    /// Looks up an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attribs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the attribute is present.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Whether the attribute is present with exactly this value.
    pub fn has_attr_value(&self, name: &str, value: &str) -> bool {
        self.attr(name) == Some(value)
    }

    /// The ordered attribute list.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attribs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Appends a child element.
    pub fn add_child(&mut self, child: Tag) {
        self.children.push(Node::Tag(child));
    }

    /// Appends character data.
    pub fn add_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Builder-style [`set_attr`][`Self::set_attr`].
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Tag {
        self.set_attr(name, value);
        self
    }

    /// Builder-style [`add_child`][`Self::add_child`].
    pub fn child(mut self, child: Tag) -> Tag {
        self.add_child(child);
        self
    }

    /// The raw child node list, in document order.
    pub fn nodes(&self) -> &[Node] {
        &self.children
    }

    /// Iterates over the direct child elements, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Tag> {
        self.children.iter().filter_map(Node::as_tag)
    }

    /// Concatenated direct character data of this element.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    /// Finds the first direct child element with the given name.
    pub fn find_child(&self, name: &str) -> Option<&Tag> {
        self.children().find(|child| child.name == name)
    }

    /// Finds the first direct child with the given name carrying an
    /// `xmlns` attribute with the given value.
    pub fn find_child_ns(&self, name: &str, xmlns: &str) -> Option<&Tag> {
        self.children()
            .find(|child| child.name == name && child.attr("xmlns") == Some(xmlns))
    }

    /// Whether a direct child element with the given name exists.
    pub fn has_child(&self, name: &str) -> bool {
        self.find_child(name).is_some()
    }

    /// Whether a direct child with the given name and `xmlns` exists.
    pub fn has_child_ns(&self, name: &str, xmlns: &str) -> bool {
        self.find_child_ns(name, xmlns).is_some()
    }

    /// Whether a direct child with the given name carries the given
    /// attribute value.
    pub fn has_child_with_attr(&self, name: &str, attr: &str, value: &str) -> bool {
        self.children()
            .any(|child| child.name == name && child.has_attr_value(attr, value))
    }

    /// Whether a direct child with the given name has exactly the given
    /// character data.
    pub fn has_child_with_text(&self, name: &str, text: &str) -> bool {
        self.children()
            .any(|child| child.name == name && child.text() == text)
    }

    /// Serializes the subtree, escaping attribute values and character
    /// data.
    pub fn xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attribs {
            out.push(' ');
            out.push_str(name);
            out.push_str("='");
            out.push_str(&escape(value));
            out.push('\'');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Tag(child) => child.write_into(out),
                Node::Text(text) => out.push_str(&escape(text)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_empty() {
        let tag = Tag::new("presence");
        assert_eq!(tag.xml(), "<presence/>");
    }

    #[test]
    fn serialize_nested() {
        let tag = Tag::new("iq")
            .attribute("type", "set")
            .attribute("id", "bind")
            .child(
                Tag::new("bind")
                    .attribute("xmlns", "urn:ietf:params:xml:ns:xmpp-bind")
                    .child(Tag::with_text("resource", "balcony")),
            );
        assert_eq!(
            tag.xml(),
            "<iq type='set' id='bind'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
             <resource>balcony</resource></bind></iq>"
        );
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let tag = Tag::with_text("body", "1 < 2 & 'quoted'").attribute("x", "a\"b");
        assert_eq!(
            tag.xml(),
            "<body x='a&quot;b'>1 &lt; 2 &amp; &apos;quoted&apos;</body>"
        );
    }

    #[test]
    fn set_attr_replaces_in_place() {
        let mut tag = Tag::new("x");
        tag.set_attr("a", "1");
        tag.set_attr("b", "2");
        tag.set_attr("a", "3");
        assert_eq!(tag.xml(), "<x a='3' b='2'/>");
    }

    #[test]
    fn find_and_text() {
        let tag = Tag::new("features")
            .child(Tag::new("starttls").attribute("xmlns", "tls-ns"))
            .child(
                Tag::new("mechanisms")
                    .attribute("xmlns", "sasl-ns")
                    .child(Tag::with_text("mechanism", "PLAIN")),
            );
        assert!(tag.has_child_ns("starttls", "tls-ns"));
        assert!(!tag.has_child_ns("starttls", "other"));
        let mechs = tag.find_child_ns("mechanisms", "sasl-ns").unwrap();
        assert!(mechs.has_child_with_text("mechanism", "PLAIN"));
        assert_eq!(mechs.find_child("mechanism").unwrap().text(), "PLAIN");
    }
}
