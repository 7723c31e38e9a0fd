// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Incremental parser for an open XML stream.
//!
//! The parser consumes arbitrary chunks of a document and emits events
//! for the zero-depth root open tag (`<stream:stream …>`), every fully
//! closed immediate child of the root, and the root close tag. Input may
//! be split at any byte boundary; incomplete structures are buffered
//! inside the parser state until more data arrives.

use crate::error::Error;
use crate::escape::resolve_entity;
use crate::tag::Tag;

/// An event emitted by the [`Parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The root element of the stream was opened. The tag carries the
    /// root's attributes and no children.
    StreamStart(Tag),
    /// An immediate child of the root element was closed.
    Stanza(Tag),
    /// The root element was closed.
    StreamEnd,
}

/// Longest accepted entity body (`&#x10FFFF;` without the delimiters).
const MAX_ENTITY_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside markup, collecting character data.
    Text,
    /// A `<` was consumed.
    TagStart,
    /// Inside an `<?…?>` processing instruction or XML declaration.
    Preamble,
    /// A `?` was seen inside the preamble.
    PreambleEnd,
    /// Collecting an element name after `<`.
    OpenName,
    /// Inside an open tag, before an attribute or the closing `>`.
    TagInside,
    /// Collecting an attribute name.
    AttrName,
    /// After an attribute name, waiting for `=`.
    AttrNameEnd,
    /// After `=`, waiting for the opening quote.
    AttrEqual,
    /// Inside a quoted attribute value; the payload is the quote char.
    AttrValue(char),
    /// A `/` was seen inside an open tag; the element is empty.
    EmptyElement,
    /// Collecting a closing element name after `</`.
    CloseName,
    /// After a complete closing name, waiting for `>`.
    CloseNameEnd,
    /// After `<!`, matching the `[CDATA[` introducer.
    CDataIntro,
    /// Inside a CDATA section.
    CData,
    /// One `]` seen inside CDATA.
    CDataEnd1,
    /// Two `]` seen inside CDATA.
    CDataEnd2,
}

/// Incremental, restartable XML stream parser.
#[derive(Debug)]
pub struct Parser {
    state: State,
    /// Open elements below the stream root, deepest last.
    stack: Vec<Tag>,
    root_open: bool,
    root_name: String,
    name: String,
    attr_name: String,
    attr_value: String,
    attribs: Vec<(String, String)>,
    text: String,
    /// Body of a pending `&…;` reference, without the delimiters.
    entity: Option<String>,
    cdata_intro: String,
    /// Byte offset over everything fed since construction or reset.
    position: usize,
}

impl Default for Parser {
    fn default() -> Parser {
        Parser::new()
    }
}

impl Parser {
    /// Creates a parser in its initial state.
    pub fn new() -> Parser {
        Parser {
            state: State::Text,
            stack: Vec::new(),
            root_open: false,
            root_name: String::new(),
            name: String::new(),
            attr_name: String::new(),
            attr_value: String::new(),
            attribs: Vec::new(),
            text: String::new(),
            entity: None,
            cdata_intro: String::new(),
            position: 0,
        }
    }

    /// Discards all partial state and returns the parser to its initial
    /// state. Used after stream restarts.
    pub fn reset(&mut self) {
        *self = Parser::new();
    }

    /// Current nesting depth below the stream root.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feeds a chunk of the stream and returns the events completed by
    /// it, in document order.
    ///
    /// Incomplete input is buffered and never an error; a later chunk
    /// continues exactly where this one stopped.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<StreamEvent>, Error> {
        let mut events = Vec::new();
        for c in chunk.chars() {
            self.step(c, &mut events)?;
            self.position += c.len_utf8();
        }
        Ok(events)
    }

    fn malformed<T>(&self) -> Result<T, Error> {
        Err(Error::Malformed {
            position: self.position,
        })
    }

    fn step(&mut self, c: char, events: &mut Vec<StreamEvent>) -> Result<(), Error> {
        // Entity references occur in character data and attribute
        // values; resolve them before the regular state handling.
        if self.entity.is_some() {
            return self.step_entity(c);
        }

        match self.state {
            State::Text => match c {
                '<' => {
                    self.flush_text();
                    self.state = State::TagStart;
                }
                '&' => self.entity = Some(String::new()),
                c => self.text.push(c),
            },

            State::TagStart => match c {
                '/' => {
                    self.name.clear();
                    self.state = State::CloseName;
                }
                '?' => self.state = State::Preamble,
                '!' => {
                    self.cdata_intro.clear();
                    self.state = State::CDataIntro;
                }
                c if is_name_start(c) => {
                    self.name.clear();
                    self.name.push(c);
                    self.state = State::OpenName;
                }
                _ => return self.malformed(),
            },

            State::Preamble => {
                if c == '?' {
                    self.state = State::PreambleEnd;
                }
            }
            State::PreambleEnd => match c {
                '>' => self.state = State::Text,
                '?' => (),
                _ => self.state = State::Preamble,
            },

            State::OpenName => match c {
                c if is_name(c) => self.name.push(c),
                c if c.is_whitespace() => self.state = State::TagInside,
                '/' => self.state = State::EmptyElement,
                '>' => self.open_tag(false, events)?,
                _ => return self.malformed(),
            },

            State::TagInside => match c {
                c if c.is_whitespace() => (),
                '/' => self.state = State::EmptyElement,
                '>' => self.open_tag(false, events)?,
                c if is_name_start(c) => {
                    self.attr_name.clear();
                    self.attr_name.push(c);
                    self.state = State::AttrName;
                }
                _ => return self.malformed(),
            },

            State::AttrName => match c {
                c if is_name(c) => self.attr_name.push(c),
                '=' => self.state = State::AttrEqual,
                c if c.is_whitespace() => self.state = State::AttrNameEnd,
                _ => return self.malformed(),
            },

            State::AttrNameEnd => match c {
                c if c.is_whitespace() => (),
                '=' => self.state = State::AttrEqual,
                _ => return self.malformed(),
            },

            State::AttrEqual => match c {
                c if c.is_whitespace() => (),
                '\'' | '"' => {
                    self.attr_value.clear();
                    self.state = State::AttrValue(c);
                }
                _ => return self.malformed(),
            },

            State::AttrValue(quote) => match c {
                c if c == quote => {
                    let name = core::mem::take(&mut self.attr_name);
                    let value = core::mem::take(&mut self.attr_value);
                    self.attribs.push((name, value));
                    self.state = State::TagInside;
                }
                '&' => self.entity = Some(String::new()),
                '<' => return self.malformed(),
                c => self.attr_value.push(c),
            },

            State::EmptyElement => match c {
                '>' => self.open_tag(true, events)?,
                _ => return self.malformed(),
            },

            State::CloseName => match c {
                c if is_name(c) => self.name.push(c),
                '>' => {
                    self.close_tag(events)?;
                    self.state = State::Text;
                }
                c if c.is_whitespace() && !self.name.is_empty() => {
                    self.state = State::CloseNameEnd;
                }
                _ => return self.malformed(),
            },

            State::CloseNameEnd => match c {
                c if c.is_whitespace() => (),
                '>' => {
                    self.close_tag(events)?;
                    self.state = State::Text;
                }
                _ => return self.malformed(),
            },

            State::CDataIntro => {
                self.cdata_intro.push(c);
                if "[CDATA[" == self.cdata_intro {
                    self.state = State::CData;
                } else if !"[CDATA[".starts_with(self.cdata_intro.as_str()) {
                    return self.malformed();
                }
            }

            State::CData => match c {
                ']' => self.state = State::CDataEnd1,
                c => self.text.push(c),
            },

            State::CDataEnd1 => match c {
                ']' => self.state = State::CDataEnd2,
                c => {
                    self.text.push(']');
                    self.text.push(c);
                    self.state = State::CData;
                }
            },

            State::CDataEnd2 => match c {
                '>' => {
                    self.flush_text();
                    self.state = State::Text;
                }
                ']' => self.text.push(']'),
                c => {
                    self.text.push_str("]]");
                    self.text.push(c);
                    self.state = State::CData;
                }
            },
        }
        Ok(())
    }

    fn step_entity(&mut self, c: char) -> Result<(), Error> {
        let entity = self.entity.as_mut().expect("entity state");
        if c == ';' {
            let resolved = resolve_entity(entity).ok_or(Error::InvalidEntity {
                position: self.position,
            })?;
            self.entity = None;
            match self.state {
                State::Text => self.text.push(resolved),
                State::AttrValue(_) => self.attr_value.push(resolved),
                _ => return self.malformed(),
            }
            Ok(())
        } else if entity.len() >= MAX_ENTITY_LEN || !(c.is_ascii_alphanumeric() || c == '#') {
            self.malformed()
        } else {
            entity.push(c);
            Ok(())
        }
    }

    /// Attaches pending character data to the innermost open element.
    /// Data outside any stanza (whitespace keepalives between stanzas,
    /// text before the stream header) is discarded.
    fn flush_text(&mut self) {
        let text = core::mem::take(&mut self.text);
        if text.is_empty() {
            return;
        }
        if let Some(current) = self.stack.last_mut() {
            current.add_text(text);
        }
    }

    fn open_tag(&mut self, empty: bool, events: &mut Vec<StreamEvent>) -> Result<(), Error> {
        let mut tag = Tag::new(core::mem::take(&mut self.name));
        for (name, value) in self.attribs.drain(..) {
            tag.set_attr(name, value);
        }
        self.state = State::Text;

        if !self.root_open && self.stack.is_empty() {
            // Zero-depth open tag: the stream root.
            self.root_open = true;
            self.root_name = tag.name().to_owned();
            events.push(StreamEvent::StreamStart(tag));
            if empty {
                self.root_open = false;
                events.push(StreamEvent::StreamEnd);
            }
            return Ok(());
        }

        if empty {
            self.finish_element(tag, events);
        } else {
            self.stack.push(tag);
        }
        Ok(())
    }

    fn close_tag(&mut self, events: &mut Vec<StreamEvent>) -> Result<(), Error> {
        match self.stack.pop() {
            Some(tag) => {
                if tag.name() != self.name {
                    return self.malformed();
                }
                self.finish_element(tag, events);
                Ok(())
            }
            None => {
                // Closing the stream root itself.
                if !self.root_open || self.name != self.root_name {
                    return self.malformed();
                }
                self.root_open = false;
                events.push(StreamEvent::StreamEnd);
                Ok(())
            }
        }
    }

    fn finish_element(&mut self, tag: Tag, events: &mut Vec<StreamEvent>) {
        match self.stack.last_mut() {
            Some(parent) => parent.add_child(tag),
            None => events.push(StreamEvent::Stanza(tag)),
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut Parser, input: &str) -> Vec<StreamEvent> {
        parser.feed(input).expect("well-formed input")
    }

    fn stanza(event: &StreamEvent) -> &Tag {
        match event {
            StreamEvent::Stanza(tag) => tag,
            other => panic!("expected stanza, got {:?}", other),
        }
    }

    #[test]
    fn stream_open_and_stanzas() {
        let mut parser = Parser::new();
        let events = feed_all(
            &mut parser,
            "<?xml version='1.0'?>\
             <stream:stream xmlns='jabber:client' id='s1' version='1.0'>\
             <message from='a@b'><body>hi</body></message>\
             <presence/>",
        );
        assert_eq!(events.len(), 3);
        match &events[0] {
            StreamEvent::StreamStart(tag) => {
                assert_eq!(tag.name(), "stream:stream");
                assert_eq!(tag.attr("id"), Some("s1"));
            }
            other => panic!("expected stream start, got {:?}", other),
        }
        let message = stanza(&events[1]);
        assert_eq!(message.find_child("body").unwrap().text(), "hi");
        assert_eq!(stanza(&events[2]).name(), "presence");
    }

    #[test]
    fn chunked_input_at_every_boundary() {
        let input = "<stream:stream id='x'><iq type='get' id='q&amp;1'>\
                     <query xmlns='jabber:iq:roster'/></iq>";
        // Split the document at every possible position and verify the
        // events come out identical.
        let reference = feed_all(&mut Parser::new(), input);
        for split in 1..input.len() {
            if !input.is_char_boundary(split) {
                continue;
            }
            let mut parser = Parser::new();
            let mut events = feed_all(&mut parser, &input[..split]);
            events.extend(feed_all(&mut parser, &input[split..]));
            assert_eq!(events, reference, "split at {}", split);
        }
    }

    #[test]
    fn entities_in_text_and_attributes() {
        let mut parser = Parser::new();
        let events = feed_all(
            &mut parser,
            "<s><m a='&lt;&quot;&gt;'>x &amp; y &#65;&#x42;</m>",
        );
        let m = stanza(&events[1]);
        assert_eq!(m.attr("a"), Some("<\">"));
        assert_eq!(m.text(), "x & y AB");
    }

    #[test]
    fn cdata_section() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "<s><m><![CDATA[<not> & parsed]]]></m>");
        assert_eq!(stanza(&events[1]).text(), "<not> & parsed]");
    }

    #[test]
    fn stream_end() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "<stream:stream><a/></stream:stream>");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], StreamEvent::StreamEnd);
    }

    #[test]
    fn self_closing_root() {
        let mut parser = Parser::new();
        let events = feed_all(&mut parser, "<body sid='a1b2'/>");
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::StreamStart(tag) => assert_eq!(tag.attr("sid"), Some("a1b2")),
            other => panic!("expected stream start, got {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::StreamEnd);
    }

    #[test]
    fn parser_is_reusable_after_stream_end() {
        let mut parser = Parser::new();
        feed_all(&mut parser, "<body rid='1'><x/></body>");
        let events = feed_all(&mut parser, "<body rid='2'><y/></body>");
        assert_eq!(events.len(), 3);
        assert_eq!(stanza(&events[1]).name(), "y");
    }

    #[test]
    fn whitespace_keepalives_are_discarded() {
        let mut parser = Parser::new();
        let mut events = feed_all(&mut parser, "<stream:stream> \n ");
        events.extend(feed_all(&mut parser, " <iq/> \n"));
        assert_eq!(events.len(), 2);
        assert_eq!(stanza(&events[1]).name(), "iq");
    }

    #[test]
    fn mismatched_close_reports_position() {
        let mut parser = Parser::new();
        let err = parser.feed("<s><a></b>").unwrap_err();
        assert_eq!(err, Error::Malformed { position: 9 });
    }

    #[test]
    fn malformed_markup_reports_position() {
        let mut parser = Parser::new();
        let err = parser.feed("<s><=/>").unwrap_err();
        assert_eq!(err.position(), 4);
    }

    #[test]
    fn invalid_entity_is_an_error() {
        let mut parser = Parser::new();
        assert!(matches!(
            parser.feed("<s><m>&bogus;</m>"),
            Err(Error::InvalidEntity { .. })
        ));
    }

    #[test]
    fn reset_restarts_the_stream() {
        let mut parser = Parser::new();
        feed_all(&mut parser, "<stream:stream id='one'><iq");
        parser.reset();
        let events = feed_all(&mut parser, "<stream:stream id='two'>");
        match &events[0] {
            StreamEvent::StreamStart(tag) => assert_eq!(tag.attr("id"), Some("two")),
            other => panic!("expected stream start, got {:?}", other),
        }
    }

    #[test]
    fn round_trip_parse_of_serialized_tag() {
        let tag = Tag::new("message")
            .attribute("from", "romeo@example.net/orchard")
            .attribute("type", "chat")
            .child(Tag::with_text("body", "art thou not <Romeo & a Montague>?"))
            .child(
                Tag::new("active").attribute("xmlns", "http://jabber.org/protocol/chatstates"),
            );
        let mut parser = Parser::new();
        let mut events = feed_all(&mut parser, "<stream:stream>");
        events.extend(feed_all(&mut parser, &tag.xml()));
        assert_eq!(stanza(&events[1]), &tag);
    }
}
