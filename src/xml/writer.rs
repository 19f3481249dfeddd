//! The XML serializer (component G): turns a [`Signal`] stream back into
//! well-formed XML text.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::options::WriterOptions;
use crate::signal::{Attribute, Name, Signal};
use crate::stream::{Item, Stream};

struct OpenTag {
    local: String,
}

pub(crate) struct XmlWriter<'a> {
    signals: Stream<'a, Signal>,
    options: WriterOptions<'a>,
    stack: Vec<OpenTag>,
    /// prefix -> uri bindings visible at the current depth, most specific last
    scope: Vec<HashMap<String, String>>,
    next_auto_prefix: u32,
    buffer: VecDeque<u8>,
}

impl<'a> XmlWriter<'a> {
    pub fn new(signals: Stream<'a, Signal>, options: WriterOptions<'a>) -> Self {
        XmlWriter {
            signals,
            options,
            stack: Vec::new(),
            scope: vec![HashMap::new()],
            next_auto_prefix: 0,
            buffer: VecDeque::new(),
        }
    }

    fn push_str(&mut self, s: &str) {
        self.buffer.extend(s.as_bytes().iter().copied());
    }

    fn lookup_prefix(&self, uri: &str) -> Option<String> {
        if uri.is_empty() {
            return None;
        }
        for frame in self.scope.iter().rev() {
            for (prefix, bound_uri) in frame {
                if bound_uri == uri {
                    return Some(prefix.clone());
                }
            }
        }
        None
    }

    fn resolve_prefix(&mut self, uri: &str) -> (Option<String>, bool) {
        if uri.is_empty() {
            return (None, false);
        }
        if let Some(p) = self.lookup_prefix(uri) {
            return (Some(p), false);
        }
        if let Some(cb) = &mut self.options.prefix {
            if let Some(p) = cb(uri) {
                return (Some(p), true);
            }
        }
        let prefix = format!("ns{}", self.next_auto_prefix);
        self.next_auto_prefix += 1;
        (Some(prefix), true)
    }

    fn write_name(&mut self, name: &Name, new_bindings: &mut Vec<(String, String)>) -> String {
        if name.namespace.is_empty() {
            return name.local.clone();
        }
        let (prefix, is_new) = self.resolve_prefix(&name.namespace);
        match prefix {
            Some(p) => {
                if is_new {
                    new_bindings.push((p.clone(), name.namespace.clone()));
                }
                format!("{}:{}", p, name.local)
            }
            None => name.local.clone(),
        }
    }

    fn write_start(&mut self, name: Name, attrs: Vec<Attribute>) {
        let mut new_bindings = Vec::new();
        let tag_local = self.write_name(&name, &mut new_bindings);

        let mut attr_text = String::new();
        for a in &attrs {
            let mut bindings_for_attr = Vec::new();
            let attr_local = self.write_name(&a.name, &mut bindings_for_attr);
            new_bindings.extend(bindings_for_attr);
            attr_text.push(' ');
            attr_text.push_str(&attr_local);
            attr_text.push_str("=\"");
            attr_text.push_str(&escape_attr(&a.value));
            attr_text.push('"');
        }

        let mut frame = HashMap::new();
        for (prefix, uri) in &new_bindings {
            frame.insert(prefix.clone(), uri.clone());
            attr_text.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape_attr(uri)));
        }
        self.scope.push(frame);

        self.buffer.push_back(b'<');
        self.push_str(&tag_local);
        self.push_str(&attr_text);
        self.buffer.push_back(b'>');

        self.stack.push(OpenTag { local: tag_local });
    }

    fn write_end(&mut self, loc: Location) -> Result<()> {
        match self.stack.pop() {
            Some(open) => {
                self.scope.pop();
                self.buffer.push_back(b'<');
                self.buffer.push_back(b'/');
                self.push_str(&open.local);
                self.buffer.push_back(b'>');
                Ok(())
            }
            None => Err(Error::parse(
                loc,
                ErrorKind::UnexpectedEoi {
                    where_: "end-element with no open start tag".into(),
                },
            )),
        }
    }

    fn write_signal(&mut self, loc: Location, signal: Signal) -> Result<()> {
        match signal {
            Signal::XmlDeclaration(decl) => {
                self.push_str(&format!("<?xml version=\"{}\"", decl.version));
                if let Some(enc) = &decl.encoding {
                    self.push_str(&format!(" encoding=\"{}\"", enc));
                }
                if let Some(standalone) = decl.standalone {
                    self.push_str(&format!(
                        " standalone=\"{}\"",
                        if standalone { "yes" } else { "no" }
                    ));
                }
                self.push_str("?>");
            }
            Signal::Doctype(d) => {
                self.push_str("<!DOCTYPE");
                if let Some(name) = &d.name {
                    self.buffer.push_back(b' ');
                    self.push_str(name);
                }
                if let Some(pub_id) = &d.public_id {
                    self.push_str(&format!(" PUBLIC \"{}\"", pub_id));
                    if let Some(sys_id) = &d.system_id {
                        self.push_str(&format!(" \"{}\"", sys_id));
                    }
                } else if let Some(sys_id) = &d.system_id {
                    self.push_str(&format!(" SYSTEM \"{}\"", sys_id));
                }
                self.buffer.push_back(b'>');
            }
            Signal::ProcessingInstruction(target, body) => {
                self.buffer.push_back(b'<');
                self.buffer.push_back(b'?');
                self.push_str(&target);
                if !body.is_empty() {
                    self.buffer.push_back(b' ');
                    self.push_str(&body);
                }
                self.push_str("?>");
            }
            Signal::Comment(body) => {
                if body.contains("--") || body.ends_with('-') {
                    return Err(Error::parse(
                        loc,
                        ErrorKind::BadContent {
                            where_: "comment body contains '--' or ends in '-'".into(),
                        },
                    ));
                }
                self.push_str("<!--");
                self.push_str(&body);
                self.push_str("-->");
            }
            Signal::Text(chunks) => {
                for chunk in chunks {
                    let escaped = escape_text(&chunk);
                    self.push_str(&escaped);
                }
            }
            Signal::StartElement(name, attrs) => self.write_start(name, attrs),
            Signal::EndElement => self.write_end(loc)?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Item<u8> {
        match self.buffer.pop_front() {
            Some(b) => Item::Some(b),
            None => Item::End,
        }
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drives an [`XmlWriter`] lazily into a byte stream, one signal at a time.
pub(crate) fn xml_byte_stream<'a>(mut writer: XmlWriter<'a>) -> Stream<'a, u8> {
    Stream::from_fn(move || loop {
        if let Item::Some(b) = writer.flush() {
            return Ok(Item::Some(b));
        }
        match writer.signals.next()? {
            Item::End => {
                if !writer.stack.is_empty() {
                    // Unclosed elements at end of stream: close them so the
                    // output is always well-formed, matching the parser's
                    // own end-of-input recovery.
                    while !writer.stack.is_empty() {
                        writer.write_end(Location::start())?;
                    }
                    continue;
                }
                return Ok(Item::End);
            }
            Item::Some(signal) => writer.write_signal(Location::start(), signal)?,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Doctype, XmlDeclaration};
    use pretty_assertions::assert_eq;

    fn render(signals: Vec<Signal>) -> String {
        let s = Stream::of_list(signals);
        let writer = XmlWriter::new(s, WriterOptions::new());
        let bytes = xml_byte_stream(writer).to_vec().unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn renders_minimal_document() {
        let out = render(vec![
            Signal::XmlDeclaration(XmlDeclaration {
                version: "1.0".into(),
                encoding: None,
                standalone: None,
            }),
            Signal::StartElement(Name::unprefixed("r"), vec![]),
            Signal::text("hi"),
            Signal::EndElement,
        ]);
        assert_eq!(out, r#"<?xml version="1.0"?><r>hi</r>"#);
    }

    #[test]
    fn escapes_reserved_characters_in_text_and_attributes() {
        let out = render(vec![
            Signal::StartElement(
                Name::unprefixed("a"),
                vec![Attribute::new(Name::unprefixed("href"), "1 < 2 & \"q\"")],
            ),
            Signal::text("x & y < z"),
            Signal::EndElement,
        ]);
        assert_eq!(
            out,
            r#"<a href="1 &lt; 2 &amp; &quot;q&quot;">x &amp; y &lt; z</a>"#
        );
    }

    #[test]
    fn synthesizes_a_namespace_prefix_for_an_unbound_uri() {
        let out = render(vec![
            Signal::StartElement(Name::new("urn:example", "root"), vec![]),
            Signal::EndElement,
        ]);
        assert_eq!(out, r#"<ns0:root xmlns:ns0="urn:example"></ns0:root>"#);
    }

    #[test]
    fn unmatched_end_element_is_a_recoverable_error() {
        let s = Stream::of_list(vec![Signal::EndElement]);
        let writer = XmlWriter::new(s, WriterOptions::new());
        let err = xml_byte_stream(writer).to_vec().unwrap_err();
        assert!(matches!(err, Error::Parse(_, ErrorKind::UnexpectedEoi { .. })));
    }

    #[test]
    fn renders_doctype() {
        let out = render(vec![Signal::Doctype(Doctype {
            name: Some("html".into()),
            public_id: None,
            system_id: None,
            raw_text: None,
            force_quirks: false,
        })]);
        assert_eq!(out, "<!DOCTYPE html>");
    }
}
