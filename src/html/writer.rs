//! The HTML serializer (component H): turns a [`Signal`] stream back into
//! HTML5 text.
//!
//! Unlike the XML writer there is no self-closing tag syntax and void
//! elements never get a closing tag; raw-text elements (`script`, `style`)
//! are emitted without entity escaping.

use std::collections::VecDeque;

use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::options::WriterOptions;
use crate::signal::{Attribute, Name, Signal};
use crate::stream::{Item, Stream};

use super::tree::VOID_TAGS;

const RAWTEXT_WRITE_TAGS: &[&str] = &["script", "style"];

struct OpenTag {
    local: String,
    is_void: bool,
    is_raw: bool,
}

pub(crate) struct HtmlWriter<'a> {
    signals: Stream<'a, Signal>,
    #[allow(dead_code)]
    options: WriterOptions<'a>,
    stack: Vec<OpenTag>,
    buffer: VecDeque<u8>,
}

impl<'a> HtmlWriter<'a> {
    pub fn new(signals: Stream<'a, Signal>, options: WriterOptions<'a>) -> Self {
        HtmlWriter {
            signals,
            options,
            stack: Vec::new(),
            buffer: VecDeque::new(),
        }
    }

    fn push_str(&mut self, s: &str) {
        self.buffer.extend(s.as_bytes().iter().copied());
    }

    fn write_attr(&mut self, attr: &Attribute) {
        self.buffer.push_back(b' ');
        self.push_str(&attr.name.local);
        if attr.value.is_empty() {
            return;
        }
        self.buffer.push_back(b'=');
        if needs_quoting(&attr.value) {
            self.buffer.push_back(b'"');
            self.push_str(&escape_attr(&attr.value));
            self.buffer.push_back(b'"');
        } else {
            self.push_str(&attr.value);
        }
    }

    fn write_start(&mut self, name: Name, attrs: Vec<Attribute>) {
        let local = name.local;
        self.buffer.push_back(b'<');
        self.push_str(&local);
        for a in &attrs {
            self.write_attr(a);
        }
        self.buffer.push_back(b'>');

        let is_void = VOID_TAGS.contains(&local.as_str());
        let is_raw = RAWTEXT_WRITE_TAGS.contains(&local.as_str());
        self.stack.push(OpenTag { local, is_void, is_raw });
    }

    fn write_end(&mut self, loc: Location) -> Result<()> {
        match self.stack.pop() {
            Some(open) => {
                if !open.is_void {
                    self.buffer.push_back(b'<');
                    self.buffer.push_back(b'/');
                    self.push_str(&open.local);
                    self.buffer.push_back(b'>');
                }
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

    fn write_text(&mut self, loc: Location, chunks: Vec<String>) -> Result<()> {
        if let Some(open) = self.stack.last() {
            if open.is_void {
                return Err(Error::parse(
                    loc,
                    ErrorKind::BadContent {
                        where_: format!("<{}> is a void element and cannot contain content", open.local),
                    },
                ));
            }
            if open.is_raw {
                for chunk in chunks {
                    self.push_str(&chunk);
                }
                return Ok(());
            }
        }
        for chunk in chunks {
            self.push_str(&escape_text(&chunk));
        }
        Ok(())
    }

    fn write_signal(&mut self, loc: Location, signal: Signal) -> Result<()> {
        match signal {
            // HTML signals never carry these; accepted and dropped so a
            // stream built from a mix of sources doesn't fail outright.
            Signal::XmlDeclaration(_) | Signal::ProcessingInstruction(_, _) => {}
            Signal::Doctype(_) => self.push_str("<!DOCTYPE html>"),
            Signal::Comment(body) => {
                if body.contains("-->") {
                    return Err(Error::parse(
                        loc,
                        ErrorKind::BadContent {
                            where_: "comment body contains '-->'".into(),
                        },
                    ));
                }
                self.push_str("<!--");
                self.push_str(&body);
                self.push_str("-->");
            }
            Signal::Text(chunks) => self.write_text(loc, chunks)?,
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

/// An attribute value can be left unquoted when it contains none of the
/// characters that would make the boundary ambiguous.
fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '"' | '\'' | '=' | '<' | '>' | '`'))
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
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
            '"' => out.push_str("&quot;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drives an [`HtmlWriter`] lazily into a byte stream, one signal at a time.
pub(crate) fn html_byte_stream<'a>(mut writer: HtmlWriter<'a>) -> Stream<'a, u8> {
    Stream::from_fn(move || loop {
        if let Item::Some(b) = writer.flush() {
            return Ok(Item::Some(b));
        }
        match writer.signals.next()? {
            Item::End => {
                if !writer.stack.is_empty() {
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
    use crate::signal::Doctype;
    use pretty_assertions::assert_eq;

    fn render(signals: Vec<Signal>) -> String {
        let s = Stream::of_list(signals);
        let writer = HtmlWriter::new(s, WriterOptions::new());
        let bytes = html_byte_stream(writer).to_vec().unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn renders_a_minimal_document() {
        let out = render(vec![
            Signal::Doctype(Doctype::default()),
            Signal::StartElement(Name::new("http://www.w3.org/1999/xhtml", "p"), vec![]),
            Signal::text("hi"),
            Signal::EndElement,
        ]);
        assert_eq!(out, "<!DOCTYPE html><p>hi</p>");
    }

    #[test]
    fn void_elements_have_no_closing_tag() {
        let out = render(vec![
            Signal::StartElement(
                Name::new("http://www.w3.org/1999/xhtml", "br"),
                vec![],
            ),
            Signal::EndElement,
        ]);
        assert_eq!(out, "<br>");
    }

    #[test]
    fn minimizes_attribute_quoting_and_uses_boolean_shorthand() {
        let out = render(vec![
            Signal::StartElement(
                Name::new("http://www.w3.org/1999/xhtml", "input"),
                vec![
                    Attribute::new(Name::unprefixed("type"), "text"),
                    Attribute::new(Name::unprefixed("disabled"), ""),
                    Attribute::new(Name::unprefixed("value"), "a b"),
                ],
            ),
            Signal::EndElement,
        ]);
        assert_eq!(out, r#"<input type=text disabled value="a b">"#);
    }

    #[test]
    fn script_content_is_written_verbatim() {
        let out = render(vec![
            Signal::StartElement(Name::new("http://www.w3.org/1999/xhtml", "script"), vec![]),
            Signal::text("if (a < b && c) {}"),
            Signal::EndElement,
        ]);
        assert_eq!(out, "<script>if (a < b && c) {}</script>");
    }

    #[test]
    fn void_element_rejects_content() {
        let s = Stream::of_list(vec![
            Signal::StartElement(Name::new("http://www.w3.org/1999/xhtml", "br"), vec![]),
            Signal::text("oops"),
        ]);
        let writer = HtmlWriter::new(s, WriterOptions::new());
        let err = html_byte_stream(writer).to_vec().unwrap_err();
        assert!(matches!(err, Error::Parse(_, ErrorKind::BadContent { .. })));
    }
}
