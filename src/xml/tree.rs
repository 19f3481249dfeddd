//! The XML tree constructor (component D): turns [`Token`]s into located
//! [`Signal`]s, enforcing the document/fragment grammar and resolving
//! namespaces.

use std::collections::VecDeque;

use crate::error::{ErrorKind, Result};
use crate::location::Location;
use crate::options::{Context, ParserOptions};
use crate::signal::{Attribute, Doctype, Name, Signal, XmlDeclaration};
use crate::stream::{Item, Stream};

use super::token::Token;
use super::tokenizer::XmlTokenizer;

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Prolog,
    PostProlog,
    InElement,
    Epilog,
}

struct OpenElement {
    local: String,
    namespace: String,
    bindings: std::collections::HashMap<String, String>, // this element's own xmlns declarations
    default_ns: Option<String>,
}

pub(crate) struct XmlTreeConstructor<'a> {
    tokenizer: XmlTokenizer<'a>,
    options: ParserOptions<'a>,
    phase: Phase,
    stack: Vec<OpenElement>,
    seen_root: bool,
    seen_doctype: bool,
    seen_decl: bool,
    pending: VecDeque<(Location, Signal)>,
    text_buf: Option<(Location, String)>,
    done: bool,
    context: Context,
}

impl<'a> XmlTreeConstructor<'a> {
    pub fn new(tokenizer: XmlTokenizer<'a>, options: ParserOptions<'a>) -> Self {
        let context = options.context.clone().unwrap_or(Context::Document);
        XmlTreeConstructor {
            tokenizer,
            options,
            phase: Phase::Prolog,
            stack: Vec::new(),
            seen_root: false,
            seen_doctype: false,
            seen_decl: false,
            pending: VecDeque::new(),
            text_buf: None,
            done: false,
            context,
        }
    }

    fn report(&mut self, loc: Location, kind: ErrorKind) {
        self.options.report_error(loc, kind);
    }

    fn flush_text(&mut self) {
        if let Some((loc, text)) = self.text_buf.take() {
            if !text.is_empty() {
                self.pending.push_back((loc, Signal::text(text)));
            }
        }
    }

    fn push_text(&mut self, loc: Location, text: String) {
        match &mut self.text_buf {
            Some((_, buf)) => buf.push_str(&text),
            None => self.text_buf = Some((loc, text)),
        }
    }

    /// Resolves a possibly-prefixed tag name against the current namespace
    /// scope, consulting the user `namespace` callback for unbound
    /// prefixes.
    fn resolve_name(&mut self, loc: Location, raw: &str) -> Name {
        if let Some((prefix, local)) = raw.split_once(':') {
            for el in self.stack.iter().rev() {
                if let Some(uri) = el.bindings.get(prefix) {
                    return Name::new(uri.clone(), local.to_string());
                }
            }
            if let Some(cb) = &mut self.options.namespace {
                if let Some(uri) = cb(prefix) {
                    return Name::new(uri, local.to_string());
                }
            }
            self.report(
                loc,
                ErrorKind::BadNamespace {
                    detail: format!("unbound prefix '{}'", prefix),
                },
            );
            Name::new("", local.to_string())
        } else {
            let default_ns = self
                .stack
                .iter()
                .rev()
                .find_map(|el| el.default_ns.clone())
                .unwrap_or_default();
            Name::new(default_ns, raw.to_string())
        }
    }

    fn next_token(&mut self) -> Result<Option<(Location, Token)>> {
        // The tokenizer needs `report` and `entity` simultaneously, while
        // both conceptually live on `self.options`; reports are collected
        // into a buffer first and replayed afterwards so only one of the
        // two callbacks needs to borrow `self.options` at a time.
        let mut noop_entity = |_: &str| None;
        let mut reports: Vec<(Location, ErrorKind)> = Vec::new();
        let result = {
            let mut report_into = |loc: Location, kind: ErrorKind| reports.push((loc, kind));
            match &mut self.options.entity {
                Some(cb) => self.tokenizer.next_token(&mut report_into, &mut **cb)?,
                None => self.tokenizer.next_token(&mut report_into, &mut noop_entity)?,
            }
        };
        for (loc, kind) in reports {
            self.report(loc, kind);
        }
        Ok(result)
    }

    pub fn next_signal(&mut self) -> Result<Option<(Location, Signal)>> {
        loop {
            if let Some(sig) = self.pending.pop_front() {
                return Ok(Some(sig));
            }
            if self.done {
                return Ok(None);
            }

            let next = self.next_token()?;
            match next {
                None => {
                    self.flush_text();
                    self.at_eof();
                    self.done = true;
                    if let Some(sig) = self.pending.pop_front() {
                        return Ok(Some(sig));
                    }
                    return Ok(None);
                }
                Some((loc, token)) => self.handle_token(loc, token)?,
            }
        }
    }

    fn at_eof(&mut self) {
        if !self.stack.is_empty() {
            self.report(
                Location::start(),
                ErrorKind::UnmatchedStartTag {
                    name: self.stack.last().map(|e| e.local.clone()).unwrap_or_default(),
                },
            );
        }
        while !self.stack.is_empty() {
            self.stack.pop();
            self.pending.push_back((Location::start(), Signal::EndElement));
        }
    }

    fn handle_token(&mut self, loc: Location, token: Token) -> Result<()> {
        match token {
            Token::XmlDecl {
                version,
                encoding,
                standalone,
            } => {
                self.flush_text();
                if self.seen_decl || self.seen_root {
                    self.report(
                        loc,
                        ErrorKind::BadDocument {
                            detail: "XML declaration must be the first signal".into(),
                        },
                    );
                } else {
                    self.seen_decl = true;
                    self.pending.push_back((
                        loc,
                        Signal::XmlDeclaration(XmlDeclaration {
                            version,
                            encoding,
                            standalone,
                        }),
                    ));
                }
            }
            Token::Comment(body) => {
                self.flush_text();
                self.pending.push_back((loc, Signal::Comment(body)));
            }
            Token::ProcessingInstruction { target, body } => {
                self.flush_text();
                self.pending
                    .push_back((loc, Signal::ProcessingInstruction(target, body)));
            }
            Token::Doctype {
                name,
                public_id,
                system_id,
                raw_text,
                force_quirks,
            } => {
                self.flush_text();
                if self.seen_doctype || self.seen_root {
                    self.report(
                        loc,
                        ErrorKind::BadDocument {
                            detail: "doctype must precede the root element".into(),
                        },
                    );
                } else {
                    self.seen_doctype = true;
                    self.pending.push_back((
                        loc,
                        Signal::Doctype(Doctype {
                            name,
                            public_id,
                            system_id,
                            raw_text,
                            force_quirks,
                        }),
                    ));
                }
            }
            Token::Text(text) => {
                if matches!(self.phase, Phase::Prolog | Phase::Epilog) && text.trim().is_empty() {
                    // Whitespace-only Misc outside the element: allowed, dropped.
                } else if matches!(self.phase, Phase::Prolog | Phase::Epilog) {
                    self.report(
                        loc,
                        ErrorKind::BadDocument {
                            detail: "character data is not allowed outside the root element".into(),
                        },
                    );
                } else {
                    self.push_text(loc, text);
                }
            }
            Token::CData(text) => {
                self.push_text(loc, text);
            }
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                self.flush_text();
                self.open_element(loc, name, attrs, self_closing);
            }
            Token::EndTag { name } => {
                self.flush_text();
                self.close_element(loc, name);
            }
        }
        Ok(())
    }

    fn open_element(
        &mut self,
        loc: Location,
        raw_name: String,
        raw_attrs: Vec<super::token::RawAttribute>,
        self_closing: bool,
    ) {
        if matches!(self.context, Context::Document) && self.seen_root && self.stack.is_empty() {
            self.report(
                loc,
                ErrorKind::BadDocument {
                    detail: "a document may have only one root element".into(),
                },
            );
        }
        self.seen_root = true;
        self.phase = Phase::InElement;

        let mut bindings = std::collections::HashMap::new();
        let mut default_ns = None;
        for a in &raw_attrs {
            if a.name == "xmlns" {
                default_ns = Some(a.value.clone());
            } else if let Some(prefix) = a.name.strip_prefix("xmlns:") {
                bindings.insert(prefix.to_string(), a.value.clone());
            }
        }

        self.stack.push(OpenElement {
            local: String::new(),
            namespace: String::new(),
            bindings,
            default_ns,
        });

        let name = self.resolve_name(loc, &raw_name);
        if let Some(top) = self.stack.last_mut() {
            top.local = name.local.clone();
            top.namespace = name.namespace.clone();
        }

        let mut attrs = Vec::with_capacity(raw_attrs.len());
        for a in raw_attrs {
            if a.name == "xmlns" || a.name.starts_with("xmlns:") {
                continue;
            }
            let attr_name = if a.name.contains(':') {
                self.resolve_name(loc, &a.name)
            } else {
                Name::unprefixed(a.name.clone())
            };
            attrs.push(Attribute::new(attr_name, a.value));
        }

        self.pending.push_back((loc, Signal::StartElement(name, attrs)));

        if self_closing {
            self.stack.pop();
            self.pending.push_back((loc, Signal::EndElement));
            if self.stack.is_empty() {
                self.phase = Phase::Epilog;
            }
        }
    }

    fn close_element(&mut self, loc: Location, raw_name: String) {
        let local = raw_name.rsplit(':').next().unwrap_or(&raw_name).to_string();
        if let Some(pos) = self
            .stack
            .iter()
            .rposition(|el| el.local == local || el.local == raw_name)
        {
            let depth_to_close = self.stack.len() - pos;
            if depth_to_close > 1 {
                self.report(
                    loc,
                    ErrorKind::UnmatchedStartTag {
                        name: self.stack.last().map(|e| e.local.clone()).unwrap_or_default(),
                    },
                );
            }
            for _ in 0..depth_to_close {
                self.stack.pop();
                self.pending.push_back((loc, Signal::EndElement));
            }
            if self.stack.is_empty() {
                self.phase = Phase::Epilog;
            }
        } else {
            self.report(loc, ErrorKind::UnmatchedEndTag { name: raw_name });
        }
    }
}

/// Adapts a [`XmlTreeConstructor`] into the public `Stream<(Location,
/// Signal)>` surface.
pub(crate) fn xml_signal_stream<'a>(
    mut tree: XmlTreeConstructor<'a>,
) -> Stream<'a, (Location, Signal)> {
    Stream::from_fn(move || match tree.next_signal()? {
        None => Ok(Item::End),
        Some(sig) => Ok(Item::Some(sig)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Vec<Signal> {
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let chars = crate::encoding::decode(bytes, false, Some(Encoding::Utf8), |_, _| {}).unwrap();
        let tokenizer = XmlTokenizer::new(chars);
        let tree = XmlTreeConstructor::new(tokenizer, ParserOptions::new());
        xml_signal_stream(tree)
            .to_list()
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect()
    }

    #[test]
    fn minimal_document() {
        let sigs = parse(r#"<?xml version="1.0"?><r>hi</r>"#);
        assert_eq!(
            sigs,
            vec![
                Signal::XmlDeclaration(XmlDeclaration {
                    version: "1.0".into(),
                    encoding: None,
                    standalone: None,
                }),
                Signal::StartElement(Name::unprefixed("r"), vec![]),
                Signal::text("hi"),
                Signal::EndElement,
            ]
        );
    }

    #[test]
    fn unmatched_end_tag_recovers_by_closing_ancestors() {
        let sigs = parse("<a><b><c>x</a>");
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(Name::unprefixed("a"), vec![]),
                Signal::StartElement(Name::unprefixed("b"), vec![]),
                Signal::StartElement(Name::unprefixed("c"), vec![]),
                Signal::text("x"),
                Signal::EndElement,
                Signal::EndElement,
                Signal::EndElement,
            ]
        );
    }
}
