//! The XML tokenizer (component C): turns a stream of `(Location, char)`
//! into a stream of internal [`Token`]s, resolving entity references along
//! the way.

use std::collections::VecDeque;

use crate::error::{ErrorKind, Result};
use crate::location::Location;
use crate::stream::Stream;

use super::token::{RawAttribute, Token};

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

pub(crate) struct XmlTokenizer<'a> {
    chars: Stream<'a, (Location, char)>,
    /// Lookahead buffer for literal matching (`consume_literal`): the
    /// stream primitive only supports a single push-back slot, which isn't
    /// enough to restore several characters after a failed multi-character
    /// match, so the tokenizer keeps its own small requeue in front of it.
    lookahead: VecDeque<(Location, char)>,
}

impl<'a> XmlTokenizer<'a> {
    pub fn new(chars: Stream<'a, (Location, char)>) -> Self {
        XmlTokenizer {
            chars,
            lookahead: VecDeque::new(),
        }
    }

    fn read(&mut self) -> Result<Option<(Location, char)>> {
        if let Some(item) = self.lookahead.pop_front() {
            return Ok(Some(item));
        }
        Ok(self.chars.next()?.into_option())
    }

    fn peek(&mut self) -> Result<Option<(Location, char)>> {
        if let Some(item) = self.lookahead.front() {
            return Ok(Some(*item));
        }
        Ok(self.chars.peek()?.clone().into_option())
    }

    /// Restores any number of previously-read items, in the order they were
    /// originally read (the first element of `items` is the next one
    /// `read`/`peek` will see).
    fn requeue(&mut self, items: Vec<(Location, char)>) {
        for item in items.into_iter().rev() {
            self.lookahead.push_front(item);
        }
    }

    /// Reads the next token, or `None` at end of input.
    pub fn next_token(
        &mut self,
        report: &mut dyn FnMut(Location, ErrorKind),
        entity: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Option<(Location, Token)>> {
        let (loc, c) = match self.peek()? {
            None => return Ok(None),
            Some(lc) => lc,
        };

        if c != '<' {
            return Ok(Some((loc, self.read_text(report, entity)?)));
        }

        self.read()?; // consume '<'
        let next = self.peek()?;
        match next {
            Some((_, '/')) => {
                self.read()?;
                Ok(Some((loc, self.read_end_tag(report)?)))
            }
            Some((_, '?')) => {
                self.read()?;
                Ok(Some((loc, self.read_pi_or_decl(report)?)))
            }
            Some((_, '!')) => {
                self.read()?;
                Ok(Some((loc, self.read_bang(loc, report)?)))
            }
            Some((_, c2)) if is_name_start(c2) => {
                Ok(Some((loc, self.read_start_tag(report, entity)?)))
            }
            _ => {
                report(
                    loc,
                    ErrorKind::BadToken {
                        token: "<".into(),
                        where_: "tag-open".into(),
                        suggestion: "expected a name, '/', '?' or '!' after '<'".into(),
                    },
                );
                Ok(Some((loc, Token::Text("<".into()))))
            }
        }
    }

    fn read_text(
        &mut self,
        report: &mut dyn FnMut(Location, ErrorKind),
        entity: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Token> {
        let mut text = String::new();
        loop {
            match self.peek()? {
                None => break,
                Some((_, '<')) => break,
                Some((loc, '&')) => {
                    self.read()?;
                    text.push_str(&self.read_entity(loc, report, entity)?);
                }
                Some((_, c)) => {
                    self.read()?;
                    text.push(c);
                }
            }
        }
        Ok(Token::Text(text))
    }

    /// Reads an entity reference body after the leading `&` has been
    /// consumed, resolving built-ins, numeric references, and the
    /// user-supplied table; recovers unresolved references as literal text.
    fn read_entity(
        &mut self,
        amp_loc: Location,
        report: &mut dyn FnMut(Location, ErrorKind),
        entity: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<String> {
        let mut name = String::new();
        let mut terminated = false;
        loop {
            match self.peek()? {
                Some((_, ';')) => {
                    self.read()?;
                    terminated = true;
                    break;
                }
                Some((_, c)) if is_name_char(c) || c == '#' => {
                    self.read()?;
                    name.push(c);
                    if name.len() > 64 {
                        break;
                    }
                }
                _ => break, // unterminated reference
            }
        }

        if !terminated {
            report(
                amp_loc,
                ErrorKind::BadToken {
                    token: "&".into(),
                    where_: "text".into(),
                    suggestion: "should be replaced with '&amp;'".into(),
                },
            );
            return Ok(format!("&{}", name));
        }

        if let Some(rest) = name.strip_prefix('#') {
            let scalar = if let Some(hex) = rest.strip_prefix('x').or_else(|| rest.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                rest.parse::<u32>().ok()
            };
            if let Some(c) = scalar.and_then(char::from_u32) {
                return Ok(c.to_string());
            }
            report(
                amp_loc,
                ErrorKind::BadToken {
                    token: format!("&#{}", rest),
                    where_: "text".into(),
                    suggestion: "is not a valid numeric character reference".into(),
                },
            );
            return Ok(format!("&#{};", rest));
        }

        let builtin = match name.as_str() {
            "lt" => Some("<"),
            "gt" => Some(">"),
            "amp" => Some("&"),
            "apos" => Some("'"),
            "quot" => Some("\""),
            _ => None,
        };
        if let Some(s) = builtin {
            return Ok(s.to_string());
        }
        if let Some(s) = entity(&name) {
            return Ok(s);
        }

        report(
            amp_loc,
            ErrorKind::BadToken {
                token: "&".into(),
                where_: "text".into(),
                suggestion: "should be replaced with '&amp;'".into(),
            },
        );
        Ok(format!("&{};", name))
    }

    fn read_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some((_, c)) = self.peek()? {
            if is_name_char(c) {
                self.read()?;
                name.push(c);
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some((_, c)) = self.peek()? {
            if c.is_whitespace() {
                self.read()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn expect_char(
        &mut self,
        expected: char,
        where_: &str,
        report: &mut dyn FnMut(Location, ErrorKind),
    ) -> Result<()> {
        match self.peek()? {
            Some((_, c)) if c == expected => {
                self.read()?;
                Ok(())
            }
            Some((loc, c)) => {
                report(
                    loc,
                    ErrorKind::BadToken {
                        token: c.to_string(),
                        where_: where_.into(),
                        suggestion: format!("expected '{}'", expected),
                    },
                );
                Ok(())
            }
            None => {
                report(Location::start(), ErrorKind::UnexpectedEoi { where_: where_.into() });
                Ok(())
            }
        }
    }

    fn read_end_tag(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        let name = self.read_name()?;
        self.skip_ws()?;
        self.expect_char('>', "end-tag", report)?;
        Ok(Token::EndTag { name })
    }

    fn read_start_tag(
        &mut self,
        report: &mut dyn FnMut(Location, ErrorKind),
        entity: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Token> {
        let name = self.read_name()?;
        let mut attrs: Vec<RawAttribute> = Vec::new();
        let mut self_closing = false;
        loop {
            self.skip_ws()?;
            match self.peek()? {
                None => {
                    report(
                        Location::start(),
                        ErrorKind::UnexpectedEoi { where_: "start-tag".into() },
                    );
                    break;
                }
                Some((_, '/')) => {
                    self.read()?;
                    self_closing = true;
                }
                Some((_, '>')) => {
                    self.read()?;
                    break;
                }
                Some((loc, c)) if is_name_start(c) => {
                    let attr_name = self.read_name()?;
                    self.skip_ws()?;
                    self.expect_char('=', "attribute-value", report)?;
                    self.skip_ws()?;
                    let value = self.read_attr_value(report, entity)?;
                    if attrs.iter().any(|a| a.name == attr_name) {
                        report(
                            loc,
                            ErrorKind::BadDocument {
                                detail: format!("duplicate attribute '{}'", attr_name),
                            },
                        );
                    } else {
                        attrs.push(RawAttribute {
                            name: attr_name,
                            value,
                        });
                    }
                }
                Some((loc, c)) => {
                    report(
                        loc,
                        ErrorKind::BadToken {
                            token: c.to_string(),
                            where_: "start-tag".into(),
                            suggestion: "unexpected character in start tag".into(),
                        },
                    );
                    self.read()?;
                }
            }
        }
        Ok(Token::StartTag {
            name,
            attrs,
            self_closing,
        })
    }

    fn read_attr_value(
        &mut self,
        report: &mut dyn FnMut(Location, ErrorKind),
        entity: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<String> {
        let quote = match self.peek()? {
            Some((_, c)) if c == '"' || c == '\'' => {
                self.read()?;
                Some(c)
            }
            _ => None,
        };
        let mut value = String::new();
        match quote {
            Some(q) => loop {
                match self.peek()? {
                    Some((_, c)) if c == q => {
                        self.read()?;
                        break;
                    }
                    Some((loc, '&')) => {
                        self.read()?;
                        value.push_str(&self.read_entity(loc, report, entity)?);
                    }
                    Some((_, c)) => {
                        self.read()?;
                        value.push(c);
                    }
                    None => {
                        report(
                            Location::start(),
                            ErrorKind::UnexpectedEoi {
                                where_: "attribute-value".into(),
                            },
                        );
                        break;
                    }
                }
            },
            None => {
                // Unquoted: recoverable, XML requires quotes.
                while let Some((_, c)) = self.peek()? {
                    if c.is_whitespace() || c == '>' || c == '/' {
                        break;
                    }
                    self.read()?;
                    value.push(c);
                }
            }
        }
        Ok(value)
    }

    fn read_pi_or_decl(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        let target = self.read_name()?;
        self.skip_ws()?;
        let mut body = String::new();
        loop {
            match self.read()? {
                None => {
                    report(
                        Location::start(),
                        ErrorKind::UnexpectedEoi {
                            where_: "processing-instruction".into(),
                        },
                    );
                    break;
                }
                Some((_, '?')) => {
                    if let Some((_, '>')) = self.peek()? {
                        self.read()?;
                        break;
                    }
                    body.push('?');
                }
                Some((_, c)) => body.push(c),
            }
        }

        if target.eq_ignore_ascii_case("xml") {
            return Ok(parse_xml_decl(&body));
        }
        Ok(Token::ProcessingInstruction { target, body })
    }

    fn read_bang(&mut self, loc: Location, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        if self.consume_literal("--")? {
            return self.read_comment(report);
        }
        if self.consume_literal("[CDATA[")? {
            return self.read_cdata(report);
        }
        if self.consume_literal("DOCTYPE")? {
            return self.read_doctype(report);
        }
        // Unknown declaration subset: read a balanced `<! ... >` and drop it.
        report(
            loc,
            ErrorKind::BadToken {
                token: "<!".into(),
                where_: "declaration-subset".into(),
                suggestion: "unrecognized markup declaration".into(),
            },
        );
        let mut depth = 1;
        loop {
            match self.read()? {
                None => break,
                Some((_, '<')) => depth += 1,
                Some((_, '>')) => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        Ok(Token::Comment(String::new()))
    }

    fn consume_literal(&mut self, literal: &str) -> Result<bool> {
        let mut consumed = Vec::new();
        for expected in literal.chars() {
            match self.read()? {
                Some((loc, c)) if c == expected => consumed.push((loc, c)),
                Some(lc) => {
                    consumed.push(lc);
                    self.requeue(consumed);
                    return Ok(false);
                }
                None => {
                    self.requeue(consumed);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn read_comment(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        let mut body = String::new();
        loop {
            match self.read()? {
                None => {
                    report(
                        Location::start(),
                        ErrorKind::UnexpectedEoi { where_: "comment".into() },
                    );
                    break;
                }
                Some((loc, '-')) => {
                    if self.consume_literal("->")? {
                        break;
                    }
                    if let Some((_, '-')) = self.peek()? {
                        report(
                            loc,
                            ErrorKind::BadToken {
                                token: "--".into(),
                                where_: "comment".into(),
                                suggestion: "'--' is not allowed inside a comment".into(),
                            },
                        );
                    }
                    body.push('-');
                }
                Some((_, c)) => body.push(c),
            }
        }
        Ok(Token::Comment(body))
    }

    fn read_cdata(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        let mut body = String::new();
        loop {
            match self.read()? {
                None => {
                    report(
                        Location::start(),
                        ErrorKind::UnexpectedEoi { where_: "CDATA".into() },
                    );
                    break;
                }
                Some((_, ']')) => {
                    if self.consume_literal("]>")? {
                        break;
                    }
                    body.push(']');
                }
                Some((_, c)) => body.push(c),
            }
        }
        Ok(Token::CData(body))
    }

    fn read_doctype(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<Token> {
        self.skip_ws()?;
        let name = if matches!(self.peek()?, Some((_, c)) if is_name_start(c)) {
            Some(self.read_name()?)
        } else {
            None
        };
        self.skip_ws()?;

        let mut public_id = None;
        let mut system_id = None;
        if self.consume_literal("PUBLIC")? {
            self.skip_ws()?;
            public_id = Some(self.read_quoted(report)?);
            self.skip_ws()?;
            system_id = Some(self.read_quoted(report)?);
        } else if self.consume_literal("SYSTEM")? {
            self.skip_ws()?;
            system_id = Some(self.read_quoted(report)?);
        }
        self.skip_ws()?;

        let mut raw_text = None;
        let mut depth_brackets = 0;
        loop {
            match self.read()? {
                None => {
                    report(
                        Location::start(),
                        ErrorKind::UnexpectedEoi { where_: "doctype".into() },
                    );
                    break;
                }
                Some((_, '[')) => {
                    depth_brackets += 1;
                    raw_text.get_or_insert_with(String::new).push('[');
                }
                Some((_, ']')) => {
                    depth_brackets -= 1;
                    raw_text.get_or_insert_with(String::new).push(']');
                }
                Some((_, '>')) if depth_brackets <= 0 => break,
                Some((_, c)) => {
                    if depth_brackets > 0 {
                        raw_text.get_or_insert_with(String::new).push(c);
                    }
                }
            }
        }

        let force_quirks = name.is_none();
        Ok(Token::Doctype {
            name,
            public_id,
            system_id,
            raw_text,
            force_quirks,
        })
    }

    fn read_quoted(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<String> {
        let quote = match self.peek()? {
            Some((_, c)) if c == '"' || c == '\'' => {
                self.read()?;
                c
            }
            _ => {
                report(
                    Location::start(),
                    ErrorKind::BadToken {
                        token: "doctype".into(),
                        where_: "doctype".into(),
                        suggestion: "expected a quoted identifier".into(),
                    },
                );
                return Ok(String::new());
            }
        };
        let mut value = String::new();
        loop {
            match self.read()? {
                None => break,
                Some((_, c)) if c == quote => break,
                Some((_, c)) => value.push(c),
            }
        }
        Ok(value)
    }
}

fn parse_xml_decl(body: &str) -> Token {
    let version = extract_pseudo_attr(body, "version").unwrap_or_else(|| "1.0".to_string());
    let encoding = extract_pseudo_attr(body, "encoding");
    let standalone = extract_pseudo_attr(body, "standalone").map(|s| s == "yes");
    Token::XmlDecl {
        version,
        encoding,
        standalone,
    }
}

fn extract_pseudo_attr(body: &str, key: &str) -> Option<String> {
    let idx = body.find(key)?;
    let rest = body[idx + key.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let body = &rest[1..];
    let end = body.find(quote)?;
    Some(body[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokenize(input: &str) -> Vec<Token> {
        let chars = input.chars().scan(Location::start(), |loc, c| {
            let l = *loc;
            loc.advance(c);
            Some((l, c))
        });
        let mut tok = XmlTokenizer::new(Stream::of_list(chars.collect::<Vec<_>>()));
        let mut out = Vec::new();
        let mut noop_entity = |_: &str| None;
        while let Some((_, t)) = tok.next_token(&mut |_, _| {}, &mut noop_entity).unwrap() {
            out.push(t);
        }
        out
    }

    #[test]
    fn tokenizes_minimal_document() {
        let toks = tokenize(r#"<?xml version="1.0"?><r>hi</r>"#);
        assert_eq!(
            toks,
            vec![
                Token::XmlDecl {
                    version: "1.0".into(),
                    encoding: None,
                    standalone: None,
                },
                Token::StartTag {
                    name: "r".into(),
                    attrs: vec![],
                    self_closing: false,
                },
                Token::Text("hi".into()),
                Token::EndTag { name: "r".into() },
            ]
        );
    }

    #[test]
    fn recovers_bare_ampersand_in_text() {
        let mut errors = 0;
        let chars = "a & b".chars().scan(Location::start(), |loc, c| {
            let l = *loc;
            loc.advance(c);
            Some((l, c))
        });
        let mut tok = XmlTokenizer::new(Stream::of_list(chars.collect::<Vec<_>>()));
        let mut noop_entity = |_: &str| None;
        let (_, t) = tok
            .next_token(&mut |_, _| errors += 1, &mut noop_entity)
            .unwrap()
            .unwrap();
        assert_eq!(t, Token::Text("a & b".into()));
        assert_eq!(errors, 1);
    }
}
