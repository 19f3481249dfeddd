//! The HTML tokenizer (component E): turns a stream of `(Location, char)`
//! into a stream of internal [`HtmlToken`]s.
//!
//! The full specification tokenizer is a ~70-state machine threaded through
//! the tree constructor one character at a time. This implementation keeps
//! the same externally observable behaviour — data/RCDATA/RAWTEXT/
//! script-data/PLAINTEXT submodes, named and numeric character references,
//! doctype force-quirks, never halting on malformed input — but is
//! structured as a handful of per-construct readers (`read_start_tag`,
//! `read_comment`, ...) in the same style as the XML tokenizer, rather than
//! as literal states.

use std::collections::VecDeque;

use crate::error::{ErrorKind, Result};
use crate::location::Location;
use crate::stream::Stream;

use super::entities;
use super::token::{HtmlAttribute, HtmlToken};

fn is_ws(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\x0C' | '\r' | ' ')
}

/// The tokenizer's text-reading submode, selected by the tree constructor
/// according to the element currently being parsed (`<title>` is RCDATA,
/// `<script>` is script-data, `<plaintext>` is PLAINTEXT, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextMode {
    Data,
    RcData,
    RawText,
    ScriptData,
    Plaintext,
}

pub(crate) struct HtmlTokenizer<'a> {
    chars: Stream<'a, (Location, char)>,
    lookahead: VecDeque<(Location, char)>,
}

impl<'a> HtmlTokenizer<'a> {
    pub fn new(chars: Stream<'a, (Location, char)>) -> Self {
        HtmlTokenizer {
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

    fn requeue(&mut self, items: Vec<(Location, char)>) {
        for item in items.into_iter().rev() {
            self.lookahead.push_front(item);
        }
    }

    /// Attempts to consume `literal`, ASCII-case-insensitively. Restores
    /// everything consumed on a failed match.
    fn consume_literal_ci(&mut self, literal: &str) -> Result<bool> {
        let mut consumed = Vec::new();
        for expected in literal.chars() {
            match self.read()? {
                Some((loc, c)) if c.eq_ignore_ascii_case(&expected) => consumed.push((loc, c)),
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

    /// Reads the next token. `mode` selects how character data is read;
    /// `last_start_tag` is the name of the most recently emitted start tag,
    /// consulted so that an end tag only closes RCDATA/RAWTEXT/script-data
    /// content when its name is the "appropriate" one (matches the spec's
    /// simplified closing-tag detection). `in_foreign` tells the tokenizer
    /// whether `<![CDATA[` should be read as a CDATA section (legal only in
    /// foreign content) rather than a bogus comment.
    pub fn next_token(
        &mut self,
        mode: TextMode,
        last_start_tag: &str,
        in_foreign: bool,
        report: &mut dyn FnMut(Location, ErrorKind),
    ) -> Result<Option<(Location, HtmlToken)>> {
        let (loc, c) = match self.peek()? {
            None => return Ok(None),
            Some(lc) => lc,
        };

        match mode {
            TextMode::Plaintext => return Ok(Some((loc, self.read_plaintext_char()?))),
            TextMode::RcData | TextMode::RawText | TextMode::ScriptData => {
                if c == '<' {
                    if let Some(tok) = self.try_read_appropriate_end_tag(loc, last_start_tag, report)? {
                        return Ok(Some((loc, tok)));
                    }
                }
                let entities_on = matches!(mode, TextMode::RcData);
                return Ok(Some((loc, self.read_non_data_char(entities_on, report)?)));
            }
            TextMode::Data => {}
        }

        if c == '&' {
            self.read()?;
            return Ok(Some((loc, HtmlToken::Character(self.read_char_ref(loc, true, report)))));
        }
        if c != '<' {
            self.read()?;
            return Ok(Some((loc, HtmlToken::Character(c))));
        }

        self.read()?; // consume '<'
        let next = self.peek()?;
        match next {
            Some((_, '/')) => {
                self.read()?;
                Ok(Some((loc, self.read_end_tag(report)?)))
            }
            Some((_, '!')) => {
                self.read()?;
                Ok(Some((loc, self.read_markup_declaration(loc, in_foreign, report)?)))
            }
            Some((_, '?')) => Ok(Some((loc, self.read_bogus_comment(report)?))),
            Some((_, c2)) if c2.is_ascii_alphabetic() => Ok(Some((loc, self.read_start_tag(report)?))),
            _ => {
                report(
                    loc,
                    ErrorKind::BadToken {
                        token: "<".into(),
                        where_: "data".into(),
                        suggestion: "expected a tag name, '/', '!' or '?' after '<'".into(),
                    },
                );
                Ok(Some((loc, HtmlToken::Character('<'))))
            }
        }
    }

    fn read_plaintext_char(&mut self) -> Result<HtmlToken> {
        let (_, c) = self.read()?.expect("peek confirmed a character");
        Ok(HtmlToken::Character(c))
    }

    fn read_non_data_char(&mut self, entities_on: bool, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        let (loc, c) = self.read()?.expect("peek confirmed a character");
        if c == '&' && entities_on {
            return Ok(HtmlToken::Character(self.read_char_ref(loc, true, report)));
        }
        Ok(HtmlToken::Character(c))
    }

    /// In RCDATA/RAWTEXT/script-data: `</name` where `name` case-insensitively
    /// matches `last_start_tag` switches back to an end tag; anything else is
    /// literal text (restored).
    fn try_read_appropriate_end_tag(
        &mut self,
        loc: Location,
        last_start_tag: &str,
        report: &mut dyn FnMut(Location, ErrorKind),
    ) -> Result<Option<HtmlToken>> {
        let mut consumed = vec![self.read()?.unwrap()]; // '<'
        match self.peek()? {
            Some((_, '/')) => consumed.push(self.read()?.unwrap()),
            _ => {
                self.requeue(consumed);
                return Ok(None);
            }
        }
        let mut name = String::new();
        loop {
            match self.peek()? {
                Some((_, c)) if c.is_ascii_alphanumeric() => {
                    let lc = self.read()?.unwrap();
                    name.push(lc.1);
                    consumed.push(lc);
                }
                _ => break,
            }
        }
        let closes = !last_start_tag.is_empty() && name.eq_ignore_ascii_case(last_start_tag);
        let followed_right = match self.peek()? {
            Some((_, c)) => c == '>' || is_ws(c) || c == '/',
            None => true,
        };
        if closes && followed_right {
            self.skip_attrs_and_close(report)?;
            return Ok(Some(HtmlToken::EndTag {
                name: name.to_ascii_lowercase(),
            }));
        }
        self.requeue(consumed);
        Ok(None)
    }

    fn skip_attrs_and_close(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<()> {
        loop {
            match self.read()? {
                None => {
                    report(Location::start(), ErrorKind::UnexpectedEoi { where_: "end-tag".into() });
                    return Ok(());
                }
                Some((_, '>')) => return Ok(()),
                _ => {}
            }
        }
    }

    /// Reads a character reference after `&` (already consumed if
    /// `consumed_amp`); resolves named, decimal and hex forms, recovering
    /// unresolved references as a literal `&`.
    fn read_char_ref(&mut self, amp_loc: Location, _consumed_amp: bool, report: &mut dyn FnMut(Location, ErrorKind)) -> char {
        match self.read_char_ref_inner(amp_loc, report) {
            Ok(c) => c,
            Err(_) => '&',
        }
    }

    fn read_char_ref_inner(&mut self, amp_loc: Location, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<char> {
        if let Some((_, '#')) = self.peek()? {
            self.read()?;
            let hex = matches!(self.peek()?, Some((_, 'x')) | Some((_, 'X')));
            if hex {
                self.read()?;
            }
            let mut digits = String::new();
            loop {
                match self.peek()? {
                    Some((_, c)) if (hex && c.is_ascii_hexdigit()) || (!hex && c.is_ascii_digit()) => {
                        self.read()?;
                        digits.push(c);
                    }
                    _ => break,
                }
            }
            if let Some((_, ';')) = self.peek()? {
                self.read()?;
            } else {
                report(
                    amp_loc,
                    ErrorKind::BadToken {
                        token: format!("&#{}", digits),
                        where_: "character-reference".into(),
                        suggestion: "missing terminating ';'".into(),
                    },
                );
            }
            let scalar = if hex {
                u32::from_str_radix(&digits, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            return Ok(scalar.and_then(char::from_u32).unwrap_or('\u{FFFD}'));
        }

        let mut name = String::new();
        loop {
            match self.peek()? {
                Some((_, c)) if c.is_ascii_alphanumeric() => {
                    self.read()?;
                    name.push(c);
                    if let Some(expansion) = entities::lookup(&name) {
                        if let Some((_, ';')) = self.peek()? {
                            self.read()?;
                            return Ok(expansion.chars().next().unwrap_or('\u{FFFD}'));
                        }
                    }
                    if name.len() > 32 {
                        break;
                    }
                }
                _ => break,
            }
        }
        report(
            amp_loc,
            ErrorKind::BadToken {
                token: "&".into(),
                where_: "character-reference".into(),
                suggestion: "not a known named character reference".into(),
            },
        );
        self.requeue(name.chars().map(|c| (amp_loc, c)).collect());
        Ok('&')
    }

    fn read_name_lower(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some((_, c)) = self.peek()? {
            if is_ws(c) || c == '>' || c == '/' {
                break;
            }
            self.read()?;
            name.push(c.to_ascii_lowercase());
        }
        Ok(name)
    }

    fn skip_ws(&mut self) -> Result<()> {
        while let Some((_, c)) = self.peek()? {
            if is_ws(c) {
                self.read()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn read_end_tag(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        let name = self.read_name_lower()?;
        loop {
            match self.read()? {
                None => {
                    report(Location::start(), ErrorKind::UnexpectedEoi { where_: "end-tag".into() });
                    break;
                }
                Some((_, '>')) => break,
                _ => {}
            }
        }
        Ok(HtmlToken::EndTag { name })
    }

    fn read_start_tag(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        let name = self.read_name_lower()?;
        let mut attrs: Vec<HtmlAttribute> = Vec::new();
        let mut self_closing = false;
        loop {
            self.skip_ws()?;
            match self.peek()? {
                None => {
                    report(Location::start(), ErrorKind::UnexpectedEoi { where_: "start-tag".into() });
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
                Some((loc, c)) if c != '=' => {
                    let attr_name = self.read_attr_name()?;
                    self.skip_ws()?;
                    let value = if matches!(self.peek()?, Some((_, '='))) {
                        self.read()?;
                        self.skip_ws()?;
                        self.read_attr_value(report)?
                    } else {
                        String::new()
                    };
                    if attrs.iter().any(|a| a.name == attr_name) {
                        report(
                            loc,
                            ErrorKind::BadDocument {
                                detail: format!("duplicate attribute '{}'", attr_name),
                            },
                        );
                    } else {
                        attrs.push(HtmlAttribute {
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
        Ok(HtmlToken::StartTag {
            name,
            attrs,
            self_closing,
        })
    }

    fn read_attr_name(&mut self) -> Result<String> {
        let mut name = String::new();
        while let Some((_, c)) = self.peek()? {
            if is_ws(c) || c == '=' || c == '>' || c == '/' {
                break;
            }
            self.read()?;
            name.push(c.to_ascii_lowercase());
        }
        Ok(name)
    }

    fn read_attr_value(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<String> {
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
                        value.push(self.read_char_ref(loc, true, report));
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
                while let Some((_, c)) = self.peek()? {
                    if is_ws(c) || c == '>' {
                        break;
                    }
                    if c == '&' {
                        let (loc, _) = self.read()?.unwrap();
                        value.push(self.read_char_ref(loc, true, report));
                        continue;
                    }
                    self.read()?;
                    value.push(c);
                }
            }
        }
        Ok(value)
    }

    fn read_markup_declaration(
        &mut self,
        loc: Location,
        in_foreign: bool,
        report: &mut dyn FnMut(Location, ErrorKind),
    ) -> Result<HtmlToken> {
        if self.consume_literal_ci("--")? {
            return self.read_comment(report);
        }
        if self.consume_literal_ci("DOCTYPE")? {
            return self.read_doctype(report);
        }
        if self.consume_literal_ci("[CDATA[")? {
            if !in_foreign {
                report(
                    loc,
                    ErrorKind::BadToken {
                        token: "<![CDATA[".into(),
                        where_: "markup-declaration".into(),
                        suggestion: "CDATA sections are only valid in foreign content".into(),
                    },
                );
            }
            let mut body = String::new();
            loop {
                match self.read()? {
                    None => {
                        report(Location::start(), ErrorKind::UnexpectedEoi { where_: "CDATA".into() });
                        break;
                    }
                    Some((_, ']')) => {
                        if self.consume_literal_ci("]>")? {
                            break;
                        }
                        body.push(']');
                    }
                    Some((_, c)) => body.push(c),
                }
            }
            return Ok(HtmlToken::CData(body));
        }
        self.read_bogus_comment(report)
    }

    fn read_bogus_comment(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        let loc = self.peek()?.map(|(l, _)| l).unwrap_or_else(Location::start);
        report(
            loc,
            ErrorKind::BadToken {
                token: "<!".into(),
                where_: "markup-declaration".into(),
                suggestion: "unrecognized markup declaration, treated as a comment".into(),
            },
        );
        let mut body = String::new();
        loop {
            match self.read()? {
                None | Some((_, '>')) => break,
                Some((_, c)) => body.push(c),
            }
        }
        Ok(HtmlToken::Comment(body))
    }

    fn read_comment(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        let mut body = String::new();
        loop {
            match self.read()? {
                None => {
                    report(Location::start(), ErrorKind::UnexpectedEoi { where_: "comment".into() });
                    break;
                }
                Some((loc, '-')) => {
                    if self.consume_literal_ci("->")? {
                        break;
                    }
                    if self.consume_literal_ci("-!>")? {
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
        Ok(HtmlToken::Comment(body))
    }

    fn read_doctype(&mut self, report: &mut dyn FnMut(Location, ErrorKind)) -> Result<HtmlToken> {
        self.skip_ws()?;
        let name = if matches!(self.peek()?, Some((_, c)) if c.is_ascii_alphabetic()) {
            Some(self.read_name_lower()?)
        } else {
            None
        };
        self.skip_ws()?;

        let mut public_id = None;
        let mut system_id = None;
        if self.consume_literal_ci("PUBLIC")? {
            self.skip_ws()?;
            public_id = Some(self.read_quoted(report)?);
            self.skip_ws()?;
            if matches!(self.peek()?, Some((_, '"')) | Some((_, '\''))) {
                system_id = Some(self.read_quoted(report)?);
            }
        } else if self.consume_literal_ci("SYSTEM")? {
            self.skip_ws()?;
            system_id = Some(self.read_quoted(report)?);
        }
        self.skip_ws()?;

        loop {
            match self.read()? {
                None => {
                    report(Location::start(), ErrorKind::UnexpectedEoi { where_: "doctype".into() });
                    break;
                }
                Some((_, '>')) => break,
                _ => {}
            }
        }

        let force_quirks = name.is_none();
        Ok(HtmlToken::Doctype {
            name,
            public_id,
            system_id,
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chars_of(input: &str) -> Stream<'static, (Location, char)> {
        let chars = input.chars().scan(Location::start(), |loc, c| {
            let l = *loc;
            loc.advance(c);
            Some((l, c))
        });
        Stream::of_list(chars.collect::<Vec<_>>())
    }

    fn tokenize(input: &str) -> Vec<HtmlToken> {
        let mut tok = HtmlTokenizer::new(chars_of(input));
        let mut out = Vec::new();
        let mut last_start = String::new();
        while let Some((_, t)) = tok.next_token(TextMode::Data, &last_start, false, &mut |_, _| {}).unwrap() {
            if let HtmlToken::StartTag { name, .. } = &t {
                last_start = name.clone();
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn tokenizes_a_simple_element() {
        let toks = tokenize("<p>hi</p>");
        assert_eq!(
            toks,
            vec![
                HtmlToken::StartTag {
                    name: "p".into(),
                    attrs: vec![],
                    self_closing: false,
                },
                HtmlToken::Character('h'),
                HtmlToken::Character('i'),
                HtmlToken::EndTag { name: "p".into() },
            ]
        );
    }

    #[test]
    fn resolves_named_and_numeric_entities() {
        let mut tok = HtmlTokenizer::new(chars_of("&amp;&#65;&#x42;"));
        let last_start = String::new();
        let mut chars = Vec::new();
        while let Some((_, HtmlToken::Character(c))) = tok.next_token(TextMode::Data, &last_start, false, &mut |_, _| {}).unwrap() {
            chars.push(c);
        }
        assert_eq!(chars, vec!['&', 'A', 'B']);
    }

    #[test]
    fn script_data_does_not_expand_entities_or_close_on_foreign_end_tag() {
        let mut tok = HtmlTokenizer::new(chars_of("a&b</p></script>"));
        let mut out = String::new();
        loop {
            match tok.next_token(TextMode::ScriptData, "script", false, &mut |_, _| {}).unwrap() {
                Some((_, HtmlToken::Character(c))) => out.push(c),
                Some((_, HtmlToken::EndTag { name })) => {
                    assert_eq!(name, "script");
                    break;
                }
                _ => break,
            }
        }
        assert_eq!(out, "a&b</p>");
    }

    #[test]
    fn doctype_without_name_forces_quirks() {
        let toks = tokenize("<!DOCTYPE>");
        assert_eq!(
            toks,
            vec![HtmlToken::Doctype {
                name: None,
                public_id: None,
                system_id: None,
                force_quirks: true,
            }]
        );
    }

    #[test]
    fn cdata_section_is_read_verbatim_in_foreign_content() {
        let mut tok = HtmlTokenizer::new(chars_of("<![CDATA[<not a tag>]]>"));
        let mut errors = 0;
        let (_, t) = tok
            .next_token(TextMode::Data, "", true, &mut |_, _| errors += 1)
            .unwrap()
            .unwrap();
        assert_eq!(t, HtmlToken::CData("<not a tag>".into()));
        assert_eq!(errors, 0);
    }
}
