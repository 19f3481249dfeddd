//! The HTML tree constructor (component F): the insertion-mode state
//! machine that turns [`HtmlToken`]s into located [`Signal`]s.
//!
//! Implements the full 23-mode insertion-mode machine (the `in table text`
//! mode is folded directly into `in table`'s own character handling rather
//! than kept as a literal separate state; see DESIGN.md), the open-element
//! stack, the active formatting list with Noah's-Ark and the full adoption
//! agency algorithm (furthest-block search, bookmark, node cloning), foster
//! parenting of table-misplaced content, foreign-content tracking with SVG
//! tag/attribute case adjustment and HTML breakout, fragment parsing
//! (synthetic context elements that never reach the signal stream) and
//! context auto-detection.
//!
//! Foster parenting and the full adoption agency both need to relocate or
//! retroactively restructure content that, in an eagerly-draining stream,
//! might already have left the building. `pending` entries therefore carry
//! an optional open-element id tag, and draining to the external caller is
//! held back (more tokens are read and queued instead) for as long as any
//! active formatting element exists — exactly the span during which the
//! adoption agency might need to reach back and re-parent it. See
//! DESIGN.md for the full trade-off writeup.

use std::collections::VecDeque;

use crate::error::{ErrorKind, Result};
use crate::location::Location;
use crate::options::{Context, ParserOptions};
use crate::signal::{Attribute, Doctype, Name, Signal};
use crate::stream::{Item, Stream};

use super::token::HtmlToken;
use super::tokenizer::{HtmlTokenizer, TextMode};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";
const SVG_NS: &str = "http://www.w3.org/2000/svg";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";

const FORMATTING_TAGS: &[&str] = &[
    "a", "b", "big", "code", "em", "font", "i", "nobr", "s", "small", "strike", "strong", "tt", "u",
];

pub(crate) const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr",
];

/// HTML start tags that break out of SVG/MathML foreign content back to the
/// enclosing HTML tree (a representative subset of the specification's
/// table).
const FOREIGN_BREAKOUT_TAGS: &[&str] = &[
    "b", "big", "blockquote", "body", "br", "center", "code", "dd", "div", "dl", "dt", "em", "embed", "h1", "h2",
    "h3", "h4", "h5", "h6", "head", "hr", "i", "img", "li", "listing", "menu", "meta", "nobr", "ol", "p", "pre",
    "ruby", "s", "small", "span", "strong", "strike", "sub", "sup", "table", "tt", "u", "ul", "var",
];

fn svg_adjust_tag(name: &str) -> String {
    let adjusted = match name {
        "altglyph" => "altGlyph",
        "altglyphdef" => "altGlyphDef",
        "altglyphitem" => "altGlyphItem",
        "animatecolor" => "animateColor",
        "animatemotion" => "animateMotion",
        "animatetransform" => "animateTransform",
        "clippath" => "clipPath",
        "feblend" => "feBlend",
        "femerge" => "feMerge",
        "femergenode" => "feMergeNode",
        "foreignobject" => "foreignObject",
        "glyphref" => "glyphRef",
        "lineargradient" => "linearGradient",
        "radialgradient" => "radialGradient",
        "textpath" => "textPath",
        other => other,
    };
    adjusted.to_string()
}

fn text_mode_for(name: &str, ns: &'static str) -> TextMode {
    if ns != HTML_NS {
        return TextMode::Data;
    }
    match name {
        "title" | "textarea" => TextMode::RcData,
        "style" | "xmp" | "iframe" | "noembed" | "noframes" => TextMode::RawText,
        "script" => TextMode::ScriptData,
        "plaintext" => TextMode::Plaintext,
        _ => TextMode::Data,
    }
}

/// Maps a fragment context tag to its namespace and initial text mode.
fn fragment_context_info(context: &str) -> (&'static str, TextMode) {
    match context {
        "title" | "textarea" => (HTML_NS, TextMode::RcData),
        "style" | "xmp" | "iframe" | "noembed" | "noframes" => (HTML_NS, TextMode::RawText),
        "script" => (HTML_NS, TextMode::ScriptData),
        "plaintext" => (HTML_NS, TextMode::Plaintext),
        "svg" => (SVG_NS, TextMode::Data),
        "math" | "mathml" => (MATHML_NS, TextMode::Data),
        _ => (HTML_NS, TextMode::Data),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertionMode {
    Initial,
    BeforeHtml,
    BeforeHead,
    InHead,
    InHeadNoscript,
    AfterHead,
    Body,
    Text,
    InTable,
    InCaption,
    InColumnGroup,
    InTableBody,
    InRow,
    InCell,
    InSelect,
    InSelectInTable,
    InTemplate,
    AfterBody,
    InFrameset,
    AfterFrameset,
    AfterAfterBody,
    AfterAfterFrameset,
}

struct OpenElement {
    id: u64,
    local: String,
    namespace: &'static str,
    /// Bookkeeping element synthesized for fragment parsing (the implied
    /// `html` root and, for a foreign fragment context, the context
    /// element itself); never reaches the signal stream.
    synthetic: bool,
    /// Set for a `table` element whose `StartElement` signal has not been
    /// pushed to `pending` yet, so that foster-parented content can be
    /// queued ahead of it. Cleared by `flush_deferred_tables`.
    pending_emit: bool,
    deferred_attrs: Option<(Location, Vec<Attribute>)>,
}

impl OpenElement {
    fn new(id: u64, local: String, namespace: &'static str, synthetic: bool) -> Self {
        OpenElement {
            id,
            local,
            namespace,
            synthetic,
            pending_emit: false,
            deferred_attrs: None,
        }
    }
}

#[derive(Clone)]
enum FormattingEntry {
    Marker,
    Element { id: u64, local: String, attrs: Vec<Attribute> },
}

pub(crate) struct HtmlTreeConstructor<'a> {
    tokenizer: HtmlTokenizer<'a>,
    options: ParserOptions<'a>,
    mode: InsertionMode,
    mode_stack: Vec<InsertionMode>,
    stack: Vec<OpenElement>,
    formatting: Vec<FormattingEntry>,
    pending: VecDeque<(Location, Signal, Option<u64>)>,
    text_buf: Option<(Location, String)>,
    next_id: u64,
    last_start_tag: String,
    text_mode: TextMode,
    seen_doctype: bool,
    done: bool,
    context_resolved: bool,
    /// Tokens read ahead (during context auto-detection, or requeued for
    /// reprocessing in a different insertion mode) and replayed before the
    /// tokenizer is pulled again.
    token_lookahead: VecDeque<(Location, HtmlToken)>,
}

impl<'a> HtmlTreeConstructor<'a> {
    pub fn new(tokenizer: HtmlTokenizer<'a>, options: ParserOptions<'a>) -> Self {
        HtmlTreeConstructor {
            tokenizer,
            options,
            mode: InsertionMode::Initial,
            mode_stack: Vec::new(),
            stack: Vec::new(),
            formatting: Vec::new(),
            pending: VecDeque::new(),
            text_buf: None,
            next_id: 0,
            last_start_tag: String::new(),
            text_mode: TextMode::Data,
            seen_doctype: false,
            done: false,
            context_resolved: false,
            token_lookahead: VecDeque::new(),
        }
    }

    fn report(&mut self, loc: Location, kind: ErrorKind) {
        self.options.report_error(loc, kind);
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn enter_mode(&mut self, new_mode: InsertionMode) {
        self.mode_stack.push(self.mode);
        self.mode = new_mode;
    }

    fn leave_mode(&mut self) {
        self.mode = self.mode_stack.pop().unwrap_or(InsertionMode::Body);
    }

    fn flush_text(&mut self) {
        if let Some((loc, text)) = self.text_buf.take() {
            if !text.is_empty() {
                self.pending.push_back((loc, Signal::text(text), None));
            }
        }
    }

    fn push_text(&mut self, loc: Location, text: String) {
        match &mut self.text_buf {
            Some((_, buf)) => buf.push_str(&text),
            None => self.text_buf = Some((loc, text)),
        }
    }

    fn in_foreign(&self) -> bool {
        self.stack.last().map(|e| e.namespace != HTML_NS).unwrap_or(false)
    }

    /// Pushes the `StartElement` signal for every table still waiting on
    /// one (in stack order), so that any foster-parented content already
    /// queued in `pending` ends up before them.
    fn flush_deferred_tables(&mut self) {
        let mut to_flush = Vec::new();
        for el in self.stack.iter_mut() {
            if el.pending_emit {
                el.pending_emit = false;
                let (loc, attrs) = el.deferred_attrs.take().unwrap_or((Location::start(), Vec::new()));
                to_flush.push((loc, el.id, el.local.clone(), el.namespace, attrs));
            }
        }
        for (loc, id, local, ns, attrs) in to_flush {
            self.pending
                .push_back((loc, Signal::StartElement(Name::new(ns, local), attrs), Some(id)));
        }
    }

    // -- driving loop --------------------------------------------------

    pub fn next_signal(&mut self) -> Result<Option<(Location, Signal)>> {
        self.ensure_started()?;
        loop {
            if self.formatting.is_empty() || self.done {
                if let Some((loc, sig, _)) = self.pending.pop_front() {
                    return Ok(Some((loc, sig)));
                }
            }
            if self.done {
                return Ok(None);
            }
            match self.next_token()? {
                None => {
                    self.at_eof();
                    self.done = true;
                    if let Some((loc, sig, _)) = self.pending.pop_front() {
                        return Ok(Some((loc, sig)));
                    }
                    return Ok(None);
                }
                Some((loc, tok)) => self.handle_token(loc, tok)?,
            }
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.context_resolved {
            return Ok(());
        }
        self.context_resolved = true;
        let context = match self.options.context.clone() {
            Some(c) => c,
            None => self.detect_context()?,
        };
        match context {
            Context::Document => self.mode = InsertionMode::Initial,
            Context::Fragment(tag) => self.init_fragment(&tag),
        }
        Ok(())
    }

    fn detect_context(&mut self) -> Result<Context> {
        loop {
            let (loc, tok) = match self.read_raw_token()? {
                Some(lt) => lt,
                None => return Ok(Context::Document),
            };
            match &tok {
                HtmlToken::Comment(_) => {
                    self.token_lookahead.push_back((loc, tok));
                }
                HtmlToken::Character(c) if c.is_whitespace() => {
                    self.token_lookahead.push_back((loc, tok));
                }
                HtmlToken::Doctype { .. } => {
                    self.token_lookahead.push_back((loc, tok));
                    return Ok(Context::Document);
                }
                HtmlToken::StartTag { name, .. } => {
                    let inferred = match name.as_str() {
                        "td" | "th" => Some("tr"),
                        "tr" => Some("tbody"),
                        "thead" | "tbody" | "tfoot" => Some("table"),
                        "col" => Some("colgroup"),
                        "option" | "optgroup" => Some("select"),
                        "caption" => Some("table"),
                        "svg" => Some("svg"),
                        "math" => Some("math"),
                        _ => None,
                    };
                    self.token_lookahead.push_back((loc, tok));
                    return Ok(match inferred {
                        Some(c) => Context::Fragment(c.to_string()),
                        None => Context::Document,
                    });
                }
                _ => {
                    self.token_lookahead.push_back((loc, tok));
                    return Ok(Context::Document);
                }
            }
        }
    }

    fn init_fragment(&mut self, context: &str) {
        let html_id = self.alloc_id();
        self.stack.push(OpenElement::new(html_id, "html".into(), HTML_NS, true));
        let (ns, text_mode) = fragment_context_info(context);
        if context != "html" {
            let ctx_id = self.alloc_id();
            self.stack.push(OpenElement::new(ctx_id, context.to_string(), ns, true));
        }
        self.mode = InsertionMode::Body;
        self.text_mode = text_mode;
        self.last_start_tag = context.to_string();
    }

    fn reprocess(&mut self, loc: Location, token: HtmlToken) {
        self.token_lookahead.push_front((loc, token));
    }

    fn next_token(&mut self) -> Result<Option<(Location, HtmlToken)>> {
        if let Some(t) = self.token_lookahead.pop_front() {
            return Ok(Some(t));
        }
        self.read_raw_token()
    }

    fn read_raw_token(&mut self) -> Result<Option<(Location, HtmlToken)>> {
        let mode = self.text_mode;
        let last_start = self.last_start_tag.clone();
        let foreign = self.in_foreign();
        let mut reports: Vec<(Location, ErrorKind)> = Vec::new();
        let result = {
            let mut report_into = |loc: Location, kind: ErrorKind| reports.push((loc, kind));
            self.tokenizer.next_token(mode, &last_start, foreign, &mut report_into)?
        };
        for (loc, kind) in reports {
            self.report(loc, kind);
        }
        Ok(result)
    }

    fn at_eof(&mut self) {
        self.flush_text();
        if self.stack.iter().any(|e| !e.synthetic) {
            let name = self
                .stack
                .iter()
                .rev()
                .find(|e| !e.synthetic)
                .map(|e| e.local.clone())
                .unwrap_or_default();
            self.report(Location::start(), ErrorKind::UnmatchedStartTag { name });
        }
        while let Some(el) = self.stack.pop() {
            if !el.synthetic && !el.pending_emit {
                self.pending.push_back((Location::start(), Signal::EndElement, Some(el.id)));
            }
        }
    }

    // -- token dispatch --------------------------------------------------

    fn handle_token(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match self.mode {
            InsertionMode::Initial => self.handle_initial(loc, token),
            InsertionMode::BeforeHtml => self.handle_before_html(loc, token),
            InsertionMode::BeforeHead => self.handle_before_head(loc, token),
            InsertionMode::InHead => self.handle_in_head(loc, token),
            InsertionMode::InHeadNoscript => self.handle_in_head_noscript(loc, token),
            InsertionMode::AfterHead => self.handle_after_head(loc, token),
            InsertionMode::Body => self.handle_body(loc, token),
            InsertionMode::Text => self.handle_text(loc, token),
            InsertionMode::InTable => self.handle_in_table(loc, token),
            InsertionMode::InCaption => self.handle_in_caption(loc, token),
            InsertionMode::InColumnGroup => self.handle_in_column_group(loc, token),
            InsertionMode::InTableBody => self.handle_in_table_body(loc, token),
            InsertionMode::InRow => self.handle_in_row(loc, token),
            InsertionMode::InCell => self.handle_in_cell(loc, token),
            InsertionMode::InSelect => self.handle_in_select(loc, token),
            InsertionMode::InSelectInTable => self.handle_in_select_in_table(loc, token),
            InsertionMode::InTemplate => self.handle_in_template(loc, token),
            InsertionMode::AfterBody => self.handle_after_body(loc, token),
            InsertionMode::InFrameset => self.handle_in_frameset(loc, token),
            InsertionMode::AfterFrameset => self.handle_after_frameset(loc, token),
            InsertionMode::AfterAfterBody => self.handle_after_after_body(loc, token),
            InsertionMode::AfterAfterFrameset => self.handle_after_after_frameset(loc, token),
        }
    }

    fn handle_initial(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::Doctype {
                name,
                public_id,
                system_id,
                force_quirks,
            } => {
                self.seen_doctype = true;
                self.pending.push_back((
                    loc,
                    Signal::Doctype(Doctype {
                        name,
                        public_id,
                        system_id,
                        raw_text: None,
                        force_quirks,
                    }),
                    None,
                ));
                self.mode = InsertionMode::BeforeHtml;
                Ok(())
            }
            other => {
                self.mode = InsertionMode::BeforeHtml;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_before_html(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "html" => {
                self.push_element(loc, "html", attrs, HTML_NS);
                self.mode = InsertionMode::BeforeHead;
                Ok(())
            }
            other => {
                self.push_element(loc, "html", Vec::new(), HTML_NS);
                self.mode = InsertionMode::BeforeHead;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_before_head(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "head" => {
                self.push_element(loc, "head", attrs, HTML_NS);
                self.mode = InsertionMode::InHead;
                Ok(())
            }
            other => {
                self.push_element(loc, "head", Vec::new(), HTML_NS);
                self.mode = InsertionMode::InHead;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_in_head(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if matches!(name.as_str(), "meta" | "link" | "base") => {
                self.push_element(loc, &name, attrs, HTML_NS);
                self.pop_current(loc);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "noscript" => {
                self.push_element(loc, "noscript", attrs, HTML_NS);
                self.enter_mode(InsertionMode::InHeadNoscript);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if matches!(name.as_str(), "title" | "style" | "script") => {
                self.push_element(loc, &name, attrs, HTML_NS);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "head" => {
                self.pop_current(loc);
                self.mode = InsertionMode::AfterHead;
                Ok(())
            }
            other => {
                self.pop_current(loc);
                self.mode = InsertionMode::AfterHead;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_in_head_noscript(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::StartTag { name, attrs, self_closing }
                if matches!(name.as_str(), "basefont" | "bgsound" | "link" | "meta" | "noframes" | "style") =>
            {
                self.open_start_tag(loc, name, attrs, self_closing);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "noscript" => {
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            other => {
                self.report(loc, ErrorKind::BadContent { where_: "head".into() });
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_after_head(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "body" => {
                self.push_element(loc, "body", attrs, HTML_NS);
                self.mode = InsertionMode::Body;
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "frameset" => {
                self.push_element(loc, "frameset", attrs, HTML_NS);
                self.mode = InsertionMode::InFrameset;
                Ok(())
            }
            other => {
                self.push_element(loc, "body", Vec::new(), HTML_NS);
                self.mode = InsertionMode::Body;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_body(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) => {
                self.reconstruct_formatting(loc);
                self.push_text(loc, c.to_string());
                Ok(())
            }
            HtmlToken::Comment(body) => {
                self.flush_text();
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::Doctype { .. } => {
                self.flush_text();
                self.report(
                    loc,
                    ErrorKind::BadDocument {
                        detail: "a doctype may not appear inside the body".into(),
                    },
                );
                Ok(())
            }
            HtmlToken::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                self.flush_text();
                self.open_start_tag(loc, name, attrs, self_closing);
                Ok(())
            }
            HtmlToken::EndTag { name } => {
                self.flush_text();
                self.close_end_tag(loc, name);
                Ok(())
            }
            HtmlToken::CData(text) => {
                self.push_text(loc, text);
                Ok(())
            }
            HtmlToken::Eof => Ok(()),
        }
    }

    fn handle_text(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) => {
                self.push_text(loc, c.to_string());
                Ok(())
            }
            HtmlToken::EndTag { .. } => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_after_body(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "html" => {
                self.mode = InsertionMode::AfterAfterBody;
                Ok(())
            }
            other => {
                self.report(
                    loc,
                    ErrorKind::BadDocument {
                        detail: "content after </body>".into(),
                    },
                );
                self.mode = InsertionMode::Body;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_after_after_body(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            other => {
                self.report(
                    loc,
                    ErrorKind::BadDocument {
                        detail: "content after the closing html element".into(),
                    },
                );
                self.mode = InsertionMode::Body;
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_in_frameset(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "frameset" => {
                self.push_element(loc, &name, attrs, HTML_NS);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, .. } if name == "frame" => {
                self.push_element(loc, &name, attrs, HTML_NS);
                self.pop_current(loc);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing } if name == "noframes" => {
                self.open_start_tag(loc, name, attrs, self_closing);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "frameset" => {
                self.pop_current(loc);
                if !self.stack.iter().any(|e| e.local == "frameset") {
                    self.mode = InsertionMode::AfterFrameset;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_after_frameset(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing } if name == "noframes" => {
                self.open_start_tag(loc, name, attrs, self_closing);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "html" => {
                self.mode = InsertionMode::AfterAfterFrameset;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_after_after_frameset(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => Ok(()),
            HtmlToken::Comment(body) => {
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing } if name == "noframes" => {
                self.open_start_tag(loc, name, attrs, self_closing);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // -- table / caption / column-group / row / cell ----------------------

    fn handle_in_table(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) => {
                if c.is_whitespace() {
                    self.flush_text();
                    self.flush_deferred_tables();
                    self.reconstruct_formatting(loc);
                    self.push_text(loc, c.to_string());
                } else {
                    self.report(loc, ErrorKind::BadContent { where_: "table".into() });
                    self.push_text(loc, c.to_string());
                }
                Ok(())
            }
            HtmlToken::Comment(body) => {
                self.flush_text();
                self.flush_deferred_tables();
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::Doctype { .. } => {
                self.report(
                    loc,
                    ErrorKind::BadDocument {
                        detail: "a doctype may not appear inside a table".into(),
                    },
                );
                Ok(())
            }
            HtmlToken::CData(text) => {
                self.flush_text();
                self.flush_deferred_tables();
                self.push_text(loc, text);
                Ok(())
            }
            HtmlToken::Eof => Ok(()),
            HtmlToken::StartTag { name, attrs, self_closing } => {
                match name.as_str() {
                    "caption" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, &name, attrs, HTML_NS);
                        self.enter_mode(InsertionMode::InCaption);
                    }
                    "colgroup" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, &name, attrs, HTML_NS);
                        self.enter_mode(InsertionMode::InColumnGroup);
                    }
                    "col" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, "colgroup", Vec::new(), HTML_NS);
                        self.enter_mode(InsertionMode::InColumnGroup);
                        self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                    }
                    "thead" | "tbody" | "tfoot" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, &name, attrs, HTML_NS);
                        self.enter_mode(InsertionMode::InTableBody);
                    }
                    "tr" | "td" | "th" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, "tbody", Vec::new(), HTML_NS);
                        self.enter_mode(InsertionMode::InTableBody);
                        self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                    }
                    "table" => {
                        self.report(
                            loc,
                            ErrorKind::MisnestedTag {
                                what: "table".into(),
                                where_: "table".into(),
                            },
                        );
                        self.flush_text();
                        self.close_end_tag(loc, "table".into());
                        self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                    }
                    "template" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.push_element(loc, &name, attrs, HTML_NS);
                        self.enter_mode(InsertionMode::InTemplate);
                    }
                    "style" | "script" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.open_start_tag(loc, name, attrs, self_closing);
                    }
                    _ => {
                        self.report(loc, ErrorKind::BadContent { where_: "table".into() });
                        self.flush_text();
                        self.open_start_tag(loc, name, attrs, self_closing);
                    }
                }
                Ok(())
            }
            HtmlToken::EndTag { name } => {
                match name.as_str() {
                    "table" => {
                        self.flush_text();
                        self.flush_deferred_tables();
                        self.pop_current(loc);
                        self.leave_mode();
                    }
                    "body" | "caption" | "col" | "colgroup" | "html" | "tbody" | "td" | "tfoot" | "th" | "thead"
                    | "tr" => {
                        self.report(loc, ErrorKind::UnmatchedEndTag { name: name.clone() });
                    }
                    _ => {
                        self.report(loc, ErrorKind::BadContent { where_: "table".into() });
                        self.flush_text();
                        self.close_end_tag(loc, name);
                    }
                }
                Ok(())
            }
        }
    }

    fn handle_in_caption(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::EndTag { name } if name == "caption" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "table" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::EndTag { name });
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing }
                if matches!(
                    name.as_str(),
                    "caption" | "col" | "colgroup" | "tbody" | "td" | "tfoot" | "th" | "thead" | "tr"
                ) =>
            {
                self.report(
                    loc,
                    ErrorKind::MisnestedTag {
                        what: name.clone(),
                        where_: "caption".into(),
                    },
                );
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                Ok(())
            }
            other => self.handle_body(loc, other),
        }
    }

    fn handle_in_column_group(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) if c.is_whitespace() => {
                self.push_text(loc, c.to_string());
                Ok(())
            }
            HtmlToken::Comment(body) => {
                self.flush_text();
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing: _ } if name == "col" => {
                self.flush_text();
                self.push_element(loc, &name, attrs, HTML_NS);
                self.pop_current(loc);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "colgroup" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            other => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, other);
                Ok(())
            }
        }
    }

    fn handle_in_table_body(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::StartTag { name, attrs, self_closing: _ } if name == "tr" => {
                self.flush_text();
                self.push_element(loc, &name, attrs, HTML_NS);
                self.enter_mode(InsertionMode::InRow);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing } if matches!(name.as_str(), "td" | "th") => {
                self.report(
                    loc,
                    ErrorKind::MisnestedTag {
                        what: name.clone(),
                        where_: "table section".into(),
                    },
                );
                self.flush_text();
                self.push_element(loc, "tr", Vec::new(), HTML_NS);
                self.enter_mode(InsertionMode::InRow);
                self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                Ok(())
            }
            HtmlToken::EndTag { name } if matches!(name.as_str(), "tbody" | "tfoot" | "thead") => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing }
                if matches!(name.as_str(), "caption" | "col" | "colgroup" | "tbody" | "tfoot" | "thead") =>
            {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "table" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::EndTag { name });
                Ok(())
            }
            other => self.handle_in_table(loc, other),
        }
    }

    fn handle_in_row(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::StartTag { name, attrs, self_closing: _ } if matches!(name.as_str(), "td" | "th") => {
                self.flush_text();
                self.push_element(loc, &name, attrs, HTML_NS);
                self.formatting.push(FormattingEntry::Marker);
                self.enter_mode(InsertionMode::InCell);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "tr" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing }
                if matches!(
                    name.as_str(),
                    "caption" | "col" | "colgroup" | "tbody" | "tfoot" | "thead" | "tr"
                ) =>
            {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                Ok(())
            }
            HtmlToken::EndTag { name } if matches!(name.as_str(), "table" | "tbody" | "tfoot" | "thead") => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                self.reprocess(loc, HtmlToken::EndTag { name });
                Ok(())
            }
            other => self.handle_in_table(loc, other),
        }
    }

    fn handle_in_cell(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::EndTag { name } if matches!(name.as_str(), "td" | "th") => {
                self.flush_text();
                self.pop_current(loc);
                self.clear_formatting_to_marker();
                self.leave_mode();
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing }
                if matches!(
                    name.as_str(),
                    "caption" | "col" | "colgroup" | "tbody" | "td" | "tfoot" | "th" | "thead" | "tr"
                ) =>
            {
                self.report(
                    loc,
                    ErrorKind::MisnestedTag {
                        what: name.clone(),
                        where_: "cell".into(),
                    },
                );
                self.flush_text();
                self.pop_current(loc);
                self.clear_formatting_to_marker();
                self.leave_mode();
                self.reprocess(loc, HtmlToken::StartTag { name, attrs, self_closing });
                Ok(())
            }
            other => self.handle_body(loc, other),
        }
    }

    fn clear_formatting_to_marker(&mut self) {
        while let Some(entry) = self.formatting.pop() {
            if matches!(entry, FormattingEntry::Marker) {
                break;
            }
        }
    }

    // -- select / template --------------------------------------------------

    fn handle_in_select(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match token {
            HtmlToken::Character(c) => {
                self.push_text(loc, c.to_string());
                Ok(())
            }
            HtmlToken::Comment(body) => {
                self.flush_text();
                self.pending.push_back((loc, Signal::Comment(body), None));
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing: _ } if name == "option" => {
                self.flush_text();
                if matches!(self.stack.last(), Some(e) if e.local == "option") {
                    self.pop_current(loc);
                }
                self.push_element(loc, &name, attrs, HTML_NS);
                Ok(())
            }
            HtmlToken::StartTag { name, attrs, self_closing: _ } if name == "optgroup" => {
                self.flush_text();
                if matches!(self.stack.last(), Some(e) if e.local == "option") {
                    self.pop_current(loc);
                }
                if matches!(self.stack.last(), Some(e) if e.local == "optgroup") {
                    self.pop_current(loc);
                }
                self.push_element(loc, &name, attrs, HTML_NS);
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "optgroup" => {
                if self.stack.len() >= 2
                    && self.stack[self.stack.len() - 1].local == "option"
                    && self.stack[self.stack.len() - 2].local == "optgroup"
                {
                    self.pop_current(loc);
                }
                if matches!(self.stack.last(), Some(e) if e.local == "optgroup") {
                    self.pop_current(loc);
                } else {
                    self.report(loc, ErrorKind::UnmatchedEndTag { name });
                }
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "option" => {
                if matches!(self.stack.last(), Some(e) if e.local == "option") {
                    self.pop_current(loc);
                } else {
                    self.report(loc, ErrorKind::UnmatchedEndTag { name });
                }
                Ok(())
            }
            HtmlToken::EndTag { name } if name == "select" => {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            HtmlToken::StartTag { name, .. } if name == "select" => {
                self.report(
                    loc,
                    ErrorKind::MisnestedTag {
                        what: "select".into(),
                        where_: "select".into(),
                    },
                );
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                Ok(())
            }
            HtmlToken::Doctype { .. } => {
                self.report(
                    loc,
                    ErrorKind::BadDocument {
                        detail: "a doctype may not appear inside a select".into(),
                    },
                );
                Ok(())
            }
            _ => {
                self.report(loc, ErrorKind::BadContent { where_: "select".into() });
                Ok(())
            }
        }
    }

    fn handle_in_select_in_table(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        match &token {
            HtmlToken::StartTag { name, .. }
                if matches!(name.as_str(), "caption" | "table" | "tbody" | "tfoot" | "thead" | "tr" | "td" | "th") =>
            {
                let what = name.clone();
                self.report(
                    loc,
                    ErrorKind::MisnestedTag {
                        what,
                        where_: "select".into(),
                    },
                );
                self.flush_text();
                self.close_generic(loc, "select");
                self.leave_mode();
                self.reprocess(loc, token);
                return Ok(());
            }
            HtmlToken::EndTag { name }
                if matches!(name.as_str(), "caption" | "table" | "tbody" | "tfoot" | "thead" | "tr" | "td" | "th") =>
            {
                let what = name.clone();
                if self.stack.iter().any(|e| e.local == what) {
                    self.report(
                        loc,
                        ErrorKind::MisnestedTag {
                            what: what.clone(),
                            where_: "select".into(),
                        },
                    );
                    self.flush_text();
                    self.close_generic(loc, "select");
                    self.leave_mode();
                    self.reprocess(loc, token);
                }
                return Ok(());
            }
            _ => {}
        }
        self.handle_in_select(loc, token)
    }

    fn handle_in_template(&mut self, loc: Location, token: HtmlToken) -> Result<()> {
        if let HtmlToken::EndTag { name } = &token {
            if name == "template" {
                self.flush_text();
                self.pop_current(loc);
                self.leave_mode();
                return Ok(());
            }
        }
        self.handle_body(loc, token)
    }

    // -- element stack ----------------------------------------------------

    fn push_element(&mut self, loc: Location, local: &str, raw_attrs: Vec<super::token::HtmlAttribute>, ns: &'static str) {
        let id = self.alloc_id();
        let attrs: Vec<Attribute> = raw_attrs
            .into_iter()
            .map(|a| Attribute::new(Name::unprefixed(a.name), a.value))
            .collect();
        self.stack.push(OpenElement::new(id, local.to_string(), ns, false));
        self.pending.push_back((
            loc,
            Signal::StartElement(Name::new(ns, local.to_string()), attrs),
            Some(id),
        ));
        self.last_start_tag = local.to_string();
        self.text_mode = text_mode_for(local, ns);
        if matches!(self.text_mode, TextMode::RcData | TextMode::RawText | TextMode::ScriptData) {
            self.enter_mode(InsertionMode::Text);
        }
    }

    fn pop_current(&mut self, loc: Location) {
        if let Some(el) = self.stack.pop() {
            if !el.synthetic && !el.pending_emit {
                self.pending.push_back((loc, Signal::EndElement, Some(el.id)));
            }
        }
        self.text_mode = TextMode::Data;
    }

    fn open_start_tag(&mut self, loc: Location, name: String, raw_attrs: Vec<super::token::HtmlAttribute>, self_closing: bool) {
        if self.in_foreign() && FOREIGN_BREAKOUT_TAGS.contains(&name.as_str()) {
            let current = self.stack.last().map(|e| e.local.clone()).unwrap_or_default();
            self.report(
                loc,
                ErrorKind::MisnestedTag {
                    what: name.clone(),
                    where_: current,
                },
            );
            self.break_out_of_foreign(loc);
        }

        if matches!(name.as_str(), "html" | "head" | "body") {
            self.report(
                loc,
                ErrorKind::BadDocument {
                    detail: format!("unexpected <{}> inside the body", name),
                },
            );
            return;
        }

        let ns = if self.in_foreign() {
            self.stack.last().map(|e| e.namespace).unwrap_or(HTML_NS)
        } else if name == "svg" {
            SVG_NS
        } else if name == "math" {
            MATHML_NS
        } else {
            HTML_NS
        };

        // The table's own start tag is held back so foster-parented content
        // discovered later (see `handle_in_table`) can be queued ahead of it.
        if ns == HTML_NS && name == "table" {
            self.reconstruct_formatting(loc);
            let attrs: Vec<Attribute> = raw_attrs
                .into_iter()
                .map(|a| Attribute::new(Name::unprefixed(a.name), a.value))
                .collect();
            let id = self.alloc_id();
            let mut el = OpenElement::new(id, "table".to_string(), HTML_NS, false);
            el.pending_emit = true;
            el.deferred_attrs = Some((loc, attrs));
            self.stack.push(el);
            self.last_start_tag = "table".to_string();
            self.text_mode = TextMode::Data;
            self.enter_mode(InsertionMode::InTable);
            return;
        }

        self.reconstruct_formatting(loc);

        let local = if ns == SVG_NS { svg_adjust_tag(&name) } else { name.clone() };
        let attrs: Vec<Attribute> = raw_attrs
            .into_iter()
            .map(|a| Attribute::new(Name::unprefixed(a.name), a.value))
            .collect();

        let id = self.alloc_id();
        self.stack.push(OpenElement::new(id, local.clone(), ns, false));
        self.pending
            .push_back((loc, Signal::StartElement(Name::new(ns, local.clone()), attrs.clone()), Some(id)));

        if ns == HTML_NS && FORMATTING_TAGS.contains(&name.as_str()) {
            self.formatting.push(FormattingEntry::Element {
                id,
                local: local.clone(),
                attrs,
            });
            self.noahs_ark(&local);
        }

        self.last_start_tag = name.clone();

        let is_void = ns == HTML_NS && VOID_TAGS.contains(&name.as_str());
        if self_closing || is_void {
            self.stack.pop();
            self.pending.push_back((loc, Signal::EndElement, Some(id)));
            self.text_mode = TextMode::Data;
        } else {
            self.text_mode = text_mode_for(&name, ns);
            if matches!(self.text_mode, TextMode::RcData | TextMode::RawText | TextMode::ScriptData) {
                self.enter_mode(InsertionMode::Text);
            }
        }
    }

    fn close_end_tag(&mut self, loc: Location, name: String) {
        if name == "body" {
            self.mode = InsertionMode::AfterBody;
            return;
        }
        if name == "html" {
            self.mode = InsertionMode::AfterBody;
            self.reprocess(loc, HtmlToken::EndTag { name });
            return;
        }
        if !self.in_foreign() && FORMATTING_TAGS.contains(&name.as_str()) {
            self.adoption_agency(loc, &name);
            return;
        }
        self.close_generic(loc, &name);
    }

    fn close_generic(&mut self, loc: Location, name: &str) {
        match self.stack.iter().rposition(|e| e.local == name && !e.synthetic) {
            Some(pos) => {
                let depth = self.stack.len() - pos;
                if depth > 1 {
                    let innermost = self.stack.last().map(|e| e.local.clone()).unwrap_or_default();
                    self.report(
                        loc,
                        ErrorKind::MisnestedTag {
                            what: name.to_string(),
                            where_: innermost,
                        },
                    );
                }
                for _ in 0..depth {
                    if let Some(el) = self.stack.pop() {
                        if !el.synthetic && !el.pending_emit {
                            self.pending.push_back((loc, Signal::EndElement, Some(el.id)));
                        }
                    }
                }
            }
            None => {
                self.report(loc, ErrorKind::UnmatchedEndTag { name: name.to_string() });
            }
        }
    }

    fn break_out_of_foreign(&mut self, loc: Location) {
        while let Some(top) = self.stack.last() {
            if top.namespace == HTML_NS {
                break;
            }
            if let Some(el) = self.stack.pop() {
                if !el.synthetic {
                    self.pending.push_back((loc, Signal::EndElement, Some(el.id)));
                }
            }
        }
    }

    // -- active formatting list ------------------------------------------

    fn noahs_ark(&mut self, local: &str) {
        let matches: Vec<usize> = self
            .formatting
            .iter()
            .enumerate()
            .rev()
            .take_while(|(_, e)| !matches!(e, FormattingEntry::Marker))
            .filter(|(_, e)| matches!(e, FormattingEntry::Element { local: l, .. } if l == local))
            .map(|(i, _)| i)
            .collect();
        if matches.len() > 3 {
            let earliest = *matches.last().unwrap();
            self.formatting.remove(earliest);
        }
    }

    fn pending_start_index(&self, id: u64) -> Option<usize> {
        self.pending
            .iter()
            .position(|(_, sig, tag)| *tag == Some(id) && matches!(sig, Signal::StartElement(_, _)))
    }

    fn retarget_pending(&mut self, old_id: u64, new_id: u64) {
        for entry in self.pending.iter_mut() {
            if entry.2 == Some(old_id) {
                entry.2 = Some(new_id);
            }
        }
    }

    /// The full adoption agency algorithm: locates the formatting element,
    /// handles the "current node" and "no furthest block" short-circuits,
    /// and otherwise reparents the furthest block out from under the
    /// formatting element and wraps its buffered content in a clone of it.
    /// Bounded to 8 outer iterations, matching the specification's own
    /// escape hatch for pathological inputs.
    fn adoption_agency(&mut self, loc: Location, name: &str) {
        for outer in 0..8 {
            let mut found = None;
            for i in (0..self.formatting.len()).rev() {
                match &self.formatting[i] {
                    FormattingEntry::Marker => break,
                    FormattingEntry::Element { local, .. } if local == name => {
                        found = Some(i);
                        break;
                    }
                    _ => {}
                }
            }
            let Some(fe_idx) = found else {
                if outer == 0 {
                    self.close_generic(loc, name);
                }
                return;
            };
            let fe_id = match &self.formatting[fe_idx] {
                FormattingEntry::Element { id, .. } => *id,
                FormattingEntry::Marker => unreachable!(),
            };
            let Some(fe_pos) = self.stack.iter().position(|e| e.id == fe_id) else {
                self.formatting.remove(fe_idx);
                self.report(loc, ErrorKind::UnmatchedEndTag { name: name.to_string() });
                return;
            };

            if fe_pos == self.stack.len() - 1 {
                self.stack.pop();
                self.pending.push_back((loc, Signal::EndElement, Some(fe_id)));
                self.formatting.remove(fe_idx);
                return;
            }

            let fe_ns = self.stack[fe_pos].namespace;

            let furthest_block_pos =
                (fe_pos + 1..self.stack.len()).find(|&i| !FORMATTING_TAGS.contains(&self.stack[i].local.as_str()));

            let Some(fb_pos) = furthest_block_pos else {
                let depth = self.stack.len() - fe_pos;
                for _ in 0..depth {
                    if let Some(el) = self.stack.pop() {
                        if !el.synthetic {
                            self.pending.push_back((loc, Signal::EndElement, Some(el.id)));
                        }
                    }
                }
                self.formatting.remove(fe_idx);
                return;
            };

            let fb_id = self.stack[fb_pos].id;
            let bookmark = (fe_idx + 1).min(self.formatting.len());

            // Clone every active formatting element strictly between fe and
            // the furthest block in place so their already-buffered content
            // stays nested inside them.
            let mut j = fb_pos;
            while j > fe_pos + 1 {
                j -= 1;
                let node_id = self.stack[j].id;
                let fmt_idx = self
                    .formatting
                    .iter()
                    .position(|e| matches!(e, FormattingEntry::Element { id, .. } if *id == node_id));
                let Some(fmt_idx) = fmt_idx else {
                    let el = self.stack.remove(j);
                    if !el.synthetic {
                        self.pending.push_back((loc, Signal::EndElement, Some(el.id)));
                    }
                    continue;
                };
                let (old_local, old_attrs) = match &self.formatting[fmt_idx] {
                    FormattingEntry::Element { local, attrs, .. } => (local.clone(), attrs.clone()),
                    FormattingEntry::Marker => unreachable!(),
                };
                let new_id = self.alloc_id();
                self.retarget_pending(node_id, new_id);
                let ns = self.stack[j].namespace;
                self.stack[j] = OpenElement::new(new_id, old_local.clone(), ns, false);
                self.formatting[fmt_idx] = FormattingEntry::Element {
                    id: new_id,
                    local: old_local,
                    attrs: old_attrs,
                };
            }

            let fe_local = match &self.formatting[fe_idx] {
                FormattingEntry::Element { local, .. } => local.clone(),
                FormattingEntry::Marker => unreachable!(),
            };
            let fe_attrs = match &self.formatting[fe_idx] {
                FormattingEntry::Element { attrs, .. } => attrs.clone(),
                FormattingEntry::Marker => unreachable!(),
            };
            let fe_clone_id = self.alloc_id();

            // fe is closed right where the furthest block used to open
            // under it (the furthest block is reparented out from under fe,
            // onto fe's own parent), and a clone of fe is opened as the
            // furthest block's first child to hold its buffered content.
            if let (Some(fe_start_idx), Some(fb_start_idx)) =
                (self.pending_start_index(fe_id), self.pending_start_index(fb_id))
            {
                if fb_start_idx > fe_start_idx {
                    self.pending.insert(fb_start_idx, (loc, Signal::EndElement, Some(fe_id)));
                    let fb_start_idx = fb_start_idx + 1;
                    self.pending.insert(
                        fb_start_idx + 1,
                        (
                            loc,
                            Signal::StartElement(Name::new(fe_ns, fe_local.clone()), fe_attrs.clone()),
                            Some(fe_clone_id),
                        ),
                    );
                }
            }

            self.stack.retain(|e| e.id != fe_id);
            let fb_pos_after = self
                .stack
                .iter()
                .position(|e| e.id == fb_id)
                .unwrap_or_else(|| self.stack.len().saturating_sub(1));
            self.stack
                .insert(fb_pos_after + 1, OpenElement::new(fe_clone_id, fe_local.clone(), fe_ns, false));

            self.formatting.remove(fe_idx);
            let bookmark = bookmark.min(self.formatting.len());
            self.formatting.insert(
                bookmark,
                FormattingEntry::Element {
                    id: fe_clone_id,
                    local: fe_local,
                    attrs: fe_attrs,
                },
            );
        }
    }

    /// Reopens any active formatting elements that were implicitly closed
    /// (by an ancestor's end tag) but never explicitly closed themselves,
    /// cloning them onto the current insertion point.
    fn reconstruct_formatting(&mut self, loc: Location) {
        if self.formatting.is_empty() {
            return;
        }
        if let Some(FormattingEntry::Element { id, .. }) = self.formatting.last() {
            if self.stack.iter().any(|e| e.id == *id) {
                return;
            }
        }
        let mut start = self.formatting.len();
        loop {
            if start == 0 {
                break;
            }
            start -= 1;
            let already_open = match &self.formatting[start] {
                FormattingEntry::Marker => {
                    start += 1;
                    break;
                }
                FormattingEntry::Element { id, .. } => self.stack.iter().any(|e| e.id == *id),
            };
            if already_open {
                start += 1;
                break;
            }
        }
        let ns = self.stack.last().map(|e| e.namespace).unwrap_or(HTML_NS);
        for j in start..self.formatting.len() {
            if let FormattingEntry::Element { local, attrs, .. } = self.formatting[j].clone() {
                let new_id = self.alloc_id();
                self.stack.push(OpenElement::new(new_id, local.clone(), ns, false));
                self.pending.push_back((
                    loc,
                    Signal::StartElement(Name::new(ns, local.clone()), attrs.clone()),
                    Some(new_id),
                ));
                self.formatting[j] = FormattingEntry::Element {
                    id: new_id,
                    local,
                    attrs,
                };
            }
        }
    }
}

/// Adapts a [`HtmlTreeConstructor`] into the public `Stream<(Location,
/// Signal)>` surface.
pub(crate) fn html_signal_stream<'a>(mut tree: HtmlTreeConstructor<'a>) -> Stream<'a, (Location, Signal)> {
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

    fn parse(input: &str, options: ParserOptions<'static>) -> Vec<Signal> {
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let chars = crate::encoding::decode(bytes, false, Some(Encoding::Utf8), |_, _| {}).unwrap();
        let tokenizer = HtmlTokenizer::new(chars);
        let tree = HtmlTreeConstructor::new(tokenizer, options);
        html_signal_stream(tree)
            .to_list()
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect()
    }

    fn html_name(local: &str) -> Name {
        Name::new(HTML_NS, local)
    }

    #[test]
    fn minimal_fragment() {
        let sigs = parse("<p>hi</p>", ParserOptions::new().context(Context::Fragment("body".into())));
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(html_name("p"), vec![]),
                Signal::text("hi"),
                Signal::EndElement,
            ]
        );
    }

    #[test]
    fn misnested_formatting_runs_adoption_agency() {
        let sigs = parse(
            "<p>1<b>2<i>3</b>4</i>5</p>",
            ParserOptions::new().context(Context::Fragment("body".into())),
        );
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(html_name("p"), vec![]),
                Signal::text("1"),
                Signal::StartElement(html_name("b"), vec![]),
                Signal::text("2"),
                Signal::StartElement(html_name("i"), vec![]),
                Signal::text("3"),
                Signal::EndElement, // i
                Signal::EndElement, // b
                Signal::StartElement(html_name("i"), vec![]),
                Signal::text("4"),
                Signal::EndElement, // i (reopened)
                Signal::text("5"),
                Signal::EndElement, // p
            ]
        );
    }

    #[test]
    fn adoption_agency_reparents_across_an_intervening_block() {
        let sigs = parse(
            "<b>1<p>2</b>3</p>",
            ParserOptions::new().context(Context::Fragment("body".into())),
        );
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(html_name("b"), vec![]),
                Signal::text("1"),
                Signal::EndElement, // b, closed where p is reparented out from under it
                Signal::StartElement(html_name("p"), vec![]),
                Signal::StartElement(html_name("b"), vec![]), // clone of b, wraps p's buffered content
                Signal::text("2"),
                Signal::text("3"),
                Signal::EndElement, // b (clone)
                Signal::EndElement, // p
            ]
        );
    }

    #[test]
    fn foster_parents_stray_text_before_the_table() {
        let sigs = parse(
            "<table>x</table>",
            ParserOptions::new().context(Context::Fragment("body".into())),
        );
        assert_eq!(
            sigs,
            vec![
                Signal::text("x"),
                Signal::StartElement(html_name("table"), vec![]),
                Signal::EndElement,
            ]
        );
    }

    #[test]
    fn foreign_content_break_out() {
        let sigs = parse("<svg><g><p>x</svg>", ParserOptions::new());
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(Name::new(SVG_NS, "svg"), vec![]),
                Signal::StartElement(Name::new(SVG_NS, "g"), vec![]),
                Signal::EndElement, // g
                Signal::EndElement, // svg
                Signal::StartElement(html_name("p"), vec![]),
                Signal::text("x"),
                Signal::EndElement, // p
            ]
        );
    }

    #[test]
    fn context_auto_detects_table_row_for_a_bare_cell() {
        let sigs = parse("<td>x</td>", ParserOptions::new());
        assert_eq!(
            sigs,
            vec![
                Signal::StartElement(html_name("td"), vec![]),
                Signal::text("x"),
                Signal::EndElement,
            ]
        );
    }
}
