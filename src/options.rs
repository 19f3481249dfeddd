//! The options surface (§6): callback slots recognised by the parser and
//! writer entry points.

use std::cell::RefCell;
use std::rc::Rc;

use crate::encoding::Encoding;
use crate::error::ErrorKind;
use crate::location::Location;

/// Fixes the context a parse runs in, bypassing auto-detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    Document,
    Fragment(String),
}

/// Callback invoked for every recoverable or fatal error, before recovery
/// proceeds. Panicking from inside the callback propagates out of the
/// enclosing `Stream::next` call (see [`crate::error::Error`]).
pub type ReportFn<'a> = Box<dyn FnMut(Location, &ErrorKind) + 'a>;

/// A cheaply-cloned handle onto a `ParserOptions`' `report` callback.
///
/// The decoder, tokenizer and tree constructor each need to report errors
/// as they go, but only one of them can own the callback at a time if it
/// were a plain `Box`. Sharing it behind an `Rc<RefCell<_>>` lets every
/// stage of the pipeline hold a clone.
#[derive(Clone)]
pub(crate) struct ReportSink<'a>(Option<Rc<RefCell<ReportFn<'a>>>>);

impl<'a> ReportSink<'a> {
    pub fn report(&self, loc: Location, kind: ErrorKind) {
        if let Some(cell) = &self.0 {
            (cell.borrow_mut())(loc, &kind);
        }
    }
}

/// Callback consulted by the XML parser when a prefix has no bound URI in
/// scope. Returning `None` causes a `BadNamespace` report and the prefix is
/// treated as empty.
pub type NamespaceFn<'a> = Box<dyn FnMut(&str) -> Option<String> + 'a>;

/// Callback consulted by the XML parser for entity references not covered
/// by the five XML built-ins or a numeric reference. The returned string is
/// inserted verbatim as decoded characters.
pub type EntityFn<'a> = Box<dyn FnMut(&str) -> Option<String> + 'a>;

/// Callback consulted by the XML writer when a namespace URI has no prefix
/// bound in scope.
pub type PrefixFn<'a> = Box<dyn FnMut(&str) -> Option<String> + 'a>;

/// Options recognised by [`crate::parse_xml`] and [`crate::parse_html`].
#[derive(Default)]
pub struct ParserOptions<'a> {
    pub(crate) report: Option<Rc<RefCell<ReportFn<'a>>>>,
    pub(crate) encoding: Option<Encoding>,
    pub(crate) namespace: Option<NamespaceFn<'a>>,
    pub(crate) entity: Option<EntityFn<'a>>,
    pub(crate) context: Option<Context>,
}

impl<'a> ParserOptions<'a> {
    pub fn new() -> Self {
        ParserOptions::default()
    }

    pub fn report(mut self, f: impl FnMut(Location, &ErrorKind) + 'a) -> Self {
        self.report = Some(Rc::new(RefCell::new(Box::new(f))));
        self
    }

    /// A cheaply-cloned handle that can be shared across pipeline stages
    /// without giving up ownership of the rest of the options.
    pub(crate) fn report_sink(&self) -> ReportSink<'a> {
        ReportSink(self.report.clone())
    }

    /// Bypasses automatic encoding detection.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn namespace(mut self, f: impl FnMut(&str) -> Option<String> + 'a) -> Self {
        self.namespace = Some(Box::new(f));
        self
    }

    pub fn entity(mut self, f: impl FnMut(&str) -> Option<String> + 'a) -> Self {
        self.entity = Some(Box::new(f));
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn report_error(&self, loc: Location, kind: ErrorKind) {
        self.report_sink().report(loc, kind);
    }
}

/// Options recognised by [`crate::write_xml`].
#[derive(Default)]
pub struct WriterOptions<'a> {
    pub(crate) prefix: Option<PrefixFn<'a>>,
}

impl<'a> WriterOptions<'a> {
    pub fn new() -> Self {
        WriterOptions::default()
    }

    pub fn prefix(mut self, f: impl FnMut(&str) -> Option<String> + 'a) -> Self {
        self.prefix = Some(Box::new(f));
        self
    }
}
