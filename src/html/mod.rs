//! The HTML parsing and serialization pipeline: components E, F and H.

mod entities;
mod token;
mod tokenizer;
mod tree;
mod writer;

use crate::location::Location;
use crate::options::{ParserOptions, WriterOptions};
use crate::signal::Signal;
use crate::stream::Stream;

use tokenizer::HtmlTokenizer;
use tree::HtmlTreeConstructor;
use writer::HtmlWriter;

/// Parses a byte stream as HTML, returning a lazy stream of located
/// signals.
///
/// Decoding (component B), tokenizing (component E) and tree construction
/// (component F) are all driven lazily: nothing downstream of `bytes` runs
/// until the returned stream is pulled.
pub fn parse_html<'a>(bytes: Stream<'a, u8>, mut options: ParserOptions<'a>) -> Stream<'a, (Location, Signal)> {
    let explicit_encoding = options.encoding.take();
    let report_sink = options.report_sink();
    let chars = match crate::encoding::decode(bytes, true, explicit_encoding, move |loc, kind| {
        report_sink.report(loc, kind)
    }) {
        Ok(chars) => chars,
        Err(e) => return Stream::from_fn(move || Err(e.clone())),
    };
    let tokenizer = HtmlTokenizer::new(chars);
    let tree = HtmlTreeConstructor::new(tokenizer, options);
    tree::html_signal_stream(tree)
}

/// Serializes a stream of signals as HTML.
pub fn write_html<'a>(signals: Stream<'a, Signal>, options: WriterOptions<'a>) -> Stream<'a, u8> {
    let writer = HtmlWriter::new(signals, options);
    writer::html_byte_stream(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_simple_page() {
        let input = "<!DOCTYPE html><html><head><title>T</title></head><body><p>hi</p></body></html>";
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let signals: Vec<Signal> = parse_html(bytes, ParserOptions::new())
            .to_list()
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        assert!(signals.iter().any(|s| matches!(s, Signal::Doctype(_))));
        assert!(signals.contains(&Signal::text("hi")));
    }

    #[test]
    fn reports_errors_through_the_callback() {
        let input = "<p>a &notanentity; b</p>";
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let mut errors = Vec::new();
        let options = ParserOptions::new().report(|_, kind| errors.push(kind.clone()));
        let signals = parse_html(bytes, options).to_list().unwrap();
        assert!(!signals.is_empty());
        assert!(!errors.is_empty());
    }

    #[test]
    fn parse_then_write_round_trips_a_fragment() {
        use crate::options::Context;
        let input = "<p>hello <b>world</b></p>";
        let bytes = Stream::of_list(input.as_bytes().to_vec());
        let signals: Vec<Signal> = parse_html(bytes, ParserOptions::new().context(Context::Fragment("body".into())))
            .to_list()
            .unwrap()
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        let out = write_html(Stream::of_list(signals), WriterOptions::new())
            .to_vec()
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }
}
